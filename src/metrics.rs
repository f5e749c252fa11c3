use crate::glosa::AssessmentSource;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing assistant activity.
#[derive(Default)]
pub struct AssistantMetrics {
    questions_answered: AtomicU64,
    questions_failed: AtomicU64,
    chat_sessions: AtomicU64,
    heuristic_assessments: AtomicU64,
    generative_assessments: AtomicU64,
    default_assessments: AtomicU64,
    extraction_failures: AtomicU64,
    settings_reloads: AtomicU64,
}

impl AssistantMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a question.
    pub fn record_question(&self, answered: bool) {
        let counter = if answered {
            &self.questions_answered
        } else {
            &self.questions_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a started chat stream.
    pub fn record_chat_session(&self) {
        self.chat_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an assessment produced by `source`.
    pub fn record_assessment(&self, source: AssessmentSource) {
        let counter = match source {
            AssessmentSource::Heuristic => &self.heuristic_assessments,
            AssessmentSource::Generative => &self.generative_assessments,
            AssessmentSource::StaticDefault => &self.default_assessments,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document that could not be read.
    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful settings reload.
    pub fn record_reload(&self) {
        self.settings_reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            questions_failed: self.questions_failed.load(Ordering::Relaxed),
            chat_sessions: self.chat_sessions.load(Ordering::Relaxed),
            assessments: AssessmentCounts {
                heuristic: self.heuristic_assessments.load(Ordering::Relaxed),
                generative: self.generative_assessments.load(Ordering::Relaxed),
                static_default: self.default_assessments.load(Ordering::Relaxed),
            },
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            settings_reloads: self.settings_reloads.load(Ordering::Relaxed),
        }
    }
}

/// Assessment counts by producing tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AssessmentCounts {
    /// Produced by the heuristic model.
    #[serde(rename = "modelo_heuristico")]
    pub heuristic: u64,
    /// Produced by the generative audit.
    #[serde(rename = "modelo_generativo")]
    pub generative: u64,
    /// Static default returned.
    #[serde(rename = "valor_por_defecto")]
    pub static_default: u64,
}

/// Immutable view of assistant counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Questions answered with a grounded response.
    pub questions_answered: u64,
    /// Questions that ended in an error.
    pub questions_failed: u64,
    /// Chat streams started.
    pub chat_sessions: u64,
    /// Glosa assessments by tier.
    pub assessments: AssessmentCounts,
    /// Uploads rejected because a PDF was unreadable.
    pub extraction_failures: u64,
    /// Successful prompt settings reloads.
    pub settings_reloads: u64,
}
