//! Deterministic glosa risk model built from document features.

use crate::glosa::{
    dispatcher::RiskTier,
    types::{
        AssessmentSource, GlosaCase, RiskAssessment, RiskLevel, ScoreBreakdown, TierError,
        ValidationReport,
    },
};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CUPS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CUPS[:\s]*(\d+)").expect("valid CUPS regex"));
static CIE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CIE[:\s]*([A-Z]\d+)").expect("valid CIE regex"));
static AMOUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\d,]+\.?\d*").expect("valid amount regex"));
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}").expect("valid date regex"));
static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("valid word regex"));
static DIAGNOSIS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)diagnóstico[:\s]*([^.\n]+)").expect("valid diagnosis regex")
});
static PROCEDURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)procedimiento[:\s]*([^.\n]+)").expect("valid procedure regex")
});

const MEDICAL_KEYWORDS: [&str; 10] = [
    "diagnóstico",
    "tratamiento",
    "síntomas",
    "examen",
    "procedimiento",
    "medicamento",
    "dosis",
    "frecuencia",
    "duración",
    "evolución",
];

/// Rejection weight of RIPS validation codes known to precede a glosa.
const VALIDATION_CODE_RISK: [(&str, f64); 13] = [
    ("RVC033", 0.9),
    ("RVG19", 0.8),
    ("RVC019", 0.7),
    ("RVC001", 0.8),
    ("RVC002", 0.7),
    ("RVC003", 0.8),
    ("RVC004", 0.7),
    ("RVC010", 0.5),
    ("RVC015", 0.4),
    ("RVC020", 0.5),
    ("RVC005", 0.2),
    ("RVC008", 0.1),
    ("RVC012", 0.1),
];

const LOW_COHERENCE: f64 = 0.3;
const LOW_DENSITY: f64 = 0.1;
const MAX_UNJUSTIFIED_CUPS: usize = 2;
const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Weight for a validation code, if it is a known risk code.
pub fn validation_code_weight(code: &str) -> Option<f64> {
    VALIDATION_CODE_RISK
        .iter()
        .find(|(known, _)| *known == code.trim())
        .map(|(_, weight)| *weight)
}

/// Features extracted from an invoice, its clinical record and validation report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFeatures {
    /// CUPS procedure codes in the invoice.
    pub invoice_cups: usize,
    /// CIE diagnosis codes in the invoice.
    pub invoice_cie: usize,
    /// Money amounts in the invoice.
    pub invoice_amounts: usize,
    /// Dates in the invoice.
    pub invoice_dates: usize,
    /// Invoice length in characters.
    pub invoice_chars: usize,
    /// Word count over character count of the invoice.
    pub information_density: f64,
    /// Distinct medical keywords present in the clinical record.
    pub medical_keywords: usize,
    /// Diagnosis mentions in the clinical record.
    pub diagnoses: usize,
    /// Procedure mentions in the clinical record.
    pub procedures: usize,
    /// Clinical record length in characters.
    pub clinical_chars: usize,
    /// CUPS codes present in both documents.
    pub shared_cups: usize,
    /// CUPS codes present only in the invoice.
    pub invoice_only_cups: usize,
    /// Dates present in both documents.
    pub shared_dates: usize,
    /// Shared CUPS and dates over the invoice's distinct CUPS and dates.
    pub coherence: f64,
    /// Validation entries classed `ERROR`.
    pub validation_errors: usize,
    /// Validation entries classed `ADVERTENCIA`.
    pub validation_warnings: usize,
    /// Validation entries classed `NOTIFICACION`.
    pub validation_notifications: usize,
    /// Weights of known risk codes, in report order.
    pub risk_code_weights: Vec<f64>,
    /// Known risk codes found, in report order.
    pub risk_codes: Vec<String>,
}

impl DocumentFeatures {
    /// Extract features from a case.
    pub fn extract(case: &GlosaCase) -> Self {
        let invoice = case.invoice_text.as_str();
        let clinical = case.clinical_text.as_str();
        let invoice_chars = invoice.chars().count();

        let invoice_cups_set = captures(&CUPS_PATTERN, invoice);
        let clinical_cups_set = captures(&CUPS_PATTERN, clinical);
        let invoice_dates_set = matches(&DATE_PATTERN, invoice);
        let clinical_dates_set = matches(&DATE_PATTERN, clinical);

        let shared_cups = invoice_cups_set.intersection(&clinical_cups_set).count();
        let shared_dates = invoice_dates_set.intersection(&clinical_dates_set).count();
        let coherence_base = (invoice_cups_set.len() + invoice_dates_set.len()).max(1);

        let clinical_lower = clinical.to_lowercase();
        let mut features = Self {
            invoice_cups: CUPS_PATTERN.captures_iter(invoice).count(),
            invoice_cie: CIE_PATTERN.captures_iter(invoice).count(),
            invoice_amounts: AMOUNT_PATTERN.find_iter(invoice).count(),
            invoice_dates: DATE_PATTERN.find_iter(invoice).count(),
            invoice_chars,
            information_density: WORD_PATTERN.find_iter(invoice).count() as f64
                / invoice_chars.max(1) as f64,
            medical_keywords: MEDICAL_KEYWORDS
                .iter()
                .filter(|keyword| clinical_lower.contains(*keyword))
                .count(),
            diagnoses: DIAGNOSIS_PATTERN.captures_iter(clinical).count(),
            procedures: PROCEDURE_PATTERN.captures_iter(clinical).count(),
            clinical_chars: clinical.chars().count(),
            shared_cups,
            invoice_only_cups: invoice_cups_set.difference(&clinical_cups_set).count(),
            shared_dates,
            coherence: (shared_cups + shared_dates) as f64 / coherence_base as f64,
            ..Self::default()
        };

        if let Some(report) = &case.validations {
            features.absorb_validations(report);
        }
        features
    }

    fn absorb_validations(&mut self, report: &ValidationReport) {
        for result in &report.results {
            match result.class.trim() {
                "ERROR" => self.validation_errors += 1,
                "ADVERTENCIA" => self.validation_warnings += 1,
                "NOTIFICACION" => self.validation_notifications += 1,
                _ => {}
            }
            if let Some(weight) = validation_code_weight(&result.code) {
                self.risk_code_weights.push(weight);
                self.risk_codes.push(result.code.trim().to_string());
            }
        }
    }

    /// Mean of the triggered risk factors, or a neutral 0.5 when none trigger.
    pub fn probability(&self) -> f64 {
        let mut factors = Vec::new();
        if self.coherence < LOW_COHERENCE {
            factors.push(0.8);
        }
        if self.invoice_only_cups > MAX_UNJUSTIFIED_CUPS {
            factors.push(0.6);
        }
        factors.extend(self.risk_code_weights.iter().copied());
        if self.information_density < LOW_DENSITY {
            factors.push(0.7);
        }

        if factors.is_empty() {
            NEUTRAL_PROBABILITY
        } else {
            factors.iter().sum::<f64>() / factors.len() as f64
        }
    }
}

/// Primary scoring tier: feature heuristics over the extracted text.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicRiskModel;

impl HeuristicRiskModel {
    /// Create the model.
    pub fn new() -> Self {
        Self
    }

    /// Score a case. Fails only when both documents are blank.
    pub fn evaluate(&self, case: &GlosaCase) -> Result<RiskAssessment, TierError> {
        if case.invoice_text.trim().is_empty() && case.clinical_text.trim().is_empty() {
            return Err(TierError::NoSignal("both documents are blank".into()));
        }

        let features = DocumentFeatures::extract(case);
        let probability = features.probability();
        tracing::debug!(
            coherence = features.coherence,
            density = features.information_density,
            invoice_only_cups = features.invoice_only_cups,
            risk_codes = features.risk_codes.len(),
            probability,
            "Heuristic features computed"
        );

        let mut risk_factors = Vec::new();
        if features.coherence < LOW_COHERENCE {
            risk_factors.push("Baja coherencia entre factura e historia clínica".to_string());
        }
        if features.invoice_only_cups > MAX_UNJUSTIFIED_CUPS {
            risk_factors.push("Códigos CUPS en factura no justificados en historia".to_string());
        }
        if !features.risk_codes.is_empty() {
            risk_factors.push(format!(
                "Validaciones RIPS con códigos de riesgo: {}",
                features.risk_codes.join(", ")
            ));
        }
        if features.information_density < LOW_DENSITY {
            risk_factors.push("Información insuficiente en los documentos".to_string());
        }

        let mut recommendations = Vec::new();
        if probability > 0.7 {
            recommendations.push("Revisar coherencia entre factura e historia clínica".to_string());
            recommendations.push("Verificar códigos CUPS y CIE".to_string());
            recommendations.push("Validar fechas de atención".to_string());
        }
        if features.diagnoses == 0 {
            recommendations.push("Incluir diagnósticos claros en la historia clínica".to_string());
        }

        Ok(RiskAssessment {
            probability: percent(probability),
            level: RiskLevel::from_probability(probability),
            risk_factors,
            recommendations,
            breakdown: ScoreBreakdown {
                diagnostic_coherence: percent(features.coherence),
                medical_justification: clamp_score(features.medical_keywords as f64 * 10.0),
                regulatory_compliance: percent(1.0 - probability),
                documentation_quality: percent(features.information_density),
            },
            source: AssessmentSource::Heuristic,
        })
    }
}

#[async_trait]
impl RiskTier for HeuristicRiskModel {
    fn name(&self) -> &'static str {
        AssessmentSource::Heuristic.as_str()
    }

    async fn attempt(&self, case: &GlosaCase) -> Result<RiskAssessment, TierError> {
        self.evaluate(case)
    }
}

fn captures(pattern: &Regex, text: &str) -> HashSet<String> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn matches(pattern: &Regex, text: &str) -> HashSet<String> {
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn percent(fraction: f64) -> u8 {
    clamp_score(fraction * 100.0)
}

fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.trunc().clamp(0.0, 100.0) as u8
}
