//! Risk assessment types shared by every scoring tier.

use crate::{extraction::ExtractionError, generation::GenerationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Coarse risk bucket derived from the glosa probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Probability below 40.
    #[serde(rename = "BAJO")]
    Low,
    /// Probability from 40 up to 70.
    #[serde(rename = "MEDIO")]
    Medium,
    /// Probability of 70 or more.
    #[serde(rename = "ALTO")]
    High,
}

impl RiskLevel {
    /// Bucket a probability expressed as a fraction in `[0, 1]`.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.7 {
            Self::High
        } else if probability >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "BAJO",
            Self::Medium => "MEDIO",
            Self::High => "ALTO",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "bajo" | "low" => Ok(Self::Low),
            "medio" | "medium" | "moderado" => Ok(Self::Medium),
            "alto" | "high" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

/// Per-dimension scores, each in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Agreement between billed and documented diagnoses and procedures.
    #[serde(rename = "coherencia_diagnostica")]
    pub diagnostic_coherence: u8,
    /// Strength of the clinical justification.
    #[serde(rename = "justificacion_medica")]
    pub medical_justification: u8,
    /// Regulatory compliance.
    #[serde(rename = "cumplimiento_normativo")]
    pub regulatory_compliance: u8,
    /// Documentation quality.
    #[serde(rename = "calidad_documental")]
    pub documentation_quality: u8,
}

impl ScoreBreakdown {
    /// Every dimension at `value`.
    pub fn uniform(value: u8) -> Self {
        Self {
            diagnostic_coherence: value,
            medical_justification: value,
            regulatory_compliance: value,
            documentation_quality: value,
        }
    }
}

/// Tier that produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentSource {
    /// Deterministic local model.
    #[serde(rename = "modelo_heuristico")]
    Heuristic,
    /// Generation-provider audit.
    #[serde(rename = "modelo_generativo")]
    Generative,
    /// Fixed neutral assessment.
    #[serde(rename = "valor_por_defecto")]
    StaticDefault,
}

impl AssessmentSource {
    /// Wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "modelo_heuristico",
            Self::Generative => "modelo_generativo",
            Self::StaticDefault => "valor_por_defecto",
        }
    }
}

/// Structured glosa risk report. Built once per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// Probability of rejection, `0..=100`.
    #[serde(rename = "probabilidad_glosa")]
    pub probability: u8,
    /// Risk bucket.
    #[serde(rename = "nivel_riesgo")]
    pub level: RiskLevel,
    /// Detected risk factors, most relevant first.
    #[serde(rename = "factores_riesgo")]
    pub risk_factors: Vec<String>,
    /// Suggested corrective actions.
    #[serde(rename = "recomendaciones")]
    pub recommendations: Vec<String>,
    /// Four-dimension score breakdown.
    #[serde(rename = "puntuacion_detallada")]
    pub breakdown: ScoreBreakdown,
    /// Tier that produced this assessment.
    pub source: AssessmentSource,
}

/// One entry of a RIPS validation report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationResult {
    /// Validation rule code, e.g. `RVC033`.
    #[serde(rename = "Codigo", default)]
    pub code: String,
    /// Severity class (`ERROR`, `ADVERTENCIA`, `NOTIFICACION`).
    #[serde(rename = "Clase", default)]
    pub class: String,
}

/// RIPS validation report accompanying an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ValidationReport {
    /// Individual validation outcomes.
    #[serde(rename = "ResultadosValidacion", default)]
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    /// Parse a report from raw JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GlosaError> {
        serde_json::from_slice(bytes).map_err(|err| GlosaError::InvalidValidations(err.to_string()))
    }
}

/// Input to the scoring tiers: both documents' text plus an optional validation report.
#[derive(Debug, Clone, Default)]
pub struct GlosaCase {
    /// Text extracted from the invoice.
    pub invoice_text: String,
    /// Text extracted from the clinical record.
    pub clinical_text: String,
    /// Optional RIPS validation report.
    pub validations: Option<ValidationReport>,
}

/// Failure of a single scoring tier. Always absorbed by the dispatcher.
#[derive(Debug, Error)]
pub enum TierError {
    /// Inputs carried no usable signal.
    #[error("no usable signal: {0}")]
    NoSignal(String),
    /// The generation provider failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Provider output could not be interpreted as an assessment.
    #[error("invalid tier output: {0}")]
    InvalidOutput(String),
}

/// Errors surfaced by the document assessment pipeline.
#[derive(Debug, Error)]
pub enum GlosaError {
    /// A document could not be read; scoring never runs in this case.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The validation report was not valid JSON.
    #[error("invalid validation report: {0}")]
    InvalidValidations(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_thresholds() {
        assert_eq!(RiskLevel::from_probability(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.69), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.39), RiskLevel::Low);
    }

    #[test]
    fn level_parses_spanish_and_english() {
        assert_eq!("ALTO".parse(), Ok(RiskLevel::High));
        assert_eq!(" medium ".parse(), Ok(RiskLevel::Medium));
        assert_eq!("bajo".parse(), Ok(RiskLevel::Low));
        assert!("critico".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn assessment_serializes_spanish_keys() {
        let assessment = RiskAssessment {
            probability: 50,
            level: RiskLevel::Medium,
            risk_factors: vec!["a".into()],
            recommendations: vec![],
            breakdown: ScoreBreakdown::uniform(50),
            source: AssessmentSource::StaticDefault,
        };
        let value = serde_json::to_value(&assessment).expect("json");
        assert_eq!(value["probabilidad_glosa"], 50);
        assert_eq!(value["nivel_riesgo"], "MEDIO");
        assert_eq!(value["puntuacion_detallada"]["calidad_documental"], 50);
        assert_eq!(value["source"], "valor_por_defecto");
    }

    #[test]
    fn validation_report_reads_rips_shape() {
        let report: ValidationReport = serde_json::from_value(json!({
            "ResultadosValidacion": [
                { "Codigo": "RVC033", "Clase": "ERROR", "Descripcion": "x" },
                { "Clase": "NOTIFICACION" }
            ]
        }))
        .expect("report");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].code, "RVC033");
        assert_eq!(report.results[1].code, "");
    }

    #[test]
    fn malformed_validation_report_is_rejected() {
        let err = ValidationReport::from_json(b"{not json").expect_err("invalid");
        assert!(matches!(err, GlosaError::InvalidValidations(_)));
        let empty = ValidationReport::from_json(b"{}").expect("empty report");
        assert!(empty.results.is_empty());
    }
}
