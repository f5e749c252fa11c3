//! Fallback scoring tier that asks the generation provider for an audit in strict JSON.

use crate::{
    generation::{ChatMessage, GenerationClient, GenerationRequest},
    glosa::{
        dispatcher::RiskTier,
        types::{AssessmentSource, GlosaCase, RiskAssessment, RiskLevel, ScoreBreakdown, TierError},
    },
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

const AUDITOR_SYSTEM_PROMPT: &str = "Eres un auditor médico experto en glosas y facturación en \
salud en Colombia. Respondes únicamente con JSON válido.";

const REQUIRED_KEYS: [&str; 5] = [
    "probabilidad",
    "nivel_riesgo",
    "factores_riesgo",
    "recomendaciones",
    "puntuacion_detallada",
];

const BREAKDOWN_KEYS: [&str; 4] = [
    "coherencia_diagnostica",
    "justificacion_medica",
    "cumplimiento_normativo",
    "calidad_documental",
];

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Build the audit instructions for an invoice and clinical record excerpt.
pub fn build_audit_prompt(invoice_excerpt: &str, clinical_excerpt: &str) -> String {
    format!(
        "Analiza la siguiente factura médica y su historia clínica y estima la probabilidad de \
que la factura sea glosada por la entidad pagadora.\n\n\
FACTURA:\n{invoice_excerpt}\n\n\
HISTORIA CLÍNICA:\n{clinical_excerpt}\n\n\
Responde exclusivamente con un objeto JSON con esta estructura:\n\
{{\n\
  \"probabilidad\": <entero 0-100>,\n\
  \"nivel_riesgo\": \"BAJO\" | \"MEDIO\" | \"ALTO\",\n\
  \"factores_riesgo\": [\"...\"],\n\
  \"recomendaciones\": [\"...\"],\n\
  \"puntuacion_detallada\": {{\n\
    \"coherencia_diagnostica\": <entero 0-100>,\n\
    \"justificacion_medica\": <entero 0-100>,\n\
    \"cumplimiento_normativo\": <entero 0-100>,\n\
    \"calidad_documental\": <entero 0-100>\n\
  }}\n\
}}"
    )
}

/// Parse the provider reply into an assessment.
///
/// The JSON object is taken from the first `{` to the last `}` so surrounding prose or code
/// fences are ignored. Every key must be present and every value well-typed.
pub fn parse_audit_response(raw: &str) -> Result<RiskAssessment, TierError> {
    let start = raw
        .find('{')
        .ok_or_else(|| TierError::InvalidOutput("response contains no JSON object".into()))?;
    let end = raw
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| TierError::InvalidOutput("response contains no JSON object".into()))?;

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|err| TierError::InvalidOutput(format!("malformed JSON: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| TierError::InvalidOutput("response is not a JSON object".into()))?;

    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
        return Err(TierError::InvalidOutput(format!("missing key `{missing}`")));
    }

    let probability = score_value(&object["probabilidad"], "probabilidad")?;
    let level = object["nivel_riesgo"]
        .as_str()
        .and_then(|label| label.parse::<RiskLevel>().ok())
        .ok_or_else(|| TierError::InvalidOutput("invalid `nivel_riesgo`".into()))?;
    let risk_factors = string_list(&object["factores_riesgo"], "factores_riesgo")?;
    let recommendations = string_list(&object["recomendaciones"], "recomendaciones")?;
    let breakdown = parse_breakdown(&object["puntuacion_detallada"])?;

    Ok(RiskAssessment {
        probability,
        level,
        risk_factors,
        recommendations,
        breakdown,
        source: AssessmentSource::Generative,
    })
}

fn parse_breakdown(value: &Value) -> Result<ScoreBreakdown, TierError> {
    let object: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| TierError::InvalidOutput("`puntuacion_detallada` is not an object".into()))?;
    if let Some(missing) = BREAKDOWN_KEYS.iter().find(|key| !object.contains_key(**key)) {
        return Err(TierError::InvalidOutput(format!(
            "missing key `puntuacion_detallada.{missing}`"
        )));
    }
    Ok(ScoreBreakdown {
        diagnostic_coherence: score_value(&object[BREAKDOWN_KEYS[0]], BREAKDOWN_KEYS[0])?,
        medical_justification: score_value(&object[BREAKDOWN_KEYS[1]], BREAKDOWN_KEYS[1])?,
        regulatory_compliance: score_value(&object[BREAKDOWN_KEYS[2]], BREAKDOWN_KEYS[2])?,
        documentation_quality: score_value(&object[BREAKDOWN_KEYS[3]], BREAKDOWN_KEYS[3])?,
    })
}

fn score_value(value: &Value, key: &str) -> Result<u8, TierError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
    .ok_or_else(|| TierError::InvalidOutput(format!("`{key}` is not a number")))?;

    if !(0.0..=100.0).contains(&number) {
        return Err(TierError::InvalidOutput(format!(
            "`{key}` is outside 0..=100: {number}"
        )));
    }
    Ok(number.round() as u8)
}

fn string_list(value: &Value, key: &str) -> Result<Vec<String>, TierError> {
    let items = value
        .as_array()
        .ok_or_else(|| TierError::InvalidOutput(format!("`{key}` is not a list")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|text| text.trim().to_string())
                .ok_or_else(|| TierError::InvalidOutput(format!("`{key}` holds a non-string")))
        })
        .collect()
}

/// Generation-backed scoring tier.
pub struct GenerativeRiskModel {
    client: Arc<dyn GenerationClient + Send + Sync>,
    model: String,
    excerpt_chars: usize,
    max_tokens: u32,
    temperature: f32,
}

impl GenerativeRiskModel {
    /// Build the tier over `client`, sending the first `excerpt_chars` of each document.
    pub fn new(
        client: Arc<dyn GenerationClient + Send + Sync>,
        model: impl Into<String>,
        excerpt_chars: usize,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            excerpt_chars,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl RiskTier for GenerativeRiskModel {
    fn name(&self) -> &'static str {
        AssessmentSource::Generative.as_str()
    }

    async fn attempt(&self, case: &GlosaCase) -> Result<RiskAssessment, TierError> {
        let prompt = build_audit_prompt(
            excerpt(&case.invoice_text, self.excerpt_chars),
            excerpt(&case.clinical_text, self.excerpt_chars),
        );
        let request = GenerationRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(AUDITOR_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: self.temperature,
        };
        let raw = self.client.generate(request).await?;
        tracing::debug!(model = %self.model, chars = raw.len(), "Audit response received");
        parse_audit_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "probabilidad": 82,
        "nivel_riesgo": "ALTO",
        "factores_riesgo": ["CUPS sin soporte"],
        "recomendaciones": ["Anexar soporte"],
        "puntuacion_detallada": {
            "coherencia_diagnostica": 20,
            "justificacion_medica": 35.6,
            "cumplimiento_normativo": "40",
            "calidad_documental": 88
        }
    }"#;

    #[test]
    fn excerpt_counts_characters() {
        assert_eq!(excerpt("ñandú", 3), "ñan");
        assert_eq!(excerpt("abc", 10), "abc");
        assert_eq!(excerpt("abc", 0), "");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = format!("Aquí está el análisis:\n```json\n{VALID}\n```");
        let assessment = parse_audit_response(&raw).expect("parsed");
        assert_eq!(assessment.probability, 82);
        assert_eq!(assessment.level, RiskLevel::High);
        assert_eq!(assessment.risk_factors, vec!["CUPS sin soporte".to_string()]);
        assert_eq!(assessment.breakdown.medical_justification, 36);
        assert_eq!(assessment.breakdown.regulatory_compliance, 40);
        assert_eq!(assessment.breakdown.documentation_quality, 88);
        assert_eq!(assessment.source, AssessmentSource::Generative);
    }

    #[test]
    fn rejects_prose_and_missing_keys() {
        assert!(matches!(
            parse_audit_response("No puedo analizar estos documentos."),
            Err(TierError::InvalidOutput(_))
        ));
        let missing = VALID.replace("\"recomendaciones\"", "\"otras\"");
        let err = parse_audit_response(&missing).expect_err("missing key");
        assert!(err.to_string().contains("recomendaciones"));
    }

    #[test]
    fn rejects_scores_outside_range() {
        let above = VALID.replace("\"calidad_documental\": 88", "\"calidad_documental\": 130");
        let err = parse_audit_response(&above).expect_err("score above 100");
        assert!(err.to_string().contains("calidad_documental"));

        let below = VALID.replace("\"probabilidad\": 82", "\"probabilidad\": -5");
        let err = parse_audit_response(&below).expect_err("negative probability");
        assert!(err.to_string().contains("probabilidad"));

        let edge = VALID.replace("\"probabilidad\": 82", "\"probabilidad\": 100");
        assert_eq!(parse_audit_response(&edge).expect("upper bound").probability, 100);
    }

    #[test]
    fn rejects_unknown_level() {
        let invalid = VALID.replace("ALTO", "CRITICO");
        assert!(parse_audit_response(&invalid).is_err());
    }
}
