//! Ordered fallback chain over the scoring tiers.

use crate::glosa::types::{
    AssessmentSource, GlosaCase, RiskAssessment, RiskLevel, ScoreBreakdown, TierError,
};
use async_trait::async_trait;

/// One strategy in the scoring chain.
#[async_trait]
pub trait RiskTier: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Score `case`, or fail so the next tier runs.
    async fn attempt(&self, case: &GlosaCase) -> Result<RiskAssessment, TierError>;
}

/// Final, infallible tier: a neutral assessment asking for manual review.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticDefault;

impl StaticDefault {
    /// The fixed assessment.
    pub fn assessment(&self) -> RiskAssessment {
        RiskAssessment {
            probability: 50,
            level: RiskLevel::Medium,
            risk_factors: vec!["Error en el análisis".into(), "Revisar documentos".into()],
            recommendations: vec![
                "Revisar manualmente la factura y la historia clínica".into(),
                "Verificar la coherencia de códigos CUPS, CIE y fechas de atención".into(),
            ],
            breakdown: ScoreBreakdown::uniform(50),
            source: AssessmentSource::StaticDefault,
        }
    }
}

/// Runs tiers in priority order and returns the first success.
pub struct RiskDispatcher {
    tiers: Vec<Box<dyn RiskTier>>,
    fallback: StaticDefault,
}

impl RiskDispatcher {
    /// Chain `tiers` in the given order, ending with [`StaticDefault`].
    pub fn new(tiers: Vec<Box<dyn RiskTier>>) -> Self {
        Self {
            tiers,
            fallback: StaticDefault,
        }
    }

    /// Labels of the configured tiers, in order.
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Score `case`. Never fails; tier errors are logged and absorbed.
    pub async fn assess(&self, case: &GlosaCase) -> RiskAssessment {
        for tier in &self.tiers {
            match tier.attempt(case).await {
                Ok(assessment) => {
                    tracing::info!(
                        tier = tier.name(),
                        probability = assessment.probability,
                        level = %assessment.level,
                        "Glosa risk assessed"
                    );
                    return assessment;
                }
                Err(error) => {
                    tracing::warn!(tier = tier.name(), error = %error, "Risk tier failed; falling back");
                }
            }
        }
        tracing::warn!("All risk tiers failed; returning static default");
        self.fallback.assessment()
    }
}
