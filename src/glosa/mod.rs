//! Glosa risk scoring: a heuristic model, a generative audit, and a static default, tried in
//! that order.

pub mod dispatcher;
pub mod generative;
pub mod heuristic;
pub mod types;

pub use dispatcher::{RiskDispatcher, RiskTier, StaticDefault};
pub use generative::GenerativeRiskModel;
pub use heuristic::HeuristicRiskModel;
pub use types::{
    AssessmentSource, GlosaCase, GlosaError, RiskAssessment, RiskLevel, ScoreBreakdown, TierError,
    ValidationReport, ValidationResult,
};
