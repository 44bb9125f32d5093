use crate::domain::analysis::{Recommendation, RiskAssessment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    pub symbol: String,
    pub company_name: String,
    pub overall_score: f64,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub risk_assessment: RiskAssessment,
    pub detail_url: String,
}
