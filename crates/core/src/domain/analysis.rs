use crate::analysis::error::AnalysisError;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    Unknown,
}

impl Recommendation {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "STRONG_BUY" => Self::StrongBuy,
            "BUY" => Self::Buy,
            "HOLD" | "NEUTRAL" => Self::Hold,
            "SELL" => Self::Sell,
            "STRONG_SELL" => Self::StrongSell,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl<'de> Deserialize<'de> for Recommendation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAssessment {
    Low,
    Moderate,
    High,
    Unknown,
}

impl RiskAssessment {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Self::Low,
            "MODERATE" | "MEDIUM" => Self::Moderate,
            "HIGH" => Self::High,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl<'de> Deserialize<'de> for RiskAssessment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Score payload extracted from `data.integrated_score` of a successful backend envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisScore {
    pub overall_score: f64,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub risk_assessment: RiskAssessment,
}

/// Result of one analysis attempt. `result` holds either the score or the error, never both.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub symbol: String,
    pub company_name: String,
    pub result: Result<AnalysisScore, AnalysisError>,
}

impl AnalysisOutcome {
    pub fn score(&self) -> Option<&AnalysisScore> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        self.result.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
