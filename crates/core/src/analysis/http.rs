use crate::analysis::error::{AnalysisError, AnalysisErrorKind};
use crate::analysis::AnalysisClient;
use crate::config::Settings;
use crate::domain::analysis::{AnalysisScore, Recommendation, RiskAssessment};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PATH_TEMPLATE: &str = "/api/v1/analysis/{symbol}";

#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
    path_template: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<EnvelopeData>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    integrated_score: Option<IntegratedScore>,
}

#[derive(Debug, Deserialize)]
struct IntegratedScore {
    overall_score: f64,
    confidence_level: f64,
    recommendation: Recommendation,
    risk_assessment: RiskAssessment,
}

impl HttpAnalysisClient {
    pub fn new(
        base_url: impl Into<String>,
        path_template: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let path_template = path_template.into();
        anyhow::ensure!(
            path_template.contains("{symbol}"),
            "analysis path template must contain {{symbol}} (got {path_template})"
        );
        anyhow::ensure!(!timeout.is_zero(), "analysis timeout must be > 0");

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build analysis http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            path_template,
            timeout,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_analysis_api_base_url()?.to_string();

        let timeout_secs = std::env::var("ANALYSIS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let path_template = std::env::var("ANALYSIS_PATH_TEMPLATE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH_TEMPLATE.to_string());

        Self::new(base_url, path_template, Duration::from_secs(timeout_secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, symbol: &str) -> String {
        let path = self.path_template.replace("{symbol}", symbol);
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetches the raw backend envelope for `symbol`. Transport, status, and JSON failures are
    /// errors; `success=false` is not, so proxies can forward it untouched.
    pub async fn fetch_envelope(&self, symbol: &str) -> Result<Value, AnalysisError> {
        let res = self
            .http
            .get(self.url(symbol))
            .send()
            .await
            .map_err(|e| AnalysisError::from_reqwest(symbol, &e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| AnalysisError::from_reqwest(symbol, &e))?;

        if !status.is_success() {
            return Err(AnalysisError::new(
                symbol,
                AnalysisErrorKind::HttpStatus(status.as_u16()),
                truncate(&text, 200),
            ));
        }

        serde_json::from_str::<Value>(&text).map_err(|e| {
            AnalysisError::new(
                symbol,
                AnalysisErrorKind::Decode,
                format!("response is not valid JSON: {e}"),
            )
        })
    }
}

#[async_trait::async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, symbol: &str) -> Result<AnalysisScore, AnalysisError> {
        let raw = self.fetch_envelope(symbol).await?;
        parse_envelope(symbol, raw)
    }
}

pub fn parse_envelope(symbol: &str, raw: Value) -> Result<AnalysisScore, AnalysisError> {
    let envelope = serde_json::from_value::<Envelope>(raw).map_err(|e| {
        AnalysisError::new(
            symbol,
            AnalysisErrorKind::Decode,
            format!("unexpected envelope shape: {e}"),
        )
    })?;

    if !envelope.success {
        let detail = envelope
            .message
            .or_else(|| envelope.error.map(|e| e.to_string()))
            .unwrap_or_else(|| "backend reported success=false".to_string());
        return Err(AnalysisError::new(symbol, AnalysisErrorKind::Rejected, detail));
    }

    let score = envelope
        .data
        .and_then(|d| d.integrated_score)
        .ok_or_else(|| {
            AnalysisError::new(
                symbol,
                AnalysisErrorKind::Decode,
                "missing data.integrated_score",
            )
        })?;

    // -0.0 + 0.0 is +0.0, so a signed zero cannot sort below a plain zero downstream.
    let overall_score = score.overall_score + 0.0;
    let confidence = score.confidence_level + 0.0;

    for (field, v) in [("overall_score", overall_score), ("confidence_level", confidence)] {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(AnalysisError::new(
                symbol,
                AnalysisErrorKind::Decode,
                format!("{field} must be between 0 and 1 (got {v})"),
            ));
        }
    }

    Ok(AnalysisScore {
        overall_score,
        confidence,
        recommendation: score.recommendation,
        risk_assessment: score.risk_assessment,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
