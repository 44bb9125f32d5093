pub mod error;
pub mod http;

use crate::analysis::error::AnalysisError;
use crate::domain::analysis::AnalysisScore;

/// One backend call per symbol. Implementations must not retry and must return within their
/// own per-call deadline; batch-level cancellation drops the future.
#[async_trait::async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, symbol: &str) -> Result<AnalysisScore, AnalysisError>;
}
