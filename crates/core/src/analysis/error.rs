use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    /// DNS, connect, or body read failure.
    Transport,
    Timeout,
    HttpStatus(u16),
    /// Body is not the expected JSON envelope.
    Decode,
    /// Envelope arrived with `success=false`.
    Rejected,
}

impl AnalysisErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::HttpStatus(_) => "http_status",
            Self::Decode => "decode",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisError {
    pub symbol: String,
    pub kind: AnalysisErrorKind,
    pub detail: String,
}

impl AnalysisError {
    pub fn new(symbol: &str, kind: AnalysisErrorKind, detail: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn from_reqwest(symbol: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            AnalysisErrorKind::Timeout
        } else if err.is_decode() {
            AnalysisErrorKind::Decode
        } else {
            AnalysisErrorKind::Transport
        };
        Self::new(symbol, kind, err.to_string())
    }

    /// Whether a caller that retries would expect a different answer on a second attempt.
    /// Nothing in this workspace retries; the flag is reported in logs.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            AnalysisErrorKind::Transport | AnalysisErrorKind::Timeout => true,
            AnalysisErrorKind::HttpStatus(status) => status == 429 || status >= 500,
            AnalysisErrorKind::Decode | AnalysisErrorKind::Rejected => false,
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AnalysisErrorKind::HttpStatus(status) => write!(
                f,
                "analysis error (symbol={}, kind=http_status, status={status}): {}",
                self.symbol, self.detail
            ),
            kind => write!(
                f,
                "analysis error (symbol={}, kind={}): {}",
                self.symbol,
                kind.as_str(),
                self.detail
            ),
        }
    }
}

impl std::error::Error for AnalysisError {}
