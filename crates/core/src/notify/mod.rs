pub mod discord;

use crate::domain::ranking::RankedResult;
use chrono::NaiveDate;
use std::fmt;

/// Batch facts shown around the ranking.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub as_of_date: NaiveDate,
    pub analyzed: usize,
    pub failed: usize,
}

/// Delivers a ranking once. Implementations reject empty input before any I/O and never retry.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel_name(&self) -> &'static str;

    async fn notify(&self, summary: &RunSummary, results: &[RankedResult])
        -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyErrorKind {
    EmptyInput,
    Encode,
    Transport,
    HttpStatus(u16),
}

#[derive(Debug, Clone)]
pub struct NotifyError {
    pub kind: NotifyErrorKind,
    pub detail: String,
}

impl NotifyError {
    pub fn new(kind: NotifyErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NotifyErrorKind::EmptyInput => write!(f, "notify error (empty input): {}", self.detail),
            NotifyErrorKind::Encode => write!(f, "notify error (encode): {}", self.detail),
            NotifyErrorKind::Transport => write!(f, "notify error (transport): {}", self.detail),
            NotifyErrorKind::HttpStatus(status) => {
                write!(f, "notify error (status={status}): {}", self.detail)
            }
        }
    }
}

impl std::error::Error for NotifyError {}
