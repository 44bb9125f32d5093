//! Bounded fan-out of analysis calls over a record list, with full fan-in.
//!
//! `min(max_workers, records.len())` workers pull the next unclaimed index from a shared cursor
//! over the read-only record list, call the `AnalysisClient` once per record, and push the
//! outcome into a mutex-guarded collector. The batch returns when every record has an outcome,
//! or when the cancellation token fires / the batch deadline passes, whichever comes first.

use crate::analysis::error::{AnalysisError, AnalysisErrorKind};
use crate::analysis::AnalysisClient;
use crate::domain::analysis::AnalysisOutcome;
use crate::domain::stock::StockRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Only the first few failures are logged individually; the rest show up in the summary.
const LOGGED_FAILURES: usize = 10;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_workers: usize,
    pub batch_timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            batch_timeout: None,
        }
    }
}

impl BatchOptions {
    /// Rejects option sets under which no record could ever complete.
    pub fn validate(&self, per_call_timeout: Option<Duration>) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_workers >= 1,
            "max_workers must be >= 1 (got {})",
            self.max_workers
        );
        if let (Some(batch), Some(call)) = (self.batch_timeout, per_call_timeout) {
            anyhow::ensure!(
                batch >= call,
                "batch timeout ({batch:?}) must be at least the per-call timeout ({call:?})"
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// Completion order, not input order.
    pub outcomes: Vec<AnalysisOutcome>,
    pub total: usize,
    /// The token fired or the deadline passed before every record finished.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.outcomes.len() == self.total
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }
}

struct Shared {
    records: Vec<StockRecord>,
    cursor: AtomicUsize,
    collected: Mutex<Vec<(usize, AnalysisOutcome)>>,
    failures: AtomicUsize,
}

pub async fn run_batch(
    client: Arc<dyn AnalysisClient>,
    records: Vec<StockRecord>,
    opts: &BatchOptions,
    cancel: CancellationToken,
) -> anyhow::Result<BatchReport> {
    opts.validate(None)?;

    let started = Instant::now();
    let total = records.len();
    let deadline = opts.batch_timeout.map(|t| started + t);
    let workers = opts.max_workers.min(total);

    let shared = Arc::new(Shared {
        records,
        cursor: AtomicUsize::new(0),
        collected: Mutex::new(Vec::with_capacity(total)),
        failures: AtomicUsize::new(0),
    });

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let shared = Arc::clone(&shared);
        let client = Arc::clone(&client);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, shared, client, token, deadline).await;
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "analysis worker task failed");
        }
    }

    let deadline_passed = deadline.is_some_and(|d| Instant::now() >= d);
    let mut collected = std::mem::take(&mut *shared.collected.lock().await);
    let cancelled = collected.len() < total && (cancel.is_cancelled() || deadline_passed);

    if !cancelled && collected.len() < total {
        // A worker died mid-call; account for every record it never reported.
        let mut seen = vec![false; total];
        for (idx, _) in &collected {
            seen[*idx] = true;
        }
        for (idx, record) in shared.records.iter().enumerate() {
            if !seen[idx] {
                let symbol = record.symbol();
                collected.push((
                    idx,
                    AnalysisOutcome {
                        result: Err(AnalysisError::new(
                            &symbol,
                            AnalysisErrorKind::Transport,
                            "worker stopped before reporting an outcome",
                        )),
                        symbol,
                        company_name: record.name.clone(),
                    },
                ));
            }
        }
    }

    let report = BatchReport {
        outcomes: collected.into_iter().map(|(_, o)| o).collect(),
        total,
        cancelled,
        elapsed: started.elapsed(),
    };

    tracing::info!(
        total,
        workers,
        outcomes = report.outcomes.len(),
        successes = report.success_count(),
        failures = report.failure_count(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "analysis batch finished"
    );

    Ok(report)
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    client: Arc<dyn AnalysisClient>,
    token: CancellationToken,
    deadline: Option<Instant>,
) {
    loop {
        if token.is_cancelled() {
            return;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return;
        }

        let idx = shared.cursor.fetch_add(1, Ordering::Relaxed);
        let Some(record) = shared.records.get(idx) else {
            return;
        };
        let symbol = record.symbol();

        let t0 = Instant::now();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = sleep_until_deadline(deadline) => return,
            res = client.analyze(&symbol) => res,
        };

        match &result {
            Ok(score) => {
                tracing::debug!(
                    worker_id,
                    %symbol,
                    score = score.overall_score,
                    confidence = score.confidence,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "analysis succeeded"
                );
            }
            Err(err) => {
                let n = shared.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if n <= LOGGED_FAILURES {
                    tracing::warn!(
                        worker_id,
                        %symbol,
                        kind = err.kind.as_str(),
                        retryable = err.is_retryable(),
                        failure_count = n,
                        error = %err,
                        "analysis failed; recorded and continuing"
                    );
                }
            }
        }

        let outcome = AnalysisOutcome {
            symbol,
            company_name: record.name.clone(),
            result,
        };
        shared.collected.lock().await.push((idx, outcome));
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
