use anyhow::Context;
use chrono::NaiveDate;
use kabuscan_core::analysis::AnalysisClient;
use kabuscan_core::dispatch::{self, BatchOptions};
use kabuscan_core::domain::ranking::RankedResult;
use kabuscan_core::notify::{Notifier, RunSummary};
use kabuscan_core::rank::{self, DetailLink, DEFAULT_TOP_COUNT};
use kabuscan_core::source::CatalogSource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to do when the batch was cut short by cancellation or its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialPolicy {
    /// Skip notification; readers only ever see a ranking over the full catalog.
    Abort,
    /// Rank and deliver whatever finished.
    Notify,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch: BatchOptions,
    pub top_count: usize,
    pub partial_policy: PartialPolicy,
    pub detail_link: DetailLink,
    pub as_of_date: NaiveDate,
}

impl RunOptions {
    /// Defaults overridable by BATCH_MAX_WORKERS, BATCH_TIMEOUT_SECS, TOP_COUNT,
    /// DETAIL_URL_TEMPLATE.
    pub fn from_env(as_of_date: NaiveDate) -> anyhow::Result<Self> {
        let mut batch = BatchOptions::default();

        if let Ok(s) = std::env::var("BATCH_MAX_WORKERS") {
            if let Ok(n) = s.parse::<usize>() {
                batch.max_workers = n;
            }
        }

        if let Ok(s) = std::env::var("BATCH_TIMEOUT_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                batch.batch_timeout = Some(Duration::from_secs(n));
            }
        }

        let top_count = std::env::var("TOP_COUNT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_TOP_COUNT);

        Ok(Self {
            batch,
            top_count,
            partial_policy: PartialPolicy::Abort,
            detail_link: DetailLink::from_env()?,
            as_of_date,
        })
    }
}

impl RunOptions {
    pub fn validate(&self, per_call_timeout: Option<Duration>) -> anyhow::Result<()> {
        anyhow::ensure!(self.top_count >= 1, "top count must be >= 1 (got 0)");
        self.batch
            .validate(per_call_timeout)
            .context("invalid batch options")
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub ranked: Vec<RankedResult>,
    pub analyzed: usize,
    pub failed: usize,
    pub delivered: bool,
}

/// One end-to-end run: catalog -> batch analysis -> ranking -> notification.
/// `notifier = None` stops after logging the ranking.
pub async fn run_once(
    source: &dyn CatalogSource,
    client: Arc<dyn AnalysisClient>,
    notifier: Option<&dyn Notifier>,
    opts: &RunOptions,
    cancel: CancellationToken,
) -> anyhow::Result<RunReport> {
    opts.validate(None)?;

    let records = source
        .load_records()
        .await
        .with_context(|| format!("load catalog failed (source={})", source.source_name()))?;

    tracing::info!(
        source = source.source_name(),
        records = records.len(),
        max_workers = opts.batch.max_workers,
        "catalog loaded; dispatching analysis batch"
    );

    let batch = dispatch::run_batch(client, records, &opts.batch, cancel).await?;

    if !batch.is_complete() {
        match opts.partial_policy {
            PartialPolicy::Abort => anyhow::bail!(
                "analysis batch cut short ({} of {} outcomes); not notifying",
                batch.outcomes.len(),
                batch.total
            ),
            PartialPolicy::Notify => tracing::warn!(
                outcomes = batch.outcomes.len(),
                total = batch.total,
                "analysis batch cut short; ranking partial results"
            ),
        }
    }

    let ranked = rank::top_n(&batch.outcomes, opts.top_count, &opts.detail_link);
    let summary = RunSummary {
        as_of_date: opts.as_of_date,
        analyzed: batch.outcomes.len(),
        failed: batch.failure_count(),
    };

    anyhow::ensure!(
        !ranked.is_empty(),
        "no successful analyses among {} outcomes; nothing to notify",
        batch.outcomes.len()
    );

    // Logged before delivery so the ranking survives a webhook failure.
    for r in &ranked {
        tracing::info!(
            rank = r.rank,
            symbol = %r.symbol,
            name = %r.company_name,
            score = r.overall_score,
            confidence = r.confidence,
            recommendation = r.recommendation.as_str(),
            risk = r.risk_assessment.as_str(),
            "ranked"
        );
    }

    let mut delivered = false;
    if let Some(notifier) = notifier {
        notifier
            .notify(&summary, &ranked)
            .await
            .with_context(|| format!("notification failed (channel={})", notifier.channel_name()))?;
        delivered = true;
    }

    Ok(RunReport {
        ranked,
        analyzed: summary.analyzed,
        failed: summary.failed,
        delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabuscan_core::analysis::error::{AnalysisError, AnalysisErrorKind};
    use kabuscan_core::domain::analysis::{AnalysisScore, Recommendation, RiskAssessment};
    use kabuscan_core::domain::stock::StockRecord;
    use kabuscan_core::notify::{NotifyError, NotifyErrorKind};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticCatalog(Vec<StockRecord>);

    #[async_trait::async_trait]
    impl CatalogSource for StaticCatalog {
        fn source_name(&self) -> &'static str {
            "static"
        }

        async fn load_records(&self) -> anyhow::Result<Vec<StockRecord>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenCatalog;

    #[async_trait::async_trait]
    impl CatalogSource for BrokenCatalog {
        fn source_name(&self) -> &'static str {
            "broken"
        }

        async fn load_records(&self) -> anyhow::Result<Vec<StockRecord>> {
            anyhow::bail!("disk on fire")
        }
    }

    struct TableClient {
        scores: HashMap<&'static str, (f64, f64)>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl AnalysisClient for TableClient {
        async fn analyze(&self, symbol: &str) -> Result<AnalysisScore, AnalysisError> {
            tokio::time::sleep(self.delay).await;
            match self.scores.get(symbol) {
                Some((s, c)) => Ok(AnalysisScore {
                    overall_score: *s,
                    confidence: *c,
                    recommendation: Recommendation::Hold,
                    risk_assessment: RiskAssessment::Low,
                }),
                None => Err(AnalysisError::new(symbol, AnalysisErrorKind::Rejected, "no data")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(RunSummary, Vec<RankedResult>)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        fn channel_name(&self) -> &'static str {
            "recording"
        }

        async fn notify(
            &self,
            summary: &RunSummary,
            results: &[RankedResult],
        ) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::new(NotifyErrorKind::HttpStatus(500), "down"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((summary.clone(), results.to_vec()));
            Ok(())
        }
    }

    fn catalog(codes: &[&str]) -> StaticCatalog {
        StaticCatalog(
            codes
                .iter()
                .map(|c| StockRecord::new(*c, format!("Co {c}"), "Prime", "N/A", "").unwrap())
                .collect(),
        )
    }

    fn client(delay: Duration) -> Arc<dyn AnalysisClient> {
        Arc::new(TableClient {
            scores: HashMap::from([("7203.T", (0.8, 0.9)), ("6758.T", (0.8, 0.95))]),
            delay,
        })
    }

    fn opts(top_count: usize) -> RunOptions {
        RunOptions {
            batch: BatchOptions {
                max_workers: 2,
                batch_timeout: None,
            },
            top_count,
            partial_policy: PartialPolicy::Abort,
            detail_link: DetailLink::default(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        }
    }

    #[tokio::test]
    async fn ranks_and_delivers() {
        let notifier = RecordingNotifier::default();
        let report = run_once(
            &catalog(&["7203", "6758", "9999"]),
            client(Duration::ZERO),
            Some(&notifier),
            &opts(2),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.delivered);
        assert_eq!(report.analyzed, 3);
        assert_eq!(report.failed, 1);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let symbols: Vec<_> = sent[0].1.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, ["6758.T", "7203.T"]);
        assert_eq!(sent[0].0.failed, 1);
    }

    #[tokio::test]
    async fn dry_run_ranks_without_delivering() {
        let report = run_once(
            &catalog(&["7203", "6758"]),
            client(Duration::ZERO),
            None,
            &opts(1),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!report.delivered);
        assert_eq!(report.ranked.len(), 1);
        assert_eq!(report.ranked[0].symbol, "6758.T");
    }

    #[tokio::test]
    async fn zero_successes_is_fatal_and_sends_nothing() {
        let notifier = RecordingNotifier::default();
        let res = run_once(
            &catalog(&["1111", "2222"]),
            client(Duration::ZERO),
            Some(&notifier),
            &opts(5),
            CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_top_count_is_rejected_before_loading() {
        let err = run_once(
            &BrokenCatalog,
            client(Duration::ZERO),
            None,
            &opts(0),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("top count"), "{err:#}");
    }

    #[tokio::test]
    async fn source_failure_aborts_before_dispatch() {
        let err = run_once(
            &BrokenCatalog,
            client(Duration::ZERO),
            None,
            &opts(5),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("source=broken"));
    }

    #[tokio::test]
    async fn partial_batch_is_not_notified_by_default() {
        let notifier = RecordingNotifier::default();
        let mut o = opts(5);
        o.batch.max_workers = 1;
        o.batch.batch_timeout = Some(Duration::from_millis(80));

        let res = run_once(
            &catalog(&["7203", "6758", "7203", "6758", "7203"]),
            client(Duration::from_millis(50)),
            Some(&notifier),
            &o,
            CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_batch_can_be_notified_when_allowed() {
        let notifier = RecordingNotifier::default();
        let mut o = opts(5);
        o.batch.max_workers = 1;
        o.batch.batch_timeout = Some(Duration::from_millis(80));
        o.partial_policy = PartialPolicy::Notify;

        let report = run_once(
            &catalog(&["7203", "6758", "7203", "6758", "7203"]),
            client(Duration::from_millis(50)),
            Some(&notifier),
            &o,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(report.delivered);
        assert!(report.analyzed < 5);
    }

    #[tokio::test]
    async fn delivery_failure_is_fatal() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let err = run_once(
            &catalog(&["7203"]),
            client(Duration::ZERO),
            Some(&notifier),
            &opts(5),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("channel=recording"));
    }
}
