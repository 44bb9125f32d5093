use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use kabuscan_core::analysis::http::HttpAnalysisClient;
use kabuscan_core::analysis::AnalysisClient;
use kabuscan_core::notify::discord::DiscordWebhook;
use kabuscan_core::notify::Notifier;
use kabuscan_core::source::csv::CsvCatalog;
use kabuscan_core::source::sqlite::SqliteCatalog;
use kabuscan_core::source::CatalogSource;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod import;
mod pipeline;

use pipeline::{PartialPolicy, RunOptions};

#[derive(Debug, Parser)]
#[command(name = "kabuscan_worker", args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze the catalog, rank it, and post the Top-N to Discord (default).
    Run(RunArgs),
    /// Load a CSV catalog into the SQLite catalog.
    Import {
        /// CSV file to import. Defaults to STOCK_CSV_PATH.
        #[arg(long)]
        csv_path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Csv,
    Db,
}

#[derive(Debug, Clone, ClapArgs)]
struct RunArgs {
    /// Catalog to read symbols from. Defaults to CATALOG_SOURCE, then csv.
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// CSV catalog path. Defaults to STOCK_CSV_PATH.
    #[arg(long)]
    csv_path: Option<PathBuf>,

    /// Only analyze companies of this market segment (db source only).
    #[arg(long)]
    market: Option<String>,

    /// Maximum concurrent analysis calls. Defaults to BATCH_MAX_WORKERS, then 5.
    #[arg(long)]
    workers: Option<usize>,

    /// Number of ranked results to post. Defaults to TOP_COUNT, then 10.
    #[arg(long)]
    top: Option<usize>,

    /// Deadline for the whole batch. Defaults to BATCH_TIMEOUT_SECS, else unbounded.
    #[arg(long)]
    batch_timeout_secs: Option<u64>,

    /// Market as-of date (YYYY-MM-DD) shown in the message. Defaults to the latest closed
    /// TSE session.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Post a ranking even when the batch was cut short.
    #[arg(long)]
    allow_partial: bool,

    /// Do everything except posting to Discord.
    #[arg(long)]
    dry_run: bool,

    /// Repeat the run every N minutes until Ctrl-C.
    #[arg(long)]
    every_mins: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = kabuscan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Some(Command::Import { csv_path }) => run_import(&settings, csv_path).await,
        Some(Command::Run(run)) => run_scheduled(&settings, run).await,
        None => run_scheduled(&settings, args.run).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker failed");
    }
    res
}

async fn run_import(
    settings: &kabuscan_core::config::Settings,
    csv_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let csv_path = resolve_csv_path(settings, csv_path)?;
    let pool = kabuscan_core::storage::connect(settings.require_database_url()?).await?;
    kabuscan_core::storage::migrate(&pool).await?;

    let affected = import::import_csv(&pool, &csv_path).await?;
    tracing::info!(affected, "catalog import finished");
    Ok(())
}

async fn run_scheduled(
    settings: &kabuscan_core::config::Settings,
    args: RunArgs,
) -> anyhow::Result<()> {
    let source = build_source(settings, &args).await?;

    let http_client = HttpAnalysisClient::from_settings(settings)?;
    let per_call_timeout = http_client.timeout();
    let client: Arc<dyn AnalysisClient> = Arc::new(http_client);

    let notifier: Option<Box<dyn Notifier>> = if args.dry_run {
        None
    } else {
        Some(Box::new(DiscordWebhook::from_settings(settings)?))
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("ctrl-c received; cancelling in-flight work");
            on_signal.cancel();
        }
    });

    let Some(every_mins) = args.every_mins else {
        let opts = build_run_options(&args, per_call_timeout)?;
        return run_one(source.as_ref(), client, notifier.as_deref(), &opts, cancel).await;
    };

    anyhow::ensure!(every_mins >= 1, "--every-mins must be >= 1");
    let mut interval = tokio::time::interval(Duration::from_secs(every_mins * 60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Re-resolved per tick so the as-of date follows the calendar.
        let opts = build_run_options(&args, per_call_timeout)?;
        let res = run_one(
            source.as_ref(),
            Arc::clone(&client),
            notifier.as_deref(),
            &opts,
            cancel.clone(),
        )
        .await;
        if let Err(err) = res {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), "scheduled run failed; waiting for next tick");
        }
    }

    tracing::info!("scheduler stopped");
    Ok(())
}

async fn run_one(
    source: &dyn CatalogSource,
    client: Arc<dyn AnalysisClient>,
    notifier: Option<&dyn Notifier>,
    opts: &RunOptions,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, as_of_date = %opts.as_of_date);

    let report = pipeline::run_once(source, client, notifier, opts, cancel)
        .instrument(span.clone())
        .await?;

    span.in_scope(|| {
        tracing::info!(
            ranked = report.ranked.len(),
            analyzed = report.analyzed,
            failed = report.failed,
            delivered = report.delivered,
            dry_run = notifier.is_none(),
            "run finished"
        );
    });
    Ok(())
}

async fn build_source(
    settings: &kabuscan_core::config::Settings,
    args: &RunArgs,
) -> anyhow::Result<Box<dyn CatalogSource>> {
    let kind = match args.source {
        Some(kind) => kind,
        None => match std::env::var("CATALOG_SOURCE").ok().as_deref() {
            Some("db") | Some("sqlite") => SourceKind::Db,
            Some("csv") | None => SourceKind::Csv,
            Some(other) => anyhow::bail!("CATALOG_SOURCE must be csv or db (got {other})"),
        },
    };

    match kind {
        SourceKind::Csv => {
            let path = resolve_csv_path(settings, args.csv_path.clone())?;
            Ok(Box::new(CsvCatalog::new(path)))
        }
        SourceKind::Db => {
            let pool = kabuscan_core::storage::connect(settings.require_database_url()?).await?;
            kabuscan_core::storage::migrate(&pool).await?;
            let catalog = SqliteCatalog::new(pool);
            Ok(Box::new(match &args.market {
                Some(market) => catalog.with_market(market.clone()),
                None => catalog,
            }))
        }
    }
}

fn build_run_options(args: &RunArgs, per_call_timeout: Duration) -> anyhow::Result<RunOptions> {
    let as_of_date = kabuscan_core::time::jp_market::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
    )?;

    let mut opts = RunOptions::from_env(as_of_date)?;
    if let Some(n) = args.workers {
        opts.batch.max_workers = n;
    }
    if let Some(secs) = args.batch_timeout_secs {
        opts.batch.batch_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(n) = args.top {
        opts.top_count = n;
    }
    if args.allow_partial {
        opts.partial_policy = PartialPolicy::Notify;
    }

    opts.validate(Some(per_call_timeout))?;
    Ok(opts)
}

fn resolve_csv_path(
    settings: &kabuscan_core::config::Settings,
    arg: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    match arg {
        Some(p) => Ok(p),
        None => Ok(PathBuf::from(settings.require_stock_csv_path()?)),
    }
}

fn init_sentry(settings: &kabuscan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
