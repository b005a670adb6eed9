use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use stockpipe_core::ingest::provider::DailySeriesFetcher;
use stockpipe_core::pipeline::{self, RunOptions, RunReport};
use stockpipe_core::storage::quotes::{PgQuoteStore, QuoteStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod dry_run;

const RUN_LOCK_NAME: &str = "stock_data_pipeline";

#[derive(Debug, Parser)]
#[command(name = "stockpipe_worker")]
struct Args {
    /// Comma-separated tickers. Overrides STOCK_SYMBOLS.
    #[arg(long)]
    symbols: Option<String>,

    /// Symbols processed at once. Overrides PIPELINE_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Fetch and normalize, but never touch the database.
    #[arg(long)]
    dry_run: bool,
}

fn clamp_concurrency(n: usize) -> usize {
    n.clamp(1, stockpipe_core::config::MAX_PIPELINE_CONCURRENCY)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = stockpipe_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(symbols) = args.symbols.as_deref() {
        settings.symbols = stockpipe_core::config::parse_symbols(Some(symbols));
        anyhow::ensure!(!settings.symbols.is_empty(), "--symbols yielded no symbols");
    }
    if let Some(n) = args.concurrency {
        settings.pipeline_concurrency = clamp_concurrency(n);
    }

    let run_id = uuid::Uuid::new_v4();

    // Missing credential is a configuration error: fail before any work.
    let fetcher = Arc::new(DailySeriesFetcher::from_settings(&settings)?);
    let options = RunOptions {
        concurrency: settings.pipeline_concurrency,
        fetch_deadline: settings.fetch_deadline,
    };

    tracing::info!(
        %run_id,
        symbols = ?settings.symbols,
        concurrency = options.concurrency,
        provider = fetcher.provider_name(),
        dry_run = args.dry_run,
        "starting quote ingestion"
    );

    if args.dry_run {
        let store: Arc<dyn QuoteStore> = Arc::new(dry_run::DryRunStore);
        let report = pipeline::run_all(fetcher, store, &settings.symbols, options).await;
        return finish(report);
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    stockpipe_core::storage::migrate(&pool).await?;

    let Some(lock) = stockpipe_core::storage::lock::RunLock::try_acquire(&pool, RUN_LOCK_NAME).await?
    else {
        tracing::warn!("run lock not acquired; another ingestion run in progress");
        return Ok(());
    };
    tracing::debug!(key = lock.key(), "run lock acquired");

    let store: Arc<dyn QuoteStore> = Arc::new(PgQuoteStore::new(pool.clone(), settings.upsert_batch));
    let report = pipeline::run_all(fetcher, store, &settings.symbols, options).await;

    for outcome in report.outcomes.iter().filter(|o| o.result.is_ok()) {
        match stockpipe_core::storage::quotes::count_rows(&pool, &outcome.symbol).await {
            Ok(total) => tracing::debug!(symbol = %outcome.symbol, total, "stock_data rows for symbol"),
            Err(err) => tracing::warn!(symbol = %outcome.symbol, error = %err, "row count failed"),
        }
    }

    if let Err(err) = lock.release().await {
        tracing::warn!(error = %err, "run lock release failed");
    }

    finish(report)
}

fn finish(report: RunReport) -> anyhow::Result<()> {
    for (_, err) in report.failures() {
        sentry_anyhow::capture_anyhow(err);
    }

    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        rows = report.rows_written(),
        "quote ingestion finished"
    );

    anyhow::ensure!(
        report.failed() == 0,
        "{} of {} symbols failed",
        report.failed(),
        report.outcomes.len()
    );
    Ok(())
}

fn init_sentry(settings: &stockpipe_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
