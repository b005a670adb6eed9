use crate::ingest::error::{FetchError, FetchErrorKind};
use crate::ingest::loader;
use crate::ingest::provider::DailySeriesFetcher;
use crate::storage::quotes::QuoteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub concurrency: usize,
    pub fetch_deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            fetch_deadline: None,
        }
    }
}

#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub result: anyhow::Result<u64>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<SymbolOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn rows_written(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &anyhow::Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.symbol.as_str(), e)))
    }
}

/// Fetch then load for one symbol. The payload is handed straight from the
/// fetcher to the loader.
pub async fn run_symbol<S>(
    fetcher: &DailySeriesFetcher,
    store: &S,
    symbol: &str,
    fetch_deadline: Option<Duration>,
) -> anyhow::Result<u64>
where
    S: QuoteStore + ?Sized,
{
    let payload = match fetch_deadline {
        Some(deadline) => tokio::time::timeout(deadline, fetcher.fetch(symbol))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::new(
                    symbol,
                    FetchErrorKind::DeadlineExceeded { deadline },
                ))
            })?,
        None => fetcher.fetch(symbol).await?,
    };

    loader::load(store, symbol, Some(&payload)).await
}

/// Runs every symbol's pipeline in its own task, at most `concurrency` at a
/// time. One symbol failing, or panicking, does not affect the others.
pub async fn run_all(
    fetcher: Arc<DailySeriesFetcher>,
    store: Arc<dyn QuoteStore>,
    symbols: &[String],
    options: RunOptions,
) -> RunReport {
    let permits = Arc::new(Semaphore::new(
        options.concurrency.clamp(1, Semaphore::MAX_PERMITS),
    ));
    let mut handles = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let fetcher = fetcher.clone();
        let store = store.clone();
        let permits = permits.clone();
        let task_symbol = symbol.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| anyhow::anyhow!("pipeline semaphore closed: {e}"))?;
            run_symbol(&fetcher, store.as_ref(), &task_symbol, options.fetch_deadline).await
        });
        handles.push((symbol.clone(), handle));
    }

    let mut report = RunReport::default();
    for (symbol, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::anyhow!("[{symbol}] pipeline task failed: {join_err}")),
        };
        match &result {
            Ok(rows) => tracing::info!(%symbol, rows, "symbol pipeline succeeded"),
            Err(err) => tracing::error!(%symbol, error = %format!("{err:#}"), "symbol pipeline failed"),
        }
        report.outcomes.push(SymbolOutcome { symbol, result });
    }
    report
}
