pub mod domain;
pub mod ingest;
pub mod pipeline;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
    pub const DEFAULT_SYMBOL: &str = "IBM";
    const DEFAULT_REQUEST_INTERVAL_SECS: u64 = 15;
    const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_CONCURRENCY: usize = 1;
    /// Upper bound for symbols processed at once.
    pub const MAX_PIPELINE_CONCURRENCY: usize = 64;
    const DEFAULT_UPSERT_BATCH: usize = 500;
    const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub alpha_vantage_base_url: String,
        pub symbols: Vec<String>,
        /// Pacing delay after a successful fetch, and the base of the linear backoff.
        pub request_interval: Duration,
        pub fetch_max_attempts: u32,
        pub fetch_timeout: Duration,
        /// Overall budget for one symbol's fetch, retries and sleeps included.
        pub fetch_deadline: Option<Duration>,
        pub pipeline_concurrency: usize,
        pub upsert_batch: usize,
        pub db_max_connections: u32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let non_blank = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
            let number = |key: &str| non_blank(key).and_then(|s| s.trim().parse::<u64>().ok());

            let symbols = parse_symbols(non_blank("STOCK_SYMBOLS").as_deref());
            anyhow::ensure!(!symbols.is_empty(), "STOCK_SYMBOLS yielded no symbols");

            Ok(Self {
                database_url: non_blank("DATABASE_URL"),
                sentry_dsn: non_blank("SENTRY_DSN"),
                alpha_vantage_api_key: non_blank("ALPHA_VANTAGE_API_KEY"),
                alpha_vantage_base_url: non_blank("ALPHA_VANTAGE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                symbols,
                request_interval: Duration::from_secs(
                    number("REQUEST_INTERVAL_SEC").unwrap_or(DEFAULT_REQUEST_INTERVAL_SECS),
                ),
                fetch_max_attempts: number("FETCH_MAX_ATTEMPTS")
                    .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                    .unwrap_or(DEFAULT_MAX_ATTEMPTS),
                fetch_timeout: Duration::from_secs(
                    number("FETCH_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
                fetch_deadline: number("FETCH_DEADLINE_SECS")
                    .filter(|n| *n > 0)
                    .map(Duration::from_secs),
                pipeline_concurrency: number("PIPELINE_CONCURRENCY")
                    .map(|n| n.clamp(1, MAX_PIPELINE_CONCURRENCY as u64) as usize)
                    .unwrap_or(DEFAULT_CONCURRENCY),
                upsert_batch: number("QUOTES_UPSERT_BATCH")
                    .map(|n| n.max(1) as usize)
                    .unwrap_or(DEFAULT_UPSERT_BATCH),
                db_max_connections: number("DB_MAX_CONNECTIONS")
                    .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                    .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .context("ALPHA_VANTAGE_API_KEY is not set")
        }
    }

    /// Splits a comma-separated ticker list. Blank entries are dropped and
    /// duplicates collapse onto their first occurrence.
    pub fn parse_symbols(raw: Option<&str>) -> Vec<String> {
        let raw = raw.unwrap_or(DEFAULT_SYMBOL);
        let mut out: Vec<String> = Vec::new();
        for part in raw.split(',') {
            let symbol = part.trim().to_ascii_uppercase();
            if symbol.is_empty() || out.contains(&symbol) {
                continue;
            }
            out.push(symbol);
        }
        out
    }

}
