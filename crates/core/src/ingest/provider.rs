use crate::config::Settings;
use crate::domain::quote::DailySeriesPayload;
use crate::ingest::error::{FetchError, FetchErrorKind};
use crate::ingest::retry::{AttemptError, RetryError, RetryPolicy, Sleeper, TokioSleeper};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

const DAILY_SERIES_FUNCTION: &str = "TIME_SERIES_DAILY";
const ERROR_KEY: &str = "Error Message";
const ADVISORY_KEYS: [&str; 2] = ["Note", "Information"];

/// One request/response round trip against the quote API.
#[async_trait::async_trait]
pub trait SeriesTransport: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn get_daily_series(&self, symbol: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct AlphaVantageHttp {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageHttp {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .context("failed to build quote API http client")?;

        Ok(Self {
            http,
            base_url: settings.alpha_vantage_base_url.clone(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl SeriesTransport for AlphaVantageHttp {
    fn provider_name(&self) -> &'static str {
        "alpha_vantage"
    }

    async fn get_daily_series(&self, symbol: &str) -> Result<Value> {
        // reqwest errors carry the full URL, which includes the api key.
        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("function", DAILY_SERIES_FUNCTION),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("quote API request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to read quote API response")?;

        if !status.is_success() {
            anyhow::bail!("quote API HTTP {status}: {}", truncate(&text, 256));
        }

        serde_json::from_str::<Value>(&text).with_context(|| {
            format!(
                "quote API response is not valid JSON: {}",
                truncate(&text, 256)
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Series(DailySeriesPayload),
    ApiError(String),
    RateLimited(String),
}

pub fn classify_body(body: Value) -> Result<Classified> {
    let Value::Object(map) = body else {
        anyhow::bail!("quote API response is not a JSON object");
    };

    if let Some(message) = map.get(ERROR_KEY) {
        return Ok(Classified::ApiError(text_of(message)));
    }

    for key in ADVISORY_KEYS {
        if let Some(note) = map.get(key) {
            return Ok(Classified::RateLimited(text_of(note)));
        }
    }

    let payload = serde_json::from_value::<DailySeriesPayload>(Value::Object(map))
        .context("failed to decode daily series payload")?;
    Ok(Classified::Series(payload))
}

/// Fetches one symbol's daily series with bounded retry and pacing.
pub struct DailySeriesFetcher {
    transport: Arc<dyn SeriesTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    pacing: Duration,
}

impl DailySeriesFetcher {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let transport = AlphaVantageHttp::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(TokioSleeper),
            RetryPolicy::linear(settings.fetch_max_attempts, settings.request_interval),
            settings.request_interval,
        ))
    }

    pub fn new(
        transport: Arc<dyn SeriesTransport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        pacing: Duration,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            pacing,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.transport.provider_name()
    }

    pub async fn fetch(&self, symbol: &str) -> Result<DailySeriesPayload, FetchError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(FetchError::new(symbol, FetchErrorKind::InvalidSymbol));
        }

        let res = self
            .policy
            .run(self.sleeper.as_ref(), move |attempt| self.attempt(symbol, attempt))
            .instrument(tracing::info_span!("fetch", %symbol))
            .await;

        match res {
            Ok(payload) => {
                tracing::info!(
                    %symbol,
                    provider = self.provider_name(),
                    entries = payload.entry_count(),
                    pacing = ?self.pacing,
                    "fetched daily series"
                );
                self.sleeper.sleep(self.pacing).await;
                Ok(payload)
            }
            Err(RetryError::Fatal(err)) => Err(FetchError::new(
                symbol,
                FetchErrorKind::Upstream {
                    message: format!("{err:#}"),
                },
            )),
            Err(RetryError::Exhausted { attempts, last }) => Err(FetchError::new(
                symbol,
                FetchErrorKind::Exhausted { attempts, last },
            )),
        }
    }

    async fn attempt(
        &self,
        symbol: &str,
        attempt: u32,
    ) -> std::result::Result<DailySeriesPayload, AttemptError> {
        tracing::debug!(%symbol, attempt, "requesting daily series");

        let body = self
            .transport
            .get_daily_series(symbol)
            .await
            .map_err(AttemptError::Retryable)?;

        match classify_body(body).map_err(AttemptError::Retryable)? {
            Classified::Series(payload) => Ok(payload),
            Classified::ApiError(message) => Err(AttemptError::Fatal(anyhow::anyhow!(message))),
            Classified::RateLimited(note) => {
                tracing::warn!(%symbol, attempt, %note, "quote API rate limit advisory");
                Err(AttemptError::Retryable(anyhow::anyhow!(
                    "rate limited: {note}"
                )))
            }
        }
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::retry::testing::RecordingSleeper;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses; repeats the last one once the script runs out.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Value>>>,
        last: Mutex<Option<Result<Value, String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl SeriesTransport for ScriptedTransport {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn get_daily_series(&self, symbol: &str) -> Result<Value> {
            self.calls.lock().unwrap().push(symbol.to_string());
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next.as_ref().map(Clone::clone).map_err(|e| e.to_string()));
                return next;
            }
            match last.clone() {
                Some(Ok(v)) => Ok(v),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Err(anyhow::anyhow!("script is empty")),
            }
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> DailySeriesFetcher {
        DailySeriesFetcher::new(
            transport,
            sleeper,
            RetryPolicy::linear(5, Duration::from_secs(15)),
            Duration::from_secs(15),
        )
    }

    fn ibm_series() -> Value {
        json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": {
                "2024-01-02": {
                    "1. open": "100.0000",
                    "2. high": "105.0000",
                    "3. low": "99.0000",
                    "4. close": "102.0000",
                    "5. volume": "1000"
                }
            }
        })
    }

    fn secs(v: &[u64]) -> Vec<Duration> {
        v.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn classifies_error_advisory_and_series_bodies() {
        let err = classify_body(json!({"Error Message": "Invalid API call."})).unwrap();
        assert_eq!(err, Classified::ApiError("Invalid API call.".into()));

        let note = classify_body(json!({"Note": "Thank you for using Alpha Vantage!"})).unwrap();
        assert!(matches!(note, Classified::RateLimited(_)));

        let info = classify_body(json!({"Information": "daily limit reached"})).unwrap();
        assert!(matches!(info, Classified::RateLimited(_)));

        match classify_body(ibm_series()).unwrap() {
            Classified::Series(p) => assert_eq!(p.entry_count(), 1),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(classify_body(json!(["not", "an", "object"])).is_err());
    }

    #[tokio::test]
    async fn success_returns_payload_after_one_pacing_sleep() {
        let transport = ScriptedTransport::new(vec![Ok(ibm_series())]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let payload = fetcher(transport.clone(), sleeper.clone())
            .fetch("IBM")
            .await
            .unwrap();

        assert_eq!(payload.entry_count(), 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(sleeper.slept(), secs(&[15]));
    }

    #[tokio::test]
    async fn sustained_transport_failure_gives_up_after_five_attempts() {
        let transport = ScriptedTransport::new(vec![Err(anyhow::anyhow!("connection reset"))]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = fetcher(transport.clone(), sleeper.clone())
            .fetch("MSFT")
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 5);
        assert_eq!(sleeper.slept(), secs(&[15, 30, 45, 60]));
        assert_eq!(err.symbol, "MSFT");
        assert!(matches!(err.kind, FetchErrorKind::Exhausted { attempts: 5, .. }));
        assert!(format!("{:#}", anyhow::Error::new(err)).contains("connection reset"));
    }

    #[tokio::test]
    async fn api_error_fails_immediately_without_sleeping() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "Error Message": "Invalid API call. Please retry or visit the documentation."
        }))]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = fetcher(transport.clone(), sleeper.clone())
            .fetch("NOPE")
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert!(sleeper.slept().is_empty());
        assert!(matches!(err.kind, FetchErrorKind::Upstream { .. }));
        assert!(err.to_string().contains("NOPE"));
    }

    #[tokio::test]
    async fn rate_limit_advisory_is_retried_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"Note": "API call frequency is 5 calls per minute."})),
            Ok(json!({"Note": "API call frequency is 5 calls per minute."})),
            Ok(ibm_series()),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let payload = fetcher(transport.clone(), sleeper.clone())
            .fetch("IBM")
            .await
            .unwrap();

        assert_eq!(payload.entry_count(), 1);
        assert_eq!(transport.calls(), 3);
        // Two backoffs, then the pacing delay after success.
        assert_eq!(sleeper.slept(), secs(&[15, 30, 15]));
    }

    #[tokio::test]
    async fn blank_symbol_is_rejected_before_any_request() {
        let transport = ScriptedTransport::new(vec![Ok(ibm_series())]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = fetcher(transport.clone(), sleeper.clone())
            .fetch("   ")
            .await
            .unwrap_err();

        assert!(matches!(err.kind, FetchErrorKind::InvalidSymbol));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn missing_credential_fails_at_construction() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        let err = DailySeriesFetcher::from_settings(&settings)
            .err()
            .expect("construction must fail without a key");
        assert!(err.to_string().contains("ALPHA_VANTAGE_API_KEY"));
        assert!(err.downcast_ref::<FetchError>().is_none());
    }

    #[test]
    fn truncates_long_bodies_on_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("가나다라", 2), "가나...");
    }
}
