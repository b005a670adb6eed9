use crate::domain::quote::DailySeriesPayload;
use crate::ingest::normalize::normalize_series;
use crate::storage::quotes::QuoteStore;
use anyhow::Context;

/// Normalizes one symbol's payload and upserts it as a single atomic write.
/// Missing or empty data is a successful no-op.
pub async fn load<S>(
    store: &S,
    symbol: &str,
    payload: Option<&DailySeriesPayload>,
) -> anyhow::Result<u64>
where
    S: QuoteStore + ?Sized,
{
    let symbol = symbol.trim().to_ascii_uppercase();

    let Some(payload) = payload else {
        tracing::info!(%symbol, "no payload; nothing to load");
        return Ok(0);
    };
    if payload.entry_count() == 0 {
        tracing::info!(%symbol, "empty series; nothing to load");
        return Ok(0);
    }

    let normalized = normalize_series(&symbol, Some(payload));
    if !normalized.skipped.is_empty() {
        tracing::warn!(
            %symbol,
            skipped = normalized.skipped.len(),
            kept = normalized.rows.len(),
            "some series entries were skipped"
        );
    }
    if normalized.rows.is_empty() {
        tracing::info!(%symbol, "no parseable rows; nothing to load");
        return Ok(0);
    }

    let written = store
        .upsert_quotes(&symbol, &normalized.rows)
        .await
        .with_context(|| format!("[{symbol}] DB error"))?;

    tracing::info!(%symbol, rows = written, "upserted daily quotes");
    Ok(written)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::domain::quote::QuoteRow;
    use crate::storage::quotes::QuoteStore;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoredRow {
        pub row: QuoteRow,
        /// Logical write clock, bumped on every upsert call.
        pub fetched_at: u64,
    }

    /// Keyed like the real table; a failing call leaves it untouched.
    #[derive(Debug, Default)]
    pub struct MemoryQuoteStore {
        rows: Mutex<BTreeMap<(String, NaiveDate), StoredRow>>,
        clock: Mutex<u64>,
        fail: AtomicBool,
    }

    impl MemoryQuoteStore {
        pub fn fail_writes(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<StoredRow> {
            self.rows
                .lock()
                .unwrap()
                .get(&(symbol.to_string(), date))
                .cloned()
        }

        pub fn writes(&self) -> u64 {
            *self.clock.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl QuoteStore for MemoryQuoteStore {
        async fn upsert_quotes(&self, _symbol: &str, rows: &[QuoteRow]) -> anyhow::Result<u64> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            let mut clock = self.clock.lock().unwrap();
            *clock += 1;
            let mut table = self.rows.lock().unwrap();
            for row in rows {
                table.insert(
                    (row.symbol.clone(), row.record_date),
                    StoredRow {
                        row: row.clone(),
                        fetched_at: *clock,
                    },
                );
            }
            Ok(rows.len() as u64)
        }
    }
}
