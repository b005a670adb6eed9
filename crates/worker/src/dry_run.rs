use stockpipe_core::domain::quote::QuoteRow;
use stockpipe_core::storage::quotes::QuoteStore;

/// Accepts rows without writing them anywhere.
pub struct DryRunStore;

#[async_trait::async_trait]
impl QuoteStore for DryRunStore {
    async fn upsert_quotes(&self, symbol: &str, rows: &[QuoteRow]) -> anyhow::Result<u64> {
        let first = rows.first().map(|r| r.record_date);
        let last = rows.last().map(|r| r.record_date);
        tracing::info!(%symbol, rows = rows.len(), ?first, ?last, dry_run = true, "would upsert");
        Ok(rows.len() as u64)
    }
}
