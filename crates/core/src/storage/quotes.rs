use crate::domain::quote::QuoteRow;
use anyhow::Context;

#[async_trait::async_trait]
pub trait QuoteStore: Send + Sync {
    /// Writes all rows or none. Returns the number of rows written.
    async fn upsert_quotes(&self, symbol: &str, rows: &[QuoteRow]) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone)]
pub struct PgQuoteStore {
    pool: sqlx::PgPool,
    batch_size: usize,
}

impl PgQuoteStore {
    pub fn new(pool: sqlx::PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    async fn upsert_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        symbol: &str,
        rows: &[QuoteRow],
    ) -> anyhow::Result<u64> {
        let mut affected: u64 = 0;
        for (batch_idx, chunk) in rows.chunks(self.batch_size).enumerate() {
            let t0 = std::time::Instant::now();
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO stock_data (symbol, record_date, open, high, low, close, volume) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(&row.symbol)
                    .push_bind(row.record_date)
                    .push_bind(row.open)
                    .push_bind(row.high)
                    .push_bind(row.low)
                    .push_bind(row.close)
                    .push_bind(row.volume);
            });
            qb.push(
                " ON CONFLICT (symbol, record_date) DO UPDATE \
                   SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                       close = EXCLUDED.close, volume = EXCLUDED.volume, fetched_at = now()",
            );

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut **tx)
                .await
                .context("batch upsert stock_data failed")?;
            affected += res.rows_affected();

            tracing::debug!(
                %symbol,
                batch_idx,
                batch_size = chunk.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "stock_data batch upsert"
            );
        }
        Ok(affected)
    }
}

#[async_trait::async_trait]
impl QuoteStore for PgQuoteStore {
    async fn upsert_quotes(&self, symbol: &str, rows: &[QuoteRow]) -> anyhow::Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        match self.upsert_in_tx(&mut tx, symbol, rows).await {
            Ok(affected) => {
                tx.commit().await.context("commit transaction failed")?;
                Ok(affected)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(%symbol, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

pub async fn count_rows(pool: &sqlx::PgPool, symbol: &str) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM stock_data WHERE symbol = $1")
        .persistent(false)
        .bind(symbol)
        .fetch_one(pool)
        .await
        .with_context(|| format!("count stock_data rows for {symbol} failed"))?;
    Ok(count)
}
