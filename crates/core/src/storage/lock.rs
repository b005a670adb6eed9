use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session, so the lock owns the
// pooled connection it was taken on until release.
const LOCK_NAMESPACE: i64 = 0x5354_4F43_4B50; // "STOCKP"

pub fn lock_key(name: &str) -> i64 {
    // FNV-1a, folded into the namespace.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    LOCK_NAMESPACE ^ (hash as i64)
}

pub struct RunLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

impl RunLock {
    /// Returns `None` when another session already holds the lock.
    pub async fn try_acquire(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<Option<Self>> {
        let key = lock_key(name);
        let mut conn = pool
            .acquire()
            .await
            .context("acquire connection for advisory lock failed")?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

        Ok(acquired.then_some(Self { conn, key }))
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}
