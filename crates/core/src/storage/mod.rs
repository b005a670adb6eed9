pub mod lock;
pub mod quotes;

use anyhow::Context;

/// Applies embedded migrations, which bootstrap the `stock_data` table.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
