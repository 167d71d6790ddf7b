use std::time::Duration;

use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

use crate::config::Config;

/// One pool per process, shared by every role: api handlers, the worker's
/// claim loop and the scheduler's tick loops all draw from it, so the size
/// comes from configuration instead of a fixed constant. A couple of
/// connections stay warm for the claim loops, which poll even when the
/// deployment is otherwise idle.
pub async fn create_pool(config: &Config) -> anyhow::Result<Pool<Postgres>> {
    let warm = config.db_pool_size.min(2);

    Ok(PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .min_connections(warm)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?)
}

/// Applies the schema under `migrations/`: task, user and api-key tables
/// plus the queue-message and cron-entry tables the dispatch engine
/// persists its state in.
pub async fn migrate(pool: &Pool<Postgres>) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    Ok(())
}
