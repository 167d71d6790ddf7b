use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::prelude::FromRow;
use sqlx::{Pool, Postgres};

use crate::cron::{CronRegistry, FireDecision, fire_decision, misfire_grace, next_occurrence};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::id;

/// Cron registrations persisted next to the task rows, with `next_fire_at`
/// bookkeeping so schedules survive restarts. Due entries are claimed with
/// `FOR UPDATE SKIP LOCKED`, which keeps concurrent tick loops inside the
/// single scheduler process from double-firing.
#[derive(Debug, Clone)]
pub struct PgCronRegistry {
    pool: Pool<Postgres>,
    tz: Tz,
}

#[derive(Debug, FromRow)]
struct DueEntry {
    id: String,
    task_id: i64,
    expr: String,
    next_fire_at: DateTime<Utc>,
}

impl PgCronRegistry {
    pub fn new(pool: Pool<Postgres>, tz: Tz) -> Self {
        Self { pool, tz }
    }

    /// Claims at most one due entry, fires it (enqueue then count bump;
    /// no bump when the enqueue fails), and advances `next_fire_at` past
    /// now so any backlog of missed windows coalesces into this single
    /// fire.
    pub async fn run_once(&self, engine: &Engine, reached_end: &mut bool) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let entry: Option<DueEntry> = sqlx::query_as(
            r#"
            SELECT id, task_id, expr, next_fire_at
            FROM cron_entries
            WHERE next_fire_at <= $1
            ORDER BY next_fire_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED;
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = entry else {
            *reached_end = true;
            return Ok(());
        };

        let now = Utc::now();

        match fire_decision(entry.next_fire_at, now, misfire_grace()) {
            FireDecision::Fire => {
                crate::cron::fire(
                    engine.queue.as_ref(),
                    engine.store.as_ref(),
                    entry.task_id,
                )
                .await;
            }
            FireDecision::Drop => {
                tracing::warn!(
                    "dropping misfire of {} for task {}: due {} exceeded the grace window",
                    entry.id,
                    entry.task_id,
                    entry.next_fire_at
                );
            }
        }

        match next_occurrence(&entry.expr, now, &self.tz)? {
            Some(next) => {
                sqlx::query("UPDATE cron_entries SET next_fire_at = $2 WHERE id = $1;")
                    .bind(&entry.id)
                    .bind(next)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                tracing::warn!(
                    "cron entry {} for task {} has no future occurrence, removing it",
                    entry.id,
                    entry.task_id
                );
                sqlx::query("DELETE FROM cron_entries WHERE id = $1;")
                    .bind(&entry.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl CronRegistry for PgCronRegistry {
    async fn register(&self, expr: &str, task_id: i64) -> Result<String> {
        let next_fire_at = next_occurrence(expr, Utc::now(), &self.tz)?
            .ok_or_else(|| Error::Registry(format!("{expr:?} never fires")))?;

        let job_id = id::handle(id::Handle::CronJob);

        sqlx::query(
            r#"
            INSERT INTO cron_entries (id, task_id, expr, next_fire_at, created_at)
            VALUES ($1, $2, $3, $4, $5);
            "#,
        )
        .bind(&job_id)
        .bind(task_id)
        .bind(expr)
        .bind(next_fire_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| Error::Registry(err.to_string()))?;

        Ok(job_id)
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cron_entries WHERE id = $1;")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
