use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::prelude::FromRow;
use sqlx::{Pool, Postgres};

use crate::error::{Error, Result};
use crate::id;
use crate::queue::{DispatchHandler, DispatchUnit, Queue};

/// How many units a single poll claims at once.
const CLAIM_BATCH: i64 = 16;

/// Poll interval when the queue turned out to be empty.
const IDLE_DELAY: Duration = Duration::from_millis(500);

/// A claimed-but-unfinished unit becomes claimable again after this long,
/// so a crashed worker's units are redelivered (at-least-once).
const CLAIM_LEASE_SECS: i64 = 300;

/// Durable queue on the relational store: one row per dispatch unit,
/// visibility controlled by `visible_at`, claims taken with
/// `FOR UPDATE SKIP LOCKED` so parallel workers never double-claim a
/// live unit.
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: Pool<Postgres>,
}

impl PgQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn insert_message(&self, task_id: i64, visible_at: DateTime<Utc>) -> Result<String> {
        let message_id = id::handle(id::Handle::Message);

        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, task_id, visible_at, created_at)
            VALUES ($1, $2, $3, $4);
            "#,
        )
        .bind(&message_id)
        .bind(task_id)
        .bind(visible_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| Error::Queue(err.to_string()))?;

        Ok(message_id)
    }

    async fn claim_batch(&self) -> Result<Vec<(String, DispatchUnit)>> {
        #[derive(FromRow)]
        struct Claimed {
            id: String,
            task_id: i64,
        }

        let now = Utc::now();

        let rows: Vec<Claimed> = sqlx::query_as(
            r#"
            UPDATE queue_messages
            SET claimed_at = $2
            WHERE id IN (
              SELECT id FROM queue_messages
              WHERE done_at IS NULL
                AND cancelled_at IS NULL
                AND visible_at <= $2
                AND (claimed_at IS NULL OR claimed_at <= $3)
              ORDER BY visible_at
              LIMIT $1
              FOR UPDATE SKIP LOCKED
            )
            RETURNING id, task_id;
            "#,
        )
        .bind(CLAIM_BATCH)
        .bind(now)
        .bind(now - TimeDelta::seconds(CLAIM_LEASE_SECS))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, DispatchUnit { task_id: row.task_id }))
            .collect())
    }

    async fn mark_done(&self, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue_messages SET done_at = $2 WHERE id = $1;")
            .bind(message_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn enqueue(&self, task_id: i64) -> Result<String> {
        self.insert_message(task_id, Utc::now()).await
    }

    async fn enqueue_at(&self, task_id: i64, eta_epoch_ms: i64) -> Result<String> {
        let visible_at = DateTime::from_timestamp_millis(eta_epoch_ms)
            .ok_or_else(|| Error::Queue(format!("invalid eta {eta_epoch_ms}")))?;

        self.insert_message(task_id, visible_at).await
    }

    async fn cancel(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET cancelled_at = $2
            WHERE id = $1
              AND claimed_at IS NULL
              AND done_at IS NULL
              AND cancelled_at IS NULL;
            "#,
        )
        .bind(message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn consume(&self, handler: Arc<dyn DispatchHandler>) -> Result<()> {
        loop {
            let batch = match self.claim_batch().await {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!("failed to claim dispatch units: {err}");
                    tokio::time::sleep(IDLE_DELAY).await;
                    continue;
                }
            };

            if batch.is_empty() {
                tokio::time::sleep(IDLE_DELAY).await;
                continue;
            }

            for (message_id, unit) in batch {
                let queue = self.clone();
                let handler = handler.clone();

                tokio::spawn(async move {
                    handler.handle(unit).await;

                    if let Err(err) = queue.mark_done(&message_id).await {
                        tracing::error!("failed to mark unit {message_id} done: {err}");
                    }
                });
            }
        }
    }
}
