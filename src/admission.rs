//! The admission layer: translates task CRUD intent into store, queue and
//! cron registry operations while keeping the schedule-handle invariants
//! intact. Only this module creates and deletes task rows; status writes
//! belong to the dispatch actor.

use chrono::Utc;

use crate::api::schemas::RequestTaskCreate;
use crate::cron::CronRegistry;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::RequestTask;
use crate::queue::Queue;
use crate::store::TaskStore;

/// Creates a task row and commits it to a dispatch path: a cron
/// registration for recurring tasks, otherwise a queue unit fired
/// immediately or at `start_time`. A registration or enqueue failure
/// compensates by deleting the just-inserted row so no task is left
/// without a schedule handle.
pub async fn create_task(
    engine: &Engine,
    user_id: i64,
    input: RequestTaskCreate,
) -> Result<RequestTask> {
    let requested_start = input.start_time;
    let draft = input.into_draft(user_id)?;

    let task = engine.store.insert_task(draft).await?;

    if let Some(expr) = task.cron.clone() {
        match engine.cron.register(&expr, task.id).await {
            Ok(job_id) => {
                engine
                    .store
                    .update_handles(task.id, None, Some(&job_id))
                    .await?;
            }
            Err(err) => {
                rollback_row(engine, task.id, user_id).await;
                return Err(err);
            }
        }
    } else {
        let now_ms = Utc::now().timestamp_millis();
        let eta_ms = requested_start.map(|t| (t * 1000.0) as i64);

        let enqueued = match eta_ms {
            Some(eta) if eta > now_ms => engine.queue.enqueue_at(task.id, eta).await,
            _ => engine.queue.enqueue(task.id).await,
        };

        match enqueued {
            Ok(message_id) => {
                engine
                    .store
                    .update_handles(task.id, Some(&message_id), None)
                    .await?;
            }
            Err(err) => {
                rollback_row(engine, task.id, user_id).await;
                return Err(err);
            }
        }
    }

    engine
        .store
        .task_by_id(task.id)
        .await?
        .ok_or(Error::NotFound)
}

async fn rollback_row(engine: &Engine, task_id: i64, user_id: i64) {
    if let Err(err) = engine.store.delete_task_for_user(task_id, user_id).await {
        tracing::error!("failed to roll back task {task_id} after admission error: {err}");
    }
}

/// Per-element creation with partial success: a failing element is skipped
/// and does not roll back earlier ones.
pub async fn create_tasks_bulk(
    engine: &Engine,
    user_id: i64,
    inputs: Vec<RequestTaskCreate>,
) -> Result<Vec<i64>> {
    let mut task_ids = Vec::new();

    for input in inputs {
        match create_task(engine, user_id, input).await {
            Ok(task) => task_ids.push(task.id),
            Err(err) => tracing::warn!("skipping bulk task element: {err}"),
        }
    }

    Ok(task_ids)
}

pub async fn get_task(engine: &Engine, user_id: i64, task_id: i64) -> Result<RequestTask> {
    engine
        .store
        .task_for_user(task_id, user_id)
        .await?
        .ok_or(Error::NotFound)
}

pub async fn list_tasks(engine: &Engine, user_id: i64) -> Result<Vec<RequestTask>> {
    engine.store.tasks_for_user(user_id).await
}

/// Deletes a task, first revoking whatever dispatch path it holds: the
/// queued unit is cancelled best-effort (a claimed unit keeps running and
/// will find the row gone), the cron entry removal is idempotent.
pub async fn delete_task(engine: &Engine, user_id: i64, task_id: i64) -> Result<()> {
    let Some(task) = engine.store.task_for_user(task_id, user_id).await? else {
        return Err(Error::NotFound);
    };

    if let Some(message_id) = &task.message_id
        && let Err(err) = engine.queue.cancel(message_id).await
    {
        tracing::warn!("failed to cancel queued unit {message_id}: {err}");
    }

    if let Some(job_id) = &task.job_id
        && let Err(err) = engine.cron.remove(job_id).await
    {
        tracing::error!("Error removing cron entry {job_id}: {err}");
    }

    if !engine.store.delete_task_for_user(task_id, user_id).await? {
        return Err(Error::NotFound);
    }

    Ok(())
}
