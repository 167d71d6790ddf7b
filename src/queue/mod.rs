pub mod pg;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One scheduled execution of a task's outbound HTTP call. This is the
/// whole payload a worker receives; everything else is loaded from the
/// store by task id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchUnit {
    pub task_id: i64,
}

/// Worker-side processor for claimed dispatch units. Errors are handled
/// (and logged) inside the handler; a returned unit is considered consumed
/// either way.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    async fn handle(&self, unit: DispatchUnit);
}

/// Durable at-least-once broker for dispatch units.
///
/// `cancel` is best-effort: it only succeeds between enqueue and the
/// moment a worker claims the unit; afterwards it is a no-op returning
/// false.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Immediate dispatch. Returns the opaque message handle stored on
    /// the task row.
    async fn enqueue(&self, task_id: i64) -> Result<String>;

    /// Deferred dispatch: the unit stays invisible to workers until the
    /// wall-clock instant `eta_epoch_ms`.
    async fn enqueue_at(&self, task_id: i64, eta_epoch_ms: i64) -> Result<String>;

    async fn cancel(&self, message_id: &str) -> Result<bool>;

    /// Blocks forever, feeding claimed units to `handler`. Units claimed
    /// by a worker that dies are redelivered after a lease window.
    async fn consume(&self, handler: Arc<dyn DispatchHandler>) -> Result<()>;
}
