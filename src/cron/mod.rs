pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use croner::{
    CronIterator, Direction,
    parser::{CronParser, Seconds},
};

use crate::error::{Error, Result};

/// How late a fire may run before it is considered a misfire and dropped.
/// Missed windows within the grace are coalesced into a single catch-up
/// fire.
pub const MISFIRE_GRACE_SECS: i64 = 60;

pub fn misfire_grace() -> TimeDelta {
    TimeDelta::seconds(MISFIRE_GRACE_SECS)
}

/// Durable set of cron registrations. A single scheduler instance owns the
/// registry and enqueues one dispatch unit per fire.
#[async_trait]
pub trait CronRegistry: Send + Sync {
    /// Validates the expression and persists the registration; returns the
    /// opaque job handle stored on the task row.
    async fn register(&self, expr: &str, task_id: i64) -> Result<String>;

    /// Idempotent removal; an unknown handle is not an error.
    async fn remove(&self, job_id: &str) -> Result<()>;
}

fn parse(expr: &str) -> Result<croner::Cron> {
    CronParser::builder()
        .seconds(Seconds::Optional)
        .build()
        .parse(expr)
        .map_err(|err| Error::BadCron(format!("{expr:?}: {err:?}")))
}

/// Syntax pre-check used by admission before any row is written.
pub fn validate_expr(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// First matching instant strictly after `after`, evaluated in the
/// process-wide timezone. `None` means the expression can never fire
/// again.
pub fn next_occurrence(
    expr: &str,
    after: DateTime<Utc>,
    tz: &Tz,
) -> Result<Option<DateTime<Utc>>> {
    let cron = parse(expr)?;
    let local = after.with_timezone(tz);

    let next = CronIterator::new(cron, local, false, Direction::Forward)
        .next()
        .map(|datetime| datetime.with_timezone(&Utc));

    Ok(next)
}

/// The callback bound to every cron-registered task: enqueue one dispatch
/// unit, then bump `cron_count`. A failed enqueue leaves the count alone,
/// so the count never overstates successfully queued fires.
pub async fn fire<Q, S>(queue: &Q, store: &S, task_id: i64)
where
    Q: crate::queue::Queue + ?Sized,
    S: crate::store::TaskStore + ?Sized,
{
    match queue.enqueue(task_id).await {
        Ok(_) => {
            if let Err(err) = store.increment_cron_count(task_id).await {
                tracing::error!("failed to bump cron count for task {task_id}: {err}");
            }
        }
        Err(err) => {
            tracing::error!("failed to enqueue cron fire for task {task_id}: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// The entry is due and within the grace window.
    Fire,
    /// The entry is past the grace window; the misfire is dropped and the
    /// schedule advances without enqueuing anything.
    Drop,
}

pub fn fire_decision(due: DateTime<Utc>, now: DateTime<Utc>, grace: TimeDelta) -> FireDecision {
    if now - due <= grace {
        FireDecision::Fire
    } else {
        FireDecision::Drop
    }
}
