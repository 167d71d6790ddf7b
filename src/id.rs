use std::sync::Mutex;

use once_cell::sync::Lazy;

/// The two opaque schedule handles a task row can carry: `message_id` for
/// a queued dispatch unit, `job_id` for a cron registration. The prefix
/// makes a handle's origin readable in logs and in the row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Message,
    CronJob,
}

impl Handle {
    fn prefix(self) -> &'static str {
        match self {
            Handle::Message => "msg",
            Handle::CronJob => "cron",
        }
    }
}

static ULIDS: Lazy<Mutex<ulid::Generator>> = Lazy::new(|| Mutex::new(ulid::Generator::new()));

/// Issues `msg_<ulid>` / `cron_<ulid>` handles. Monotonic within the
/// process, so handles minted by one enqueue burst sort in issue order.
pub fn handle(kind: Handle) -> String {
    let mut ulids = ULIDS.lock().expect("ulid generator lock poisoned");
    let id = ulids.generate().expect("ulid monotonic counter overflowed");

    format!("{}_{}", kind.prefix(), id)
}
