/// Error taxonomy shared by the admission layer, the workers and the
/// scheduler. API-facing status codes are assigned in `api::ApiError`;
/// here each variant only carries what the caller needs to react.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected input: unknown HTTP method, bad URL scheme, schema problems.
    #[error("{0}")]
    BadInput(String),

    /// Rejected cron expression. The message is user-visible.
    #[error("Invalid cron expression: {0}")]
    BadCron(String),

    #[error("Unauthorized")]
    AuthRequired,

    #[error("Not Found")]
    NotFound,

    /// Unique constraint violation on user name/email.
    #[error("{0}")]
    Conflict(String),

    /// Outbound HTTP failure. The message ends up in the task row and in
    /// the callback envelope, so keep it plain.
    #[error("{0}")]
    Transport(String),

    /// Cron registry failure at admission time.
    #[error("cron registry error: {0}")]
    Registry(String),

    /// Queue failure. At admission time the task row is rolled back.
    #[error("queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
