pub mod apikeys;
pub mod tasks;
pub mod users;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::Result;
use crate::model::{ApiKey, DashboardStats, RequestTask, TaskDraft, TaskStatus, User};

/// Source of truth for task rows and their lifecycle. Admission writes
/// schedule handles and deletes; only the dispatch actor transitions
/// `status` and `error_message`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, draft: TaskDraft) -> Result<RequestTask>;

    /// Worker-side lookup, unscoped: a dispatch unit carries no user.
    async fn task_by_id(&self, id: i64) -> Result<Option<RequestTask>>;

    /// Owner-scoped lookup. Absence and foreign ownership are
    /// indistinguishable to the caller.
    async fn task_for_user(&self, id: i64, user_id: i64) -> Result<Option<RequestTask>>;

    async fn tasks_for_user(&self, user_id: i64) -> Result<Vec<RequestTask>>;

    /// Writes whichever schedule handles are provided, leaving the other
    /// untouched.
    async fn update_handles(
        &self,
        id: i64,
        message_id: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<()>;

    /// Unconditional status write; last write wins.
    async fn transition(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Single-statement counter bump, never read-modify-write.
    async fn increment_cron_count(&self, id: i64) -> Result<()>;

    async fn delete_task_for_user(&self, id: i64, user_id: i64) -> Result<bool>;

    async fn dashboard_for_user(&self, user_id: i64) -> Result<DashboardStats>;
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Unique-constraint violations on name/email surface as
    /// [`crate::error::Error::Conflict`].
    async fn insert_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User>;

    async fn user_by_id(&self, id: i64) -> Result<Option<User>>;
    async fn user_by_name(&self, name: &str) -> Result<Option<User>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User>;
    async fn touch_login(&self, id: i64) -> Result<()>;
    async fn delete_user(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(
        &self,
        user_id: i64,
        name: &str,
        prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey>;

    async fn api_keys_for_user(&self, user_id: i64) -> Result<Vec<ApiKey>>;

    /// Lookup candidates for authentication by the first 8 chars of the
    /// presented secret. Inactive keys are excluded.
    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>>;

    async fn revoke_api_key(&self, id: i64, user_id: i64) -> Result<bool>;
}

pub trait Store: TaskStore + UserStore + ApiKeyStore {}

impl<T: TaskStore + UserStore + ApiKeyStore> Store for T {}

/// Postgres-backed store over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pub(crate) pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}
