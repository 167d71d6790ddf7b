use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Error;

pub const VALID_HTTP_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Lifecycle of a task row. `Cancelled` is declared for pre-claim
/// cancellation bookkeeping but no code path writes it yet; deletes remove
/// the row outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity of the core: one outbound HTTP request task, either
/// one-shot (`message_id` set after admission) or recurring (`job_id` set).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequestTask {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub request_url: String,
    pub method: String,
    pub header: HashMap<String, String>,
    #[schema(value_type = Object)]
    pub body: serde_json::Value,
    pub start_time: Option<i64>,
    pub cron: Option<String>,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
    pub message_id: Option<String>,
    pub job_id: Option<String>,
    pub cron_count: i32,
    pub status: TaskStatus,
    pub error_message: Option<String>,
}

/// Everything needed to insert a task row. Status starts out PENDING and
/// the schedule handles are written back after admission decides how to
/// dispatch.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub user_id: i64,
    pub name: String,
    pub request_url: String,
    pub method: String,
    pub header: HashMap<String, String>,
    pub body: serde_json::Value,
    pub start_time: Option<i64>,
    pub cron: Option<String>,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
}

fn check_url_scheme(kind: &str, url: &str) -> Result<(), Error> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }

    Err(Error::BadInput(format!(
        "Invalid {kind}: {url}. Must start with 'http://' or 'https://'"
    )))
}

impl TaskDraft {
    /// Normalizes the method to upper-case and enforces the method
    /// allow-list and URL scheme constraints. Runs on admission and again
    /// at the store boundary so no path can persist an invalid row.
    pub fn validate(&mut self) -> Result<(), Error> {
        let method = self.method.to_uppercase();
        if !VALID_HTTP_METHODS.contains(&method.as_str()) {
            return Err(Error::BadInput(format!(
                "Invalid HTTP method: {}. Must be one of {:?}",
                self.method, VALID_HTTP_METHODS
            )));
        }
        self.method = method;

        check_url_scheme("request URL", &self.request_url)?;

        if let Some(callback_url) = &self.callback_url
            && !callback_url.is_empty()
        {
            check_url_scheme("callback URL", callback_url)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub verified: bool,
    pub register_time: DateTime<Utc>,
    pub login_time: Option<DateTime<Utc>>,
}

/// The shape returned to API clients: never the hash or timestamps.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Issued API key. Only the prefix and the hash of the secret are stored;
/// the raw secret is returned exactly once at creation time.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardStats {
    pub total_tasks: i64,
    /// Per-status counts; statuses with zero tasks are omitted.
    pub status_counts: HashMap<String, i64>,
}
