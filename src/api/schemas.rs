use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cron;
use crate::error::Result;
use crate::model::{RequestTask, TaskDraft};

/// Create payload for a request task. `method` defaults to GET; exactly
/// how the task is dispatched depends on `cron` and `start_time`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestTaskCreate {
    pub name: String,
    /// Unix epoch seconds, fractions permitted. Ignored when `cron` is set.
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub header: Option<HashMap<String, String>>,
    #[serde(default)]
    pub method: Option<String>,
    pub request_url: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub callback_token: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub body: Option<serde_json::Value>,
    /// Standard 5-field cron expression.
    #[serde(default)]
    pub cron: Option<String>,
}

impl RequestTaskCreate {
    /// Validation happens here, before any row is written: method
    /// allow-list, URL schemes and a cron syntax pre-check.
    pub fn into_draft(self, user_id: i64) -> Result<TaskDraft> {
        let mut draft = TaskDraft {
            user_id,
            name: self.name,
            request_url: self.request_url,
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            header: self.header.unwrap_or_default(),
            body: self.body.unwrap_or_else(|| serde_json::json!({})),
            start_time: Some(
                self.start_time
                    .map(|t| t as i64)
                    .unwrap_or_else(|| Utc::now().timestamp()),
            ),
            cron: self.cron.filter(|expr| !expr.is_empty()),
            callback_url: self.callback_url.filter(|url| !url.is_empty()),
            callback_token: self.callback_token,
        };

        draft.validate()?;

        if let Some(expr) = &draft.cron {
            cron::validate_expr(expr)?;
        }

        Ok(draft)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedTask {
    pub task_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedTasks {
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskList {
    pub tasks: Vec<RequestTask>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreate {
    pub name: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedUser {
    pub uid: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Token requests identify the user by name or email, never both absent.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApiKeyCreate {
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyResponse {
    pub id: i64,
    pub prefix: String,
    pub name: String,
    pub created_at: String,
    pub is_active: bool,
}

/// Same as [`ApiKeyResponse`] plus the raw secret, returned exactly once.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyCreatedResponse {
    pub id: i64,
    pub prefix: String,
    pub name: String,
    pub created_at: String,
    pub is_active: bool,
    pub key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
