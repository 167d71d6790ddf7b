use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http_client::HttpClient;
use crate::model::TaskStatus;
use crate::queue::{DispatchHandler, DispatchUnit};
use crate::store::{Store, TaskStore};

/// Whether the outbound call completed, independent of the remote's HTTP
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Complete,
    Fail,
}

/// JSON document POSTed to the task's `callback_url` after every dispatch
/// attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub response: Option<String>,
    pub code: Option<u16>,
    pub exception: Option<String>,
    pub status: RequestStatus,
}

/// The unit of work executed by workers. Holds the shared store and HTTP
/// client handles; one `run` per claimed dispatch unit.
///
/// The actor is idempotent only in its effect on the task row (last write
/// wins); the outbound call itself is at-least-once, never exactly-once.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    http: HttpClient,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, http: HttpClient) -> Self {
        Self { store, http }
    }

    pub async fn run(&self, task_id: i64) -> Result<()> {
        let Some(task) = self.store.task_by_id(task_id).await? else {
            tracing::warn!("Task with id {task_id} not found, discarding dispatch unit");
            return Ok(());
        };

        self.store
            .transition(task_id, TaskStatus::Running, None)
            .await?;

        let outcome = self
            .http
            .request(&task.method, &task.request_url, &task.header, Some(&task.body))
            .await;

        let envelope = match outcome {
            Ok(response) => {
                self.store
                    .transition(task_id, TaskStatus::Completed, None)
                    .await?;

                CallbackEnvelope {
                    response: Some(String::from_utf8_lossy(&response.body).to_string()),
                    code: Some(response.status_code),
                    exception: None,
                    status: RequestStatus::Complete,
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!("Error requesting task {task_id}: {message}");

                self.store
                    .transition(task_id, TaskStatus::Failed, Some(&message))
                    .await?;

                CallbackEnvelope {
                    response: None,
                    code: None,
                    exception: Some(message),
                    status: RequestStatus::Fail,
                }
            }
        };

        if let Some(callback_url) = &task.callback_url
            && !callback_url.is_empty()
        {
            if let Err(err) = self
                .http
                .post_json(callback_url, task.callback_token.as_deref(), &envelope)
                .await
            {
                tracing::error!("Error sending callback to {callback_url}: {err}");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DispatchHandler for Dispatcher {
    async fn handle(&self, unit: DispatchUnit) {
        if let Err(err) = self.run(unit.task_id).await {
            tracing::error!("dispatch of task {} failed: {err}", unit.task_id);
        }
    }
}
