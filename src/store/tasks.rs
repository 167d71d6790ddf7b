use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::prelude::FromRow;
use sqlx::types::Json;

use crate::error::{Error, Result};
use crate::model::{DashboardStats, RequestTask, TaskDraft, TaskStatus};
use crate::store::{PgStore, TaskStore};

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    user_id: i64,
    name: String,
    request_url: String,
    method: String,
    header: Json<HashMap<String, String>>,
    body: serde_json::Value,
    start_time: Option<i64>,
    cron: Option<String>,
    callback_url: Option<String>,
    callback_token: Option<String>,
    message_id: Option<String>,
    job_id: Option<String>,
    cron_count: i32,
    status: String,
    error_message: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<RequestTask> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| Error::Internal(format!("unknown task status {:?}", self.status)))?;

        Ok(RequestTask {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            request_url: self.request_url,
            method: self.method,
            header: self.header.0,
            body: self.body,
            start_time: self.start_time,
            cron: self.cron,
            callback_url: self.callback_url,
            callback_token: self.callback_token,
            message_id: self.message_id,
            job_id: self.job_id,
            cron_count: self.cron_count,
            status,
            error_message: self.error_message,
        })
    }
}

const TASK_COLUMNS: &str = r#"
    id, user_id, name, request_url, method, header, body, start_time,
    cron, callback_url, callback_token, message_id, job_id, cron_count,
    status, error_message
"#;

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, draft: TaskDraft) -> Result<RequestTask> {
        let mut draft = draft;
        draft.validate()?;

        #[derive(FromRow)]
        struct Inserted {
            id: i64,
        }

        let inserted: Inserted = sqlx::query_as(
            r#"
            INSERT INTO request_tasks
              (user_id, name, request_url, method, header, body, start_time,
               cron, callback_url, callback_token, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id;
            "#,
        )
        .bind(draft.user_id)
        .bind(&draft.name)
        .bind(&draft.request_url)
        .bind(&draft.method)
        .bind(Json(&draft.header))
        .bind(&draft.body)
        .bind(draft.start_time)
        .bind(&draft.cron)
        .bind(&draft.callback_url)
        .bind(&draft.callback_token)
        .bind(TaskStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(RequestTask {
            id: inserted.id,
            user_id: draft.user_id,
            name: draft.name,
            request_url: draft.request_url,
            method: draft.method,
            header: draft.header,
            body: draft.body,
            start_time: draft.start_time,
            cron: draft.cron,
            callback_url: draft.callback_url,
            callback_token: draft.callback_token,
            message_id: None,
            job_id: None,
            cron_count: 0,
            status: TaskStatus::Pending,
            error_message: None,
        })
    }

    async fn task_by_id(&self, id: i64) -> Result<Option<RequestTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM request_tasks WHERE id = $1;"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn task_for_user(&self, id: i64, user_id: i64) -> Result<Option<RequestTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM request_tasks WHERE id = $1 AND user_id = $2;"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn tasks_for_user(&self, user_id: i64) -> Result<Vec<RequestTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM request_tasks WHERE user_id = $1 ORDER BY id;"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn update_handles(
        &self,
        id: i64,
        message_id: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE request_tasks
            SET
              message_id = COALESCE($2, message_id),
              job_id = COALESCE($3, job_id)
            WHERE id = $1;
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE request_tasks
            SET status = $2, error_message = $3
            WHERE id = $1;
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_cron_count(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE request_tasks
            SET cron_count = cron_count + 1
            WHERE id = $1;
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_task_for_user(&self, id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM request_tasks WHERE id = $1 AND user_id = $2;")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn dashboard_for_user(&self, user_id: i64) -> Result<DashboardStats> {
        #[derive(FromRow)]
        struct StatusCount {
            status: String,
            count: i64,
        }

        let rows: Vec<StatusCount> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) as count
            FROM request_tasks
            WHERE user_id = $1
            GROUP BY status;
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let total_tasks = rows.iter().map(|r| r.count).sum();
        let status_counts = rows
            .into_iter()
            .filter(|r| r.count > 0)
            .map(|r| (r.status, r.count))
            .collect();

        Ok(DashboardStats {
            total_tasks,
            status_counts,
        })
    }
}
