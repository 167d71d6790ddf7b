use axum::Json;
use axum::extract::{Path, State};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::admission;
use crate::api::{
    ApiError, Context, CurrentUser, JsonBody,
    schemas::{CreatedTask, CreatedTasks, RequestTaskCreate, TaskList},
};
use crate::model::RequestTask;

#[utoipa::path(
  post,
  path = "/api/v1/tasks",
  request_body = RequestTaskCreate,
  responses(
    (status = 200, description = "Task created", body = CreatedTask),
    (status = 400, description = "Invalid cron expression", body = ApiError),
    (status = 422, description = "Invalid method or schema", body = ApiError),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "tasks"
)]
#[tracing::instrument(name = "api_create_task", skip(ctx, create))]
async fn create_task(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
    JsonBody(create): JsonBody<RequestTaskCreate>,
) -> Result<Json<CreatedTask>, ApiError> {
    let task = admission::create_task(&ctx.engine, user.id, create).await?;

    Ok(Json(CreatedTask { task_id: task.id }))
}

#[utoipa::path(
  post,
  path = "/api/v1/tasks/bulk",
  request_body = Vec<RequestTaskCreate>,
  responses(
    (status = 200, description = "Created task ids; failing elements are skipped", body = CreatedTasks),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "tasks"
)]
#[tracing::instrument(name = "api_bulk_create_tasks", skip(ctx, creates))]
async fn bulk_create_tasks(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
    JsonBody(creates): JsonBody<Vec<RequestTaskCreate>>,
) -> Result<Json<CreatedTasks>, ApiError> {
    let task_ids = admission::create_tasks_bulk(&ctx.engine, user.id, creates).await?;

    Ok(Json(CreatedTasks { task_ids }))
}

#[utoipa::path(
  get,
  path = "/api/v1/tasks",
  responses(
    (status = 200, description = "All tasks owned by the caller", body = TaskList),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "tasks"
)]
#[tracing::instrument(name = "api_list_tasks", skip(ctx))]
async fn list_tasks(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<TaskList>, ApiError> {
    let tasks = admission::list_tasks(&ctx.engine, user.id).await?;

    Ok(Json(TaskList { tasks }))
}

#[utoipa::path(
  get,
  path = "/api/v1/tasks/{task_id}",
  params(("task_id", description = "Id of the task")),
  responses(
    (status = 200, description = "Task found", body = RequestTask),
    (status = 404, description = "Task not found", body = ApiError),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "tasks"
)]
#[tracing::instrument(name = "api_get_task", skip(ctx))]
async fn get_task(
    State(ctx): State<Context>,
    Path(task_id): Path<i64>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<RequestTask>, ApiError> {
    let task = admission::get_task(&ctx.engine, user.id, task_id).await?;

    Ok(Json(task))
}

#[utoipa::path(
  delete,
  path = "/api/v1/tasks/{task_id}",
  params(("task_id", description = "Id of the task")),
  responses(
    (status = 200, description = "Task deleted"),
    (status = 404, description = "Task not found", body = ApiError),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "tasks"
)]
#[tracing::instrument(name = "api_delete_task", skip(ctx))]
async fn delete_task(
    State(ctx): State<Context>,
    Path(task_id): Path<i64>,
    CurrentUser(user): CurrentUser,
) -> Result<(), ApiError> {
    admission::delete_task(&ctx.engine, user.id, task_id).await?;

    Ok(())
}

pub fn init_router() -> OpenApiRouter<Context> {
    OpenApiRouter::new()
        .routes(routes!(create_task, list_tasks))
        .routes(routes!(bulk_create_tasks))
        .routes(routes!(get_task, delete_task))
}
