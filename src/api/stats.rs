use axum::Json;
use axum::extract::State;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::{ApiError, Context, CurrentUser};
use crate::model::DashboardStats;
use crate::store::TaskStore;

#[utoipa::path(
  get,
  path = "/api/v1/stats/dashboard",
  responses(
    (status = 200, description = "Task totals and per-status counts (nonzero only)", body = DashboardStats),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "stats"
)]
#[tracing::instrument(name = "api_dashboard_stats", skip(ctx))]
async fn dashboard_stats(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<DashboardStats>, ApiError> {
    let stats = ctx.engine.store.dashboard_for_user(user.id).await?;

    Ok(Json(stats))
}

pub fn init_router() -> OpenApiRouter<Context> {
    OpenApiRouter::new().routes(routes!(dashboard_stats))
}
