use axum::Json;
use axum::extract::{Path, State};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::{
    ApiError, Context, CurrentUser, JsonBody,
    schemas::{ApiKeyCreate, ApiKeyCreatedResponse, ApiKeyResponse, MessageResponse},
};
use crate::auth;
use crate::store::ApiKeyStore;

#[utoipa::path(
  post,
  path = "/api/v1/apikeys",
  request_body = ApiKeyCreate,
  responses(
    (status = 200, description = "Key created; the raw secret is only ever returned here", body = ApiKeyCreatedResponse),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "api keys"
)]
#[tracing::instrument(name = "api_create_api_key", skip(ctx, create))]
async fn create_api_key(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
    JsonBody(create): JsonBody<ApiKeyCreate>,
) -> Result<Json<ApiKeyCreatedResponse>, ApiError> {
    let generated = auth::generate_api_key()?;

    let key = ctx
        .engine
        .store
        .insert_api_key(user.id, &create.name, &generated.prefix, &generated.hash)
        .await?;

    Ok(Json(ApiKeyCreatedResponse {
        id: key.id,
        prefix: key.prefix,
        name: key.name,
        created_at: key.created_at.to_string(),
        is_active: key.is_active,
        key: generated.raw,
    }))
}

#[utoipa::path(
  get,
  path = "/api/v1/apikeys",
  responses(
    (status = 200, description = "Active keys owned by the caller", body = Vec<ApiKeyResponse>),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "api keys"
)]
#[tracing::instrument(name = "api_list_api_keys", skip(ctx))]
async fn list_api_keys(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ApiKeyResponse>>, ApiError> {
    let keys = ctx.engine.store.api_keys_for_user(user.id).await?;

    Ok(Json(
        keys.into_iter()
            .map(|key| ApiKeyResponse {
                id: key.id,
                prefix: key.prefix,
                name: key.name,
                created_at: key.created_at.to_string(),
                is_active: key.is_active,
            })
            .collect(),
    ))
}

#[utoipa::path(
  delete,
  path = "/api/v1/apikeys/{key_id}",
  params(("key_id", description = "Id of the key")),
  responses(
    (status = 200, description = "Key revoked", body = MessageResponse),
    (status = 404, description = "Key not found", body = ApiError),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "api keys"
)]
#[tracing::instrument(name = "api_revoke_api_key", skip(ctx))]
async fn revoke_api_key(
    State(ctx): State<Context>,
    Path(key_id): Path<i64>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if !ctx.engine.store.revoke_api_key(key_id, user.id).await? {
        return Err(ApiError::not_found());
    }

    Ok(Json(MessageResponse {
        message: "API key revoked".to_string(),
    }))
}

pub fn init_router() -> OpenApiRouter<Context> {
    OpenApiRouter::new()
        .routes(routes!(create_api_key, list_api_keys))
        .routes(routes!(revoke_api_key))
}
