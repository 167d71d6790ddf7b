use axum::Json;
use axum::extract::State;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::{
    ApiError, Context, CurrentUser, JsonBody,
    schemas::{
        CreatedUser, MessageResponse, TokenRequest, TokenResponse, UserCreate, UserUpdateRequest,
    },
};
use crate::auth;
use crate::model::UserInfo;
use crate::store::{UserStore, UserUpdate};

fn check_email(email: &str) -> Result<(), ApiError> {
    if email.contains('@') {
        return Ok(());
    }

    Err(ApiError::unprocessable(Some(&format!(
        "Invalid email address: {email}"
    ))))
}

#[utoipa::path(
  post,
  path = "/api/v1/users",
  request_body = UserCreate,
  responses(
    (status = 200, description = "User created", body = CreatedUser),
    (status = 400, description = "Name or email already taken", body = ApiError)
  ),
  tag = "users"
)]
#[tracing::instrument(name = "api_create_user", skip(ctx, create))]
async fn create_user(
    State(ctx): State<Context>,
    JsonBody(create): JsonBody<UserCreate>,
) -> Result<Json<CreatedUser>, ApiError> {
    check_email(&create.email)?;

    if ctx.engine.store.user_by_name(&create.name).await?.is_some() {
        return Err(ApiError::bad_request(Some("Username already exists")));
    }
    if ctx
        .engine
        .store
        .user_by_email(&create.email)
        .await?
        .is_some()
    {
        return Err(ApiError::bad_request(Some("Email already exists")));
    }

    let password_hash = auth::hash_password(&create.password)?;
    let user = ctx
        .engine
        .store
        .insert_user(&create.name, &create.email, &password_hash)
        .await?;

    Ok(Json(CreatedUser { uid: user.id }))
}

#[utoipa::path(
  post,
  path = "/api/v1/users/token",
  request_body = TokenRequest,
  responses(
    (status = 200, description = "Bearer token issued", body = TokenResponse),
    (status = 400, description = "Neither name nor email provided", body = ApiError),
    (status = 401, description = "Bad credentials", body = ApiError)
  ),
  tag = "users"
)]
#[tracing::instrument(name = "api_get_token", skip(ctx, request))]
async fn get_token(
    State(ctx): State<Context>,
    JsonBody(request): JsonBody<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = if let Some(name) = &request.name {
        ctx.engine.store.user_by_name(name).await?
    } else if let Some(email) = &request.email {
        ctx.engine.store.user_by_email(email).await?
    } else {
        return Err(ApiError::bad_request(Some(
            "Please provide a username or email",
        )));
    };

    let Some(user) = user else {
        return Err(ApiError::unauthorized(Some("Invalid username or password")));
    };

    if !auth::verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized(Some("Invalid username or password")));
    }

    ctx.engine.store.touch_login(user.id).await?;

    let token = auth::generate_token(user.id, &ctx.secret_key)?;

    Ok(Json(TokenResponse { token }))
}

#[utoipa::path(
  get,
  path = "/api/v1/users/me",
  responses(
    (status = 200, description = "Current user", body = UserInfo),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "users"
)]
#[tracing::instrument(name = "api_get_me", skip_all)]
async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserInfo> {
    Json(user.to_info())
}

#[utoipa::path(
  put,
  path = "/api/v1/users/me",
  request_body = UserUpdateRequest,
  responses(
    (status = 200, description = "Updated user", body = UserInfo),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "users"
)]
#[tracing::instrument(name = "api_update_me", skip(ctx, update))]
async fn update_me(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
    JsonBody(update): JsonBody<UserUpdateRequest>,
) -> Result<Json<UserInfo>, ApiError> {
    if let Some(email) = &update.email {
        check_email(email)?;
    }

    let password_hash = match &update.password {
        Some(password) => Some(auth::hash_password(password)?),
        None => None,
    };

    let updated = ctx
        .engine
        .store
        .update_user(
            user.id,
            UserUpdate {
                name: update.name,
                email: update.email,
                password_hash,
            },
        )
        .await?;

    Ok(Json(updated.to_info()))
}

#[utoipa::path(
  delete,
  path = "/api/v1/users/me",
  responses(
    (status = 200, description = "User deleted", body = MessageResponse),
    (status = 401, description = "Unauthorized", body = ApiError)
  ),
  tag = "users"
)]
#[tracing::instrument(name = "api_delete_me", skip(ctx))]
async fn delete_me(
    State(ctx): State<Context>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    ctx.engine.store.delete_user(user.id).await?;

    Ok(Json(MessageResponse {
        message: "User deleted".to_string(),
    }))
}

pub fn init_router() -> OpenApiRouter<Context> {
    OpenApiRouter::new()
        .routes(routes!(create_user))
        .routes(routes!(get_token))
        .routes(routes!(get_me, update_me, delete_me))
}
