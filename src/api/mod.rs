mod apikeys;
pub mod schemas;
mod stats;
mod tasks;
mod users;

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, rejection::JsonRejection},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use utoipa::{
    Modify, OpenApi, ToSchema,
    openapi::{
        OpenApi as OpenApiSpec,
        security::{ApiKey as OpenApiKeyScheme, ApiKeyValue, HttpBuilder, SecurityScheme},
    },
};
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

use crate::auth;
use crate::engine::Engine;
use crate::error::Error;
use crate::model::User;
use crate::store::{ApiKeyStore, UserStore};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: usize,
    pub hostname: String,
}

/// Shared handler state: the engine handles plus the JWT signing secret.
#[derive(Clone)]
pub struct Context {
    pub engine: Engine,
    pub secret_key: String,
}

#[derive(OpenApi)]
#[openapi(
  info(title = "Cronpost",),
  components(),
  security(("bearer_auth" = []), ("api_key" = [])),
  modifiers(&AuthSchemes)
)]
struct MyOpenApiSpec;

struct AuthSchemes;

impl Modify for AuthSchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                    .build(),
            ),
        );
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(OpenApiKeyScheme::Header(ApiKeyValue::new("X-API-KEY"))),
        );
    }
}

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(T);

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        match value {
            JsonRejection::JsonDataError(json_data_error) => {
                ApiError::unprocessable(Some(&json_data_error.body_text()))
            }
            JsonRejection::JsonSyntaxError(json_syntax_error) => {
                ApiError::bad_request(Some(&json_syntax_error.body_text()))
            }
            JsonRejection::MissingJsonContentType(missing_json_content_type) => {
                ApiError::bad_request(Some(&missing_json_content_type.body_text()))
            }
            JsonRejection::BytesRejection(bytes_rejection) => {
                ApiError::bad_request(Some(&bytes_rejection.body_text()))
            }
            _ => ApiError::bad_request(None),
        }
    }
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        match value {
            Error::BadInput(message) => ApiError::unprocessable(Some(&message)),
            Error::BadCron(detail) => {
                ApiError::bad_request(Some(&format!("Invalid cron expression: {detail}")))
            }
            Error::AuthRequired => ApiError::unauthorized(None),
            Error::NotFound => ApiError::not_found(),
            Error::Conflict(message) => ApiError::bad_request(Some(&message)),
            Error::Registry(message) => ApiError::bad_request(Some(&message)),
            Error::Queue(message) => {
                tracing::error!("queue error surfaced to the api: {message}");
                ApiError::internal_server_error(Some(&message))
            }
            Error::Database(err) => {
                tracing::error!("Database error: {err:?}");
                ApiError::internal_server_error(Some(&err.to_string()))
            }
            other => ApiError::internal_server_error(Some(&other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing)]
    #[schema(ignore)]
    code: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.code, Json(self)).into_response()
    }
}

impl ApiError {
    pub fn internal_server_error(message: Option<&str>) -> Self {
        ApiError {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.unwrap_or("Internal server error").to_string(),
        }
    }

    pub fn not_found() -> Self {
        ApiError {
            code: StatusCode::NOT_FOUND,
            message: "Not Found".to_string(),
        }
    }

    pub fn bad_request(message: Option<&str>) -> Self {
        ApiError {
            code: StatusCode::BAD_REQUEST,
            message: message.unwrap_or("Bad request").to_string(),
        }
    }

    pub fn unprocessable(message: Option<&str>) -> Self {
        ApiError {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.unwrap_or("Unprocessable entity").to_string(),
        }
    }

    pub fn unauthorized(message: Option<&str>) -> Self {
        ApiError {
            code: StatusCode::UNAUTHORIZED,
            message: message.unwrap_or("Unauthorized").to_string(),
        }
    }
}

/// The authenticated caller, resolved from a Bearer JWT or an X-API-KEY
/// header. Ownership scoping everywhere else keys off this user's id.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<Context> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        ctx: &Context,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if let Some(token) = bearer {
            if let Some(user_id) = auth::verify_token(token, &ctx.secret_key)
                && let Some(user) = ctx.engine.store.user_by_id(user_id).await?
            {
                return Ok(CurrentUser(user));
            }

            return Err(ApiError::unauthorized(None));
        }

        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|h| h.to_str().ok());

        if let Some(presented) = api_key {
            if presented.len() >= auth::API_KEY_PREFIX_LEN {
                let prefix = &presented[..auth::API_KEY_PREFIX_LEN];
                let candidates = ctx.engine.store.api_keys_by_prefix(prefix).await?;
                let now = Utc::now();

                for candidate in candidates {
                    if candidate.is_usable(now)
                        && auth::verify_api_key(presented, &candidate.key_hash)
                        && let Some(user) = ctx.engine.store.user_by_id(candidate.user_id).await?
                    {
                        return Ok(CurrentUser(user));
                    }
                }
            }

            return Err(ApiError::unauthorized(None));
        }

        Err(ApiError::unauthorized(None))
    }
}

pub async fn start(config: Config, context: Context) -> anyhow::Result<()> {
    let router = create_router();
    let spec = create_spec();

    let scalar = Scalar::with_url("/docs", spec);

    let app: Router = router
        .route("/docs/openapi.json", get(openapi_json))
        .merge(scalar)
        .with_state(context);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.hostname, config.port)).await?;
    println!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_router() -> OpenApiRouter<Context> {
    OpenApiRouter::new()
        .merge(tasks::init_router())
        .merge(users::init_router())
        .merge(apikeys::init_router())
        .merge(stats::init_router())
}

fn create_router() -> Router<Context> {
    let (router, _) = init_router().split_for_parts();

    router
}

fn create_spec() -> OpenApiSpec {
    let (_, spec) = init_router().split_for_parts();

    MyOpenApiSpec::openapi().merge_from(spec)
}

async fn openapi_json() -> Json<Value> {
    let spec = create_spec();
    Json(serde_json::to_value(spec).unwrap())
}
