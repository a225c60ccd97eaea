mod animation;
mod auth;
mod led_strip;
mod sse;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use ledstrip_surface::SurfaceError;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{animation::AnimationError, state::AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/login-required", get(login_required))
        .route("/led-strip", get(led_strip::get_led_strip))
        .route("/led-strip/fill", post(led_strip::fill))
        .route("/led-strip/clear", post(led_strip::clear))
        .route("/led-strip/led/:led_index/set", post(led_strip::set_led))
        .route("/led-strip/set", post(led_strip::set_strip))
        .route("/led-strip/brightness", get(led_strip::get_brightness))
        .route("/led-strip/brightness/set", post(led_strip::set_brightness))
        .route("/led-strip/animation", get(animation::status))
        .route("/led-strip/animation/start", post(animation::start))
        .route("/led-strip/animation/stop", delete(animation::stop))
        .route("/led-strip/animation/finished", get(animation::finished))
        .route("/events", get(sse::stream_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state)
}

/// Router with the CORS and request logging layers the binary serves.
pub fn build_app(state: AppState, log_requests: bool) -> Router {
    let router = build_router(state).layer(CorsLayer::permissive());
    if log_requests {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequiredResponse {
    login_required: bool,
}

async fn login_required(State(state): State<AppState>) -> Json<LoginRequiredResponse> {
    Json(LoginRequiredResponse {
        login_required: state.auth().required,
    })
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Conflict(String),
    Timeout(String),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg)),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg)),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", Some(msg))
            }
        };
        (status, Json(ApiErrorBody { error, message })).into_response()
    }
}

impl From<AnimationError> for ApiError {
    fn from(err: AnimationError) -> Self {
        let message = err.to_string();
        match err {
            AnimationError::EmptyScript
            | AnimationError::ScriptTooLarge { .. }
            | AnimationError::ScriptContainsNul
            | AnimationError::Surface(SurfaceError::IndexOutOfRange { .. })
            | AnimationError::Surface(SurfaceError::LengthMismatch { .. }) => {
                ApiError::BadRequest(message)
            }
            AnimationError::NoActiveSession
            | AnimationError::AnimationRunning
            | AnimationError::SessionEnded => ApiError::Conflict(message),
            AnimationError::QueryTimedOut(_) => ApiError::Timeout(message),
            AnimationError::SpawnFailed(_)
            | AnimationError::ChannelClosed
            | AnimationError::Surface(SurfaceError::Sink(_))
            | AnimationError::ManagerClosed => ApiError::Internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Unwrap a JSON body, turning extractor rejections into a 400 with a JSON
/// error body.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(ApiError::from)
}
