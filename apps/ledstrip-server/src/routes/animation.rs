use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use ledstrip_proto::Brightness;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    animation::{AnimationStatus, SessionEnd},
    state::AppState,
};

use super::{json_body, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnimationRequest {
    pub animation_script: String,
    #[serde(default)]
    pub brightness: Option<Brightness>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnimationResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StopAnimationResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize)]
pub struct FinishedResponse {
    pub outcome: SessionEnd,
}

pub async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartAnimationRequest>, JsonRejection>,
) -> ApiResult<StartAnimationResponse> {
    let request = json_body(payload)?;
    let session = state
        .animations
        .start(request.animation_script, request.brightness)
        .await?;
    Ok(Json(StartAnimationResponse {
        session_id: session.id,
    }))
}

pub async fn stop(State(state): State<AppState>) -> ApiResult<StopAnimationResponse> {
    let stopped = state.animations.stop().await?;
    Ok(Json(StopAnimationResponse { stopped }))
}

/// Long-polls until the running animation ends.
pub async fn finished(State(state): State<AppState>) -> ApiResult<FinishedResponse> {
    let outcome = state.animations.await_finished().await?;
    Ok(Json(FinishedResponse { outcome }))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<AnimationStatus> {
    Ok(Json(state.animations.status().await?))
}
