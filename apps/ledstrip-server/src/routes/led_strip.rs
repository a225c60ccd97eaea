use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use ledstrip_proto::{Brightness, LedColor, LedStrip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{animation::StripWrite, state::AppState};

use super::{json_body, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorRequest {
    pub color: LedColor,
    #[serde(default)]
    pub brightness: Option<Brightness>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStripRequest {
    pub led_strip: LedStrip,
    #[serde(default)]
    pub brightness: Option<Brightness>,
}

#[derive(Debug, Deserialize)]
pub struct BrightnessRequest {
    pub brightness: Brightness,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedStripResponse {
    pub led_strip: LedStrip,
}

#[derive(Debug, Serialize)]
pub struct BrightnessResponse {
    pub brightness: Brightness,
}

pub async fn get_led_strip(State(state): State<AppState>) -> ApiResult<LedStripResponse> {
    let led_strip = state.animations.query_led_strip().await?;
    Ok(Json(LedStripResponse { led_strip }))
}

pub async fn fill(
    State(state): State<AppState>,
    payload: Result<Json<ColorRequest>, JsonRejection>,
) -> ApiResult<LedStripResponse> {
    let request = json_body(payload)?;
    write(&state, StripWrite::Fill(request.color), request.brightness).await
}

pub async fn clear(State(state): State<AppState>) -> ApiResult<LedStripResponse> {
    write(&state, StripWrite::Clear, None).await
}

pub async fn set_led(
    State(state): State<AppState>,
    Path(led_index): Path<String>,
    payload: Result<Json<ColorRequest>, JsonRejection>,
) -> ApiResult<LedStripResponse> {
    let led_count = state.animations.led_count();
    let index = led_index
        .parse::<usize>()
        .ok()
        .filter(|index| *index < led_count)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "led index must be between 0 and {} (received {led_index})",
                led_count.saturating_sub(1)
            ))
        })?;
    let request = json_body(payload)?;
    write(
        &state,
        StripWrite::Led {
            index,
            color: request.color,
        },
        request.brightness,
    )
    .await
}

pub async fn set_strip(
    State(state): State<AppState>,
    payload: Result<Json<SetStripRequest>, JsonRejection>,
) -> ApiResult<LedStripResponse> {
    let request = json_body(payload)?;
    write(&state, StripWrite::Strip(request.led_strip), request.brightness).await
}

pub async fn get_brightness(State(state): State<AppState>) -> ApiResult<BrightnessResponse> {
    let brightness = state.animations.brightness().await?;
    Ok(Json(BrightnessResponse { brightness }))
}

pub async fn set_brightness(
    State(state): State<AppState>,
    payload: Result<Json<BrightnessRequest>, JsonRejection>,
) -> ApiResult<BrightnessResponse> {
    let BrightnessRequest { brightness } = json_body(payload)?;
    state.animations.set_brightness(brightness).await?;
    debug!(%brightness, "brightness updated");
    Ok(Json(BrightnessResponse { brightness }))
}

async fn write(
    state: &AppState,
    write: StripWrite,
    brightness: Option<Brightness>,
) -> ApiResult<LedStripResponse> {
    let led_strip = state.animations.write_strip(write, brightness).await?;
    Ok(Json(LedStripResponse { led_strip }))
}
