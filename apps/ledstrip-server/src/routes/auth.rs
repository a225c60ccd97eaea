use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Uri},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

use super::ApiError;

/// Routes reachable without an API key.
const PUBLIC_PATHS: &[&str] = &["/login-required", "/healthz"];

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = state.auth();
    if !auth.required || PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let presented = extract_key(request.headers(), request.uri());
    match presented {
        Some(key) if auth.accepts(&key) => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}

fn extract_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| key.trim().to_owned())
        .or_else(|| query_key(uri))
}

fn query_key(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.remove("apiKey")
}
