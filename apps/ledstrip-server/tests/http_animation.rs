//! HTTP round trips that start real animator processes.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use ledstrip_server::{
    animation::{AnimationManager, AnimatorCommand},
    routes::build_router,
    state::{AppState, AuthSettings},
};
use ledstrip_surface::LedSurface;
use serde_json::{json, Value};
use tokio::time::timeout;
use tower::util::ServiceExt;

fn app(led_count: usize) -> Router {
    let surface = Arc::new(LedSurface::new(led_count));
    let animations = AnimationManager::spawn(
        surface,
        AnimatorCommand::new(env!("CARGO_BIN_EXE_ledstrip-server")),
        Duration::from_secs(5),
    );
    build_router(AppState::with_parts(animations, AuthSettings::default()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = timeout(
        Duration::from_secs(10),
        app.clone().oneshot(request.body(body).unwrap()),
    )
    .await
    .expect("request timed out")
    .unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test(flavor = "multi_thread")]
async fn animation_lifecycle_over_http() {
    let app = app(2);

    let (status, body) = send(
        &app,
        "POST",
        "/led-strip/animation/start",
        Some(json!({
            "animationScript": "led_controller.fill_leds(rgb(0, 0, 200)).show(); sleep(1500);",
            "brightness": 50
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", "/led-strip/animation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"]["id"], session_id.as_str());
    assert_eq!(body["active"]["state"], "running");

    let (status, body) = send(&app, "POST", "/led-strip/clear", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = send(&app, "GET", "/led-strip/brightness", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "brightness": 50 }));

    let (status, body) = send(&app, "GET", "/led-strip/animation/finished", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "outcome": "finished" }));

    let (status, body) = send(&app, "GET", "/led-strip/animation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], Value::Null);
    assert_eq!(body["last"]["state"], "finished");
}

#[tokio::test(flavor = "multi_thread")]
async fn strip_is_read_from_the_running_animation() {
    let app = app(3);

    let (status, _) = send(
        &app,
        "POST",
        "/led-strip/animation/start",
        Some(json!({
            "animationScript": "led_controller.set_led(1, rgb(10, 20, 30)).show(); sleep(10000);"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let off = json!({ "red": 0, "green": 0, "blue": 0 });
    let lit = json!({ "red": 10, "green": 20, "blue": 30 });
    let mut strip = Value::Null;
    for _ in 0..50 {
        let (status, body) = send(&app, "GET", "/led-strip", None).await;
        assert_eq!(status, StatusCode::OK);
        strip = body["ledStrip"].clone();
        if strip[1] == lit {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(strip, json!([off, lit, off]));

    let (status, body) = send(&app, "DELETE", "/led-strip/animation/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "stopped": true }));

    let (status, body) = send(&app, "GET", "/led-strip", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ledStrip"], json!([off, off, off]));
}
