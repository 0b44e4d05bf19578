use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use livefeed_common::detection::DetectionRecord;
use livefeed_pipeline::controller::StreamLifecycleState;
use livefeed_pipeline::mjpeg;
use livefeed_pipeline::stream::StreamEncoder;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /start_stream
pub async fn start_stream(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let transition = state.controller.start()?;
    debug!(?transition, "start_stream");
    Ok(Json(json!({ "status": "started" })))
}

/// POST /stop_stream
pub async fn stop_stream(State(state): State<Arc<AppState>>) -> Json<Value> {
    let transition = state.controller.stop();
    debug!(?transition, "stop_stream");
    Json(json!({ "status": "stopped" }))
}

/// GET /video_feed. 204 while stopped, otherwise an endless MJPEG body that
/// ends when the stream is stopped.
pub async fn video_feed(State(state): State<Arc<AppState>>) -> Response {
    let Some(ticket) = state.controller.ticket() else {
        return (StatusCode::NO_CONTENT, [("x-stream-status", "Stream is off")]).into_response();
    };
    let encoder = StreamEncoder::new(
        Arc::clone(state.controller.shared()),
        ticket,
        state.encoder.clone(),
    );
    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(encoder.into_stream()),
    )
        .into_response()
}

/// GET /detections
pub async fn detections(State(state): State<Arc<AppState>>) -> Json<Vec<DetectionRecord>> {
    Json(state.detections.latest().to_vec())
}

/// GET /stream_status
pub async fn stream_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = match state.controller.state() {
        StreamLifecycleState::Running => "running",
        StreamLifecycleState::Stopped => "stopped",
    };
    Json(json!({
        "status": status,
        "version": state.controller.shared().version(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::testing::{self, ScriptedCamera};

    async fn call(app: &axum::Router, method: &str, uri: &str) -> axum::response::Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn video_feed_is_no_content_before_start() {
        let (app, _state) = testing::app(ScriptedCamera::endless());
        let response = call(&app, "GET", "/video_feed").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-stream-status"], "Stream is off");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn detections_empty_before_any_capture() {
        let (app, _state) = testing::app(ScriptedCamera::endless());
        let response = call(&app, "GET", "/detections").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!([]));
    }

    #[cfg(not(feature = "v4l"))]
    #[tokio::test]
    async fn default_config_without_camera_support_keeps_serving() {
        use livefeed_common::config::Config;
        use livefeed_pipeline::{annotate, camera};

        let config = Config::from_toml("").unwrap();
        let (app, state) = testing::wire(
            &config,
            camera::from_config(&config.camera),
            annotate::detector_from_config(&config.detector),
        );

        let response = call(&app, "POST", "/start_stream").await;
        assert_eq!(response.status(), StatusCode::OK);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while state.controller.is_running() {
            assert!(tokio::time::Instant::now() < deadline, "failed start never reset");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let response = call(&app, "GET", "/video_feed").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = call(&app, "GET", "/detections").await;
        assert_eq!(json_body(response).await, json!([]));
        let status = json_body(call(&app, "GET", "/stream_status").await).await;
        assert_eq!(status["status"], "stopped");
        assert!(state.controller.shutdown(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (app, state) = testing::app(ScriptedCamera::endless());
        for _ in 0..2 {
            let response = call(&app, "POST", "/start_stream").await;
            assert_eq!(json_body(response).await, json!({ "status": "started" }));
        }
        let status = json_body(call(&app, "GET", "/stream_status").await).await;
        assert_eq!(status["status"], "running");

        for _ in 0..3 {
            let response = call(&app, "POST", "/stop_stream").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await, json!({ "status": "stopped" }));
        }
        let status = json_body(call(&app, "GET", "/stream_status").await).await;
        assert_eq!(status["status"], "stopped");
        assert!(state.controller.shutdown(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn detections_follow_captured_frames_and_feed_closes_on_stop() {
        let camera = ScriptedCamera::limited(3);
        let served = camera.served();
        let (app, state) = testing::app(camera);

        call(&app, "POST", "/start_stream").await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let detections = loop {
            let body = json_body(call(&app, "GET", "/detections").await).await;
            if body != json!([]) {
                break body;
            }
            assert!(tokio::time::Instant::now() < deadline, "no detections published");
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(detections, json!([{ "label": "person", "confidence": 0.91 }]));

        call(&app, "POST", "/stop_stream").await;
        let response = call(&app, "GET", "/video_feed").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(state.controller.shutdown(Duration::from_secs(2)).await);
        assert_eq!(served.load(std::sync::atomic::Ordering::SeqCst), 3);
        // Detections survive the stop.
        let body = json_body(call(&app, "GET", "/detections").await).await;
        assert_eq!(body, detections);
    }

    #[tokio::test]
    async fn video_feed_streams_parts_until_stopped() {
        let (app, state) = testing::app(ScriptedCamera::endless());
        call(&app, "POST", "/start_stream").await;

        let response = call(&app, "GET", "/video_feed").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(first.ends_with(b"\r\n"));

        call(&app, "POST", "/stop_stream").await;
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(frame) = body.frame().await {
                frame.unwrap();
            }
        })
        .await;
        assert!(drained.is_ok(), "stream did not end after stop");
        assert!(state.controller.shutdown(Duration::from_secs(2)).await);
    }
}
