mod stream;
mod upload;
mod users;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use livefeed_common::config::Config;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>, config: &Config) -> Router {
    let app = Router::new()
        .route("/start_stream", post(stream::start_stream))
        .route("/stop_stream", post(stream::stop_stream))
        .route("/video_feed", get(stream::video_feed))
        .route("/detections", get(stream::detections))
        .route("/stream_status", get(stream::stream_status))
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(config.upload.max_bytes)),
        )
        .route("/signup", post(users::signup))
        .route("/login", post(users::login))
        .route("/pending_users", get(users::pending_users))
        .route("/approved_users", get(users::approved_users))
        .route("/approve_user", post(users::approve_user))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.server.cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
