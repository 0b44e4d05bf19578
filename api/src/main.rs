mod error;
mod routes;
mod state;
mod users;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use livefeed_common::config::Config;
use livefeed_pipeline::annotate::{self, OverlayAnnotator};
use livefeed_pipeline::camera;
use livefeed_pipeline::capture::{CaptureLoop, CaptureSettings};
use livefeed_pipeline::controller::StreamController;
use livefeed_pipeline::shared::SharedFrameState;
use tracing::{error, info, warn};

use crate::state::AppState;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let backend = camera::from_config(&config.camera);
    let detector = annotate::detector_from_config(&config.detector);
    info!(
        camera = backend.name(),
        detector = detector.name(),
        frame_skip = config.capture.frame_skip,
        "pipeline configured"
    );

    let shared = Arc::new(SharedFrameState::new(config.camera.width, config.camera.height));
    let capture = CaptureLoop::new(
        backend,
        Arc::new(OverlayAnnotator::new(Arc::clone(&detector))),
        Arc::clone(&shared),
        CaptureSettings::from_config(&config),
    );
    let controller = StreamController::new(capture, shared);
    let state = Arc::new(AppState::new(controller.clone(), detector, &config));
    let app = routes::router(state, &config);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(addr, "livefeed server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let on_signal = controller.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
            // Ends open video feeds so the server can drain.
            on_signal.stop();
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "server error");
    }

    let timeout = Duration::from_millis(config.stream.shutdown_timeout_ms);
    if !controller.shutdown(timeout).await {
        warn!(?timeout, "capture thread did not release the camera in time");
    }
    info!("livefeed server stopped");
}
