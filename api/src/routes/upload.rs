use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use livefeed_common::detection::{round2, BoundingBox};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDetection {
    label: String,
    confidence: f64,
    bounding_box: BoundingBox,
    image_width: u32,
    image_height: u32,
}

/// POST /upload. Runs the detector on one image from the `file` field.
/// The image is dropped once the response is built.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadDetection>>, ApiError> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            file = Some(field.bytes().await?);
            break;
        }
    }
    let Some(bytes) = file.filter(|b| !b.is_empty()) else {
        return Err(ApiError::BadRequest("No file uploaded".into()));
    };

    let detector = Arc::clone(&state.detector);
    let size = bytes.len();
    let detections = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("Invalid image: {e}")))?
            .to_rgb8();
        let (image_width, image_height) = image.dimensions();
        let found = detector
            .detect(&image)
            .map_err(|e| ApiError::Inference(e.to_string()))?;
        Ok::<_, ApiError>(
            found
                .into_iter()
                .map(|d| UploadDetection {
                    label: d.label,
                    confidence: round2(d.confidence),
                    bounding_box: d.bbox,
                    image_width,
                    image_height,
                })
                .collect::<Vec<_>>(),
        )
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(bytes = size, count = detections.len(), "upload processed");
    Ok(Json(detections))
}
