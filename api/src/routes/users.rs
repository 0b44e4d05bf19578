use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;
use crate::users::{ApprovalStatus, LoginOutcome, UserError, UserSummary};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    email: String,
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "failure", "message": message }))).into_response()
}

/// POST /signup
pub async fn signup(State(state): State<Arc<AppState>>, Json(body): Json<Credentials>) -> Response {
    if body.email.is_empty() || body.password.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Email and password are required");
    }
    match state.users.signup(&body.email, &body.password) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(json!({
                "status": "pending",
                "message": "Signup request submitted. Awaiting admin approval.",
            })),
        )
            .into_response(),
        Err(e) => failure(StatusCode::CONFLICT, &e.to_string()),
    }
}

/// POST /login
pub async fn login(State(state): State<Arc<AppState>>, Json(body): Json<Credentials>) -> Response {
    match state.users.login(&body.email, &body.password) {
        LoginOutcome::Success(user) => Json(json!({
            "status": "success",
            "role": user.role,
            "id": user.id,
            "name": user.name,
            "email": user.email,
            "stats": {
                "totalDetections": 0,
                "mostCommonObject": "N/A",
                "detectionAccuracy": 0.0,
                "recentUploads": 0,
            },
        }))
        .into_response(),
        LoginOutcome::Pending => (
            StatusCode::FORBIDDEN,
            Json(json!({ "status": "pending", "message": "Account awaiting approval" })),
        )
            .into_response(),
        LoginOutcome::Failure => failure(StatusCode::UNAUTHORIZED, "Invalid credentials"),
    }
}

/// GET /pending_users
pub async fn pending_users(State(state): State<Arc<AppState>>) -> Json<Vec<UserSummary>> {
    Json(state.users.list(ApprovalStatus::Pending))
}

/// GET /approved_users
pub async fn approved_users(State(state): State<Arc<AppState>>) -> Json<Vec<UserSummary>> {
    Json(state.users.list(ApprovalStatus::Approved))
}

/// POST /approve_user
pub async fn approve_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApproveRequest>,
) -> Response {
    match state.users.approve(&body.email) {
        Ok(_) => Json(json!({ "status": "success", "message": "User approved" })).into_response(),
        Err(e @ UserError::NotFound) => failure(StatusCode::NOT_FOUND, &e.to_string()),
        Err(e) => failure(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}
