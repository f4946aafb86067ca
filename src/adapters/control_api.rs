//! JSON control API over HTTP.
//!
//! Thin axum router forwarding to any [`ServerControl`]; the binary mounts it
//! on `control.listen_addr` in front of the command channel.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{
    core::error::PreviewError,
    ports::{
        managed_server::ServerInfo,
        server_control::{ServerControl, ServerSummary},
    },
};

type SharedControl = Arc<dyn ServerControl>;

#[derive(Debug, Deserialize)]
pub struct RootRequest {
    pub root: String,
}

#[derive(Debug, Deserialize)]
pub struct FiltersRequest {
    pub root: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimeoutRequest {
    pub timeout_ms: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// Error type for control handlers
pub struct ApiError(PreviewError);

impl From<PreviewError> for ApiError {
    fn from(err: PreviewError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PreviewError::NotFound(_) => StatusCode::NOT_FOUND,
            PreviewError::InvalidRoot { .. } => StatusCode::BAD_REQUEST,
            PreviewError::Disconnected => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Control command failed: {}", self.0);
        } else {
            tracing::debug!("Control command rejected: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the control router.
pub fn router(control: SharedControl) -> Router {
    Router::new()
        .route("/servers", get(list_servers).post(start_server))
        .route("/servers/close", post(close_server))
        .route("/servers/filters", put(set_filters))
        .route("/interception/timeout", put(set_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

async fn list_servers(
    State(control): State<SharedControl>,
) -> Result<Json<Vec<ServerSummary>>, ApiError> {
    Ok(Json(control.servers().await?))
}

async fn start_server(
    State(control): State<SharedControl>,
    Json(request): Json<RootRequest>,
) -> Result<Json<ServerInfo>, ApiError> {
    Ok(Json(control.get_server(&request.root).await?))
}

async fn close_server(
    State(control): State<SharedControl>,
    Json(request): Json<RootRequest>,
) -> Result<StatusCode, ApiError> {
    control.close_server(&request.root).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_filters(
    State(control): State<SharedControl>,
    Json(request): Json<FiltersRequest>,
) -> Result<StatusCode, ApiError> {
    control
        .set_filtered_paths(&request.root, request.paths)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_timeout(
    State(control): State<SharedControl>,
    Json(request): Json<TimeoutRequest>,
) -> Result<StatusCode, ApiError> {
    control.set_interception_timeout(request.timeout_ms).await?;
    Ok(StatusCode::NO_CONTENT)
}
