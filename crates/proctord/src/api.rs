//! HTTP surface: frame upload and health/readiness.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use proctor_core::Gallery;
use proctor_hw::Frame;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Multipart field carrying the image.
const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Arc<Gallery>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid image")]
    InvalidImage,
    #[error("Upload too large")]
    TooLarge,
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("cannot encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidImage => StatusCode::BAD_REQUEST,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Engine(_) | ApiError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/recognize", post(recognize))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model_loaded": state.gallery.is_ready(),
        "gallery_size": state.gallery.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn recognize(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        tracing::debug!(error = %e, "rejected non-multipart upload");
        ApiError::InvalidImage
    })?;

    let bytes = read_upload(&mut multipart).await?;
    let frame = Frame::decode(&bytes).map_err(|e| {
        tracing::debug!(error = %e, len = bytes.len(), "undecodable upload");
        ApiError::InvalidImage
    })?;

    let result = state.engine.evaluate(frame).await?;
    Ok(Json(serde_json::to_value(result.report())?))
}

/// Bytes of the first `file` field.
async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() == Some(UPLOAD_FIELD) {
            return Ok(field.bytes().await.map_err(upload_error)?.to_vec());
        }
    }
    tracing::debug!("upload has no `{UPLOAD_FIELD}` field");
    Err(ApiError::InvalidImage)
}

/// Body-limit overruns are reported as such; any other multipart fault is a bad image.
fn upload_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::debug!(error = %e, "upload exceeds body limit");
        ApiError::TooLarge
    } else {
        tracing::debug!(error = %e, "malformed multipart body");
        ApiError::InvalidImage
    }
}
