//! Error types for the sampling and extraction pipeline.
//!
//! Detector faults during a scan are recoverable (the frame is skipped with a
//! warning) and never surface here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot open video file {path}: {reason}")]
    FileOpen { path: String, reason: anyhow::Error },

    /// The container reports a frame rate of zero (malformed or variable-rate
    /// source). Surfaced before any frame arithmetic happens.
    #[error("{path} reports a frame rate of zero")]
    InvalidFrameRate { path: String },

    /// The requested timestamp resolves past the end of the stream.
    #[error("no readable frame at {seconds}s (frame {frame})")]
    Seek { seconds: u64, frame: u64 },

    #[error("decoder error: {0}")]
    Decode(anyhow::Error),

    #[error("failed to encode crop: {0}")]
    Encode(anyhow::Error),
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let status = match &self {
            ExtractError::FileOpen { .. } => StatusCode::NOT_FOUND,
            ExtractError::InvalidFrameRate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExtractError::Seek { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExtractError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExtractError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        tracing::error!("{} - {}", status.as_u16(), message);

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
