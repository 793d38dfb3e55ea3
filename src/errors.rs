use crate::services::{record_store::RecordError, upload_service::UploadError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;
use tracing::{error, warn};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Extra machine-readable fields, e.g. which chunk is missing.
    pub details: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidSession(upload_id) => AppError::bad_request("Invalid upload_id")
                .with_details(json!({ "upload_id": upload_id })),
            UploadError::MissingChunk { upload_id, index } => {
                AppError::bad_request(format!("Missing chunk {}", index)).with_details(json!({
                    "upload_id": upload_id,
                    "missing_index": index
                }))
            }
            err @ (UploadError::ChunkOutOfRange { .. } | UploadError::InvalidRequest(_)) => {
                AppError::bad_request(err.to_string())
            }
            UploadError::ChunkTooLarge { limit } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Chunk exceeds {} bytes", limit),
            )
            .with_details(json!({ "limit": limit })),
            UploadError::BodyAborted(reason) => {
                warn!("chunk body aborted by client: {}", reason);
                AppError::bad_request(format!("Chunk body aborted: {}", reason))
            }
            other => {
                error!("upload storage failure: {}", other);
                AppError::internal(other.to_string())
            }
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        error!("record store failure: {}", err);
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_body_failures_are_not_server_errors() {
        let too_large = AppError::from(UploadError::ChunkTooLarge { limit: 1024 });
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(too_large.details, Some(json!({ "limit": 1024 })));

        let aborted = AppError::from(UploadError::BodyAborted("connection reset".into()));
        assert_eq!(aborted.status, StatusCode::BAD_REQUEST);

        let io = AppError::from(UploadError::Io(std::io::Error::other("disk full")));
        assert_eq!(io.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
