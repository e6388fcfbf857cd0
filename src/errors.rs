use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::approval::ApprovalStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown approval token")]
    UnknownToken,

    #[error("record {project_id} is {status}")]
    InvalidState {
        project_id: String,
        status: ApprovalStatus,
    },

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record {0} was already notified")]
    AlreadyNotified(String),

    #[error("recipient rejected: {0}")]
    RecipientRejected(String),

    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("record {0} changed while it was being updated")]
    StoreConflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller can expect a plain retry to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RecipientRejected(_)
                | AppError::StoreConflict(_)
                | AppError::Store(_)
                | AppError::Internal(_)
        )
    }

    /// Stable machine-readable code, also used in `acta.notify_failed` events.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::UnknownToken => "unknown_token",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::RecordNotFound(_) => "record_not_found",
            AppError::AlreadyNotified(_) => "already_notified",
            AppError::RecipientRejected(_) => "recipient_rejected",
            AppError::ArtifactMissing(_) => "artifact_missing",
            AppError::StoreConflict(_) => "store_conflict",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Internal(_) | AppError::Store(_) => "internal_server_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnknownToken | AppError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. }
            | AppError::AlreadyNotified(_)
            | AppError::StoreConflict(_) => StatusCode::CONFLICT,
            AppError::RecipientRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::ArtifactMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_type, msg) = match &self {
            AppError::Store(e) => {
                tracing::error!("Store error: {:#}", e);
                ("internal_error", "internal server error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                ("internal_error", "internal server error".to_string())
            }
            AppError::RecipientRejected(_) | AppError::StoreConflict(_) => {
                ("delivery_error", self.to_string())
            }
            AppError::UnknownToken | AppError::RecordNotFound(_) => {
                ("not_found_error", self.to_string())
            }
            _ => ("invalid_request_error", self.to_string()),
        };

        let body = Json(json!({
            "statusCode": status.as_u16(),
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}
