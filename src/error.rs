use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{resolver::SubmitRejection, state_machine::PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The caller is not part of the room.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Request collides with the current room (full room, stale round, duplicate submission).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Whether the client may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RoomNotFound { code } => {
                ServiceError::NotFound(format!("room `{code}` not found"))
            }
            StorageError::DuplicateRoom { .. } | StorageError::VersionConflict { .. } => {
                ServiceError::Conflict(err.to_string())
            }
            StorageError::Rejected(rejection) => rejection.into(),
            StorageError::Unavailable { .. } | StorageError::Unsupported { .. } => {
                ServiceError::Unavailable(err)
            }
        }
    }
}

impl From<SubmitRejection> for ServiceError {
    fn from(err: SubmitRejection) -> Self {
        match err {
            SubmitRejection::AlreadySubmitted | SubmitRejection::StaleRound { .. } => {
                ServiceError::Conflict(err.to_string())
            }
            SubmitRejection::NotAMember(_) => ServiceError::Unauthorized(err.to_string()),
            SubmitRejection::RoomClosed(_)
            | SubmitRejection::OpponentMissing
            | SubmitRejection::NotPlaying(_) => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
            PlanError::NotAMember(_) => ServiceError::Unauthorized(err.to_string()),
            PlanError::RoomClosed(_) => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) | ServiceError::Conflict(message) => {
                AppError::Conflict(message)
            }
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
