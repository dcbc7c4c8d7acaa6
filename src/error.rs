//! Error types for the storage, registration, service and HTTP layers.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::registration::InvalidTransition};

/// Result alias for the invitation record store and the team formation controller.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Failures of the team formation workflow, surfaced unmodified to the caller.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The inviter or the invitee already occupies an invitation.
    #[error("an invitation is already active for `{email}`")]
    DuplicateInvite {
        /// Participant that is already occupied.
        email: String,
    },
    /// Operation attempted on a record or step in the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Another team already owns the requested name.
    #[error("team name `{name}` is already taken")]
    NameTaken {
        /// Requested display name.
        name: String,
    },
    /// Network or permission failure from the document store, or no store installed.
    #[error("document store unavailable: {message}")]
    StoreUnavailable {
        /// Failure description.
        message: String,
        /// Store error, absent in degraded mode.
        #[source]
        source: Option<StorageError>,
    },
    /// No resolved identity for an operation that requires one.
    #[error("not authenticated")]
    NotAuthenticated,
    /// No registered user owns the invited email.
    #[error("no registered user with email `{email}`")]
    InviteeNotFound {
        /// Email as typed by the inviter.
        email: String,
    },
    /// The signed-in user holds no eligible ticket.
    #[error("no valid ticket: {0}")]
    NoValidTicket(String),
    /// Malformed request data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Unknown session or document.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller lacks the admin flag.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl RegistrationError {
    /// Error returned while the application runs without a storage backend.
    pub fn degraded() -> Self {
        RegistrationError::StoreUnavailable {
            message: "degraded mode".into(),
            source: None,
        }
    }
}

impl From<StorageError> for RegistrationError {
    fn from(err: StorageError) -> Self {
        RegistrationError::StoreUnavailable {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<InvalidTransition> for RegistrationError {
    fn from(err: InvalidTransition) -> Self {
        RegistrationError::InvalidTransition(err.to_string())
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// The match engine answered with a payload that does not follow its schema.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The match engine rejected the request or could not be reached.
    #[error("match engine error: {message}")]
    Engine {
        /// HTTP status, absent when the engine was unreachable.
        status: Option<u16>,
        /// Detail from the engine or the transport.
        message: String,
    },

    /// Failure bubbled up from the registration workflow.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
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
    /// Authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Upstream service answered badly.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistrationError> for AppError {
    fn from(err: RegistrationError) -> Self {
        let message = err.to_string();
        match err {
            RegistrationError::DuplicateInvite { .. }
            | RegistrationError::InvalidTransition(_)
            | RegistrationError::NameTaken { .. } => AppError::Conflict(message),
            RegistrationError::StoreUnavailable { .. } => AppError::ServiceUnavailable(message),
            RegistrationError::NotAuthenticated => AppError::Unauthorized(message),
            RegistrationError::InviteeNotFound { .. } | RegistrationError::NotFound(_) => {
                AppError::NotFound(message)
            }
            RegistrationError::NoValidTicket(_) | RegistrationError::Forbidden(_) => {
                AppError::Forbidden(message)
            }
            RegistrationError::InvalidInput(_) => AppError::BadRequest(message),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::Protocol(message) => {
                AppError::BadGateway(format!("malformed match engine response: {message}"))
            }
            ServiceError::Engine {
                status: Some(status),
                message,
            } if (400..500).contains(&status) => AppError::BadRequest(message),
            ServiceError::Engine { message, .. } => AppError::BadGateway(message),
            ServiceError::Registration(inner) => inner.into(),
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
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
