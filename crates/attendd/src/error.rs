//! Flow outcomes that stop short of success.
//!
//! Every rejection carries a kind (client vs. server fault) and maps to
//! exactly one HTTP status. Internal faults are reported to clients as
//! `exception: <message>`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

/// Error taxonomy shared by enrollment and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed fields.
    Validation,
    /// Bad owner secret or bad password.
    Authorization,
    /// Outside the geofence.
    Location,
    /// Unknown user id.
    NotFound,
    /// No usable face in the image.
    Biometric,
    /// Anything unexpected.
    Internal,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("missing fields (required: {})", .0.join(", "))]
    MissingFields(&'static [&'static str]),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("not in allowed location")]
    OutsideGeofence,

    #[error("invalid owner security value")]
    InvalidOwnerSecret,

    #[error("id already exists")]
    DuplicateId,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid password")]
    InvalidPassword,

    #[error("no face detected")]
    NoFaceDetected,

    #[error("exception: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        FlowError::Internal(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::MissingFields(_)
            | FlowError::MalformedBody(_)
            | FlowError::InvalidImage(_)
            | FlowError::DuplicateId => ErrorKind::Validation,
            FlowError::InvalidOwnerSecret | FlowError::InvalidPassword => ErrorKind::Authorization,
            FlowError::OutsideGeofence => ErrorKind::Location,
            FlowError::UserNotFound => ErrorKind::NotFound,
            FlowError::NoFaceDetected => ErrorKind::Biometric,
            FlowError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::MissingFields(_)
            | FlowError::MalformedBody(_)
            | FlowError::InvalidImage(_)
            | FlowError::DuplicateId
            | FlowError::NoFaceDetected => StatusCode::BAD_REQUEST,
            FlowError::InvalidPassword => StatusCode::UNAUTHORIZED,
            FlowError::OutsideGeofence | FlowError::InvalidOwnerSecret => StatusCode::FORBIDDEN,
            FlowError::UserNotFound => StatusCode::NOT_FOUND,
            FlowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        match self {
            FlowError::Internal(msg) => {
                tracing::error!(message = %msg, "flow internal fault");
            }
            FlowError::InvalidOwnerSecret => {
                tracing::warn!("enrollment with invalid owner secret");
            }
            FlowError::InvalidPassword => {
                tracing::warn!("login with invalid password");
            }
            _ => {
                tracing::debug!(error = %self, kind = ?self.kind(), "request rejected");
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        self.log();
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
