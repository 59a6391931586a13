// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::database::StoreError;
use crate::filter::error::FilterError;

/// Numeric error codes understood by client SDKs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    OtherCause,
    InternalServerError,
    ObjectNotFound,
    InvalidQuery,
    InvalidClassName,
    InvalidJson,
    PushMisconfigured,
    OperationForbidden,
    InvalidEmailAddress,
    UsernameMissing,
    PasswordMissing,
    UsernameTaken,
    EmailTaken,
    EmailMissing,
    EmailNotFound,
    SessionMissing,
    InvalidSessionToken,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::OtherCause => -1,
            ErrorCode::InternalServerError => 1,
            ErrorCode::ObjectNotFound => 101,
            ErrorCode::InvalidQuery => 102,
            ErrorCode::InvalidClassName => 103,
            ErrorCode::InvalidJson => 107,
            ErrorCode::PushMisconfigured => 115,
            ErrorCode::OperationForbidden => 119,
            ErrorCode::InvalidEmailAddress => 125,
            ErrorCode::UsernameMissing => 200,
            ErrorCode::PasswordMissing => 201,
            ErrorCode::UsernameTaken => 202,
            ErrorCode::EmailTaken => 203,
            ErrorCode::EmailMissing => 204,
            ErrorCode::EmailNotFound => 205,
            ErrorCode::SessionMissing => 206,
            ErrorCode::InvalidSessionToken => 209,
        }
    }
}

/// Errors produced by route handlers, guards and the lockout policy.
///
/// Every failure travels as `Err(ApiError)`; nothing is ever encoded as an
/// error-shaped success value.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// A coded domain error, rendered as `{"code": .., "error": ..}`
    #[error("{message}")]
    Domain { code: ErrorCode, message: String },

    /// The principal crossed the failed-login threshold and the lockout has not expired
    #[error("Your account is locked due to multiple failed login attempts. Please try again after {duration_minutes} minute(s)")]
    AccountLocked { duration_minutes: u32 },

    /// Transport-level rejection (missing master key, wrong application id)
    #[error("{0}")]
    Unauthorized(String),

    /// No registered route matches the request
    #[error("cannot route {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Programming errors and unexpected backend failures
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::Domain {
            code,
            message: message.into(),
        }
    }

    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObjectNotFound, message)
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidJson, message)
    }

    pub fn operation_forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationForbidden, message)
    }

    pub fn invalid_session_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSessionToken, message)
    }

    pub fn invalid_credentials() -> Self {
        Self::object_not_found("Invalid username/password.")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    /// Numeric error code; transport-level errors carry none
    pub fn code(&self) -> Option<i32> {
        match self {
            ApiError::Domain { code, .. } => Some(code.as_i32()),
            ApiError::AccountLocked { .. } => Some(ErrorCode::ObjectNotFound.as_i32()),
            ApiError::RouteNotFound { .. } => Some(ErrorCode::InvalidJson.as_i32()),
            ApiError::Internal(_) => Some(ErrorCode::InternalServerError.as_i32()),
            ApiError::Unauthorized(_) => None,
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Domain { code, .. } => match code {
                ErrorCode::InternalServerError => 500,
                ErrorCode::ObjectNotFound => 404,
                _ => 400,
            },
            ApiError::AccountLocked { .. } => 404,
            ApiError::Unauthorized(_) => 403,
            ApiError::RouteNotFound { .. } => 404,
            ApiError::Internal(_) => 500,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::Unauthorized(message) => json!({ "error": message }),
            // Internal details stay in the logs
            ApiError::Internal(_) => json!({
                "code": ErrorCode::InternalServerError.as_i32(),
                "error": "Internal server error."
            }),
            _ => json!({
                "code": self.code(),
                "error": self.to_string()
            }),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound => ApiError::object_not_found("Object not found."),
            StoreError::Filter(e) => e.into(),
            StoreError::Unsupported(msg) => ApiError::new(ErrorCode::InvalidQuery, msg),
            StoreError::InvalidClassName(name) => {
                ApiError::new(ErrorCode::InvalidClassName, format!("invalid className: {}", name))
            }
            StoreError::Duplicate(msg) => ApiError::new(ErrorCode::OtherCause, msg),
            StoreError::InvalidUpdate(msg) => ApiError::invalid_json(msg),
            other => {
                // Log the real error but return generic message
                tracing::error!("Store error: {}", other);
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::new(ErrorCode::InvalidQuery, err.to_string())
    }
}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
