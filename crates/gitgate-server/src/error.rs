//! Request failure kinds and their HTTP statuses.

use axum::http::StatusCode;
use gitgate_git::GitError;
use thiserror::Error;

/// Why a request was not served.
///
/// Handlers return `Result<Response, ApiError>`; the application maps the
/// error to a status in one place, [`ApiError::status`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown repository, malformed repository name, or an unroutable request.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request resolved outside the content root.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested service or command is not whitelisted.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// git could not be started.
    #[error("expectation failed: {0}")]
    ExpectationFailed(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The status line this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::ExpectationFailed(_) => StatusCode::EXPECTATION_FAILED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GitError> for ApiError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Launch { .. } => ApiError::ExpectationFailed(err.to_string()),
            GitError::UnknownService(_) => ApiError::MethodNotAllowed(err.to_string()),
            GitError::NotARepository(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
