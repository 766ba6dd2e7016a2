//! HTTP API error types

use reqwest::StatusCode;

/// Error from a REST call made by [`crate::http::ApiClient`]
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // CSRF errors
    #[error("CSRF token not available; mutating request not sent")]
    MissingCsrfToken,
    #[error("Request rejected by CSRF protection")]
    CsrfRejected,

    // Status errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Resource not found")]
    NotFound,
    #[error("Too many requests")]
    RateLimited,
    #[error("Server returned status {0}")]
    Status(u16),

    // Transport errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Map a non-success status onto an error
    ///
    /// The backend answers a failed CSRF check with 403, so every 403 on a
    /// mutating request is reported as a CSRF rejection.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::CsrfRejected,
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            other => ApiError::Status(other.as_u16()),
        }
    }

    /// Stable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingCsrfToken => "MISSING_CSRF_TOKEN",
            ApiError::CsrfRejected => "CSRF_REJECTED",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Status(_) => "HTTP_STATUS",
            ApiError::Http(_) => "HTTP_ERROR",
            ApiError::InvalidUrl(_) => "INVALID_URL",
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
