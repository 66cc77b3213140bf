use axum::http::header::InvalidHeaderValue;
use thiserror::Error;

/// Startup and configuration errors.
///
/// None of these are produced while serving a request: rules are compiled and
/// validated once, before the middleware is installed.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid proxy rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse rule configuration: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub(crate) fn invalid_rule(index: usize, reason: impl Into<String>) -> Self {
        AppError::InvalidRule {
            index,
            reason: reason.into(),
        }
    }
}

/// Per-request fault raised while rewriting headers.
///
/// Always swallowed by the middleware's fail-open boundary; the request is
/// forwarded with its headers untouched.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("resolved address is not a valid header value: {0}")]
    HeaderValue(#[from] InvalidHeaderValue),

    #[error("rule evaluation panicked: {0}")]
    Panicked(String),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
