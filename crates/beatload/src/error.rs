//! Error types for the load harness.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the application API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("{operation} failed: {status} - {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} was rate limited by the server: {body}")]
    RateLimited {
        operation: &'static str,
        body: String,
    },

    #[error("no session cookie received from {operation}")]
    MissingSession { operation: &'static str },

    #[error("unexpected response from {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },
}

impl ApiError {
    /// Build the error for a non-success response, classifying rate limits.
    pub fn from_status(operation: &'static str, status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || body.contains("Too many requests") {
            Self::RateLimited { operation, body }
        } else {
            Self::Status {
                operation,
                status,
                body,
            }
        }
    }

    pub fn invalid_response(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("authentication failed: {0}")]
    Authentication(ApiError),

    #[error("event stream error: {0}")]
    Stream(String),

    #[error("timed out after {0:?} waiting for the event stream handshake")]
    HandshakeTimeout(Duration),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("board setup failed: {0}")]
    Setup(String),

    #[error("run aborted, server is rate limiting: {0}")]
    RateLimited(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Whether this error means the server is throttling the harness.
    ///
    /// A throttled run produces meaningless delivery numbers, so callers treat
    /// this as fatal for the whole run.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Api(e) | Self::Authentication(e) => e.is_rate_limited(),
            Self::RateLimited(_) => true,
            _ => false,
        }
    }
}
