//! Error type definitions shared by the gateway, the API and the worker.
//!
//! The hierarchy keeps adapter failures (`StorageError`, `QueueError`,
//! `AuthError`) as their own enums so call sites stay precise, while
//! `AppError` is the single type handlers return; its `IntoResponse`
//! implementation owns the HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Queue broker / result backend errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// KV cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Token and credential errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Request validation errors
    #[error("Validation error: {field} ({code}) - {message}")]
    Validation {
        field: String,
        code: String,
        message: String,
    },

    /// Missing or rejected credentials
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Authenticated but not allowed
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Request budget exhausted for the current window
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Upstream refused the connection
    #[error("Upstream unavailable: {service}")]
    UpstreamUnavailable { service: String },

    /// Upstream accepted but never answered in time
    #[error("Upstream timeout: {service}")]
    UpstreamTimeout { service: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding/decoding failures
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Object storage adapter errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Upload failed: {key} - {message}")]
    UploadFailed { key: String, message: String },

    #[error("Download failed: {key} - {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Bucket operation failed: {bucket} - {message}")]
    BucketFailed { bucket: String, message: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },
}

/// Queue broker and result backend errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed delivery: {message}")]
    MalformedDelivery { message: String },
}

/// Token and password errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Wrong token kind: expected {expected}")]
    WrongTokenKind { expected: String },

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Worker pipeline errors: model runner transport plus remote failures
/// such as CUDA out-of-memory, which surface as task failures after the
/// retry budget is spent.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model runner error: {0}")]
    Runner(#[from] reqwest::Error),

    #[error("Model call failed: {message}")]
    Remote { message: String },

    #[error("Artifact decode failed: {message}")]
    Decode { message: String },
}

impl AppError {
    pub fn validation<F, C, M>(field: F, code: C, message: M) -> Self
    where
        F: Into<String>,
        C: Into<String>,
        M: Into<String>,
    {
        Self::Validation {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized<M: Into<String>>(message: M) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden<M: Into<String>>(message: M) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } | Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal failures get an opaque body; details stay in the log.
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Unhandled error");
            return (status, Json(json!({ "detail": "Internal server error" }))).into_response();
        }

        let body = match &self {
            Self::Validation {
                field,
                code,
                message,
            } => json!({ "detail": message, "code": code, "field": field }),
            Self::RateLimited { retry_after } => {
                json!({ "detail": "Rate limit exceeded. Please try again later.", "retry_after": retry_after })
            }
            other => json!({ "detail": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = &self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::validation("width", "out_of_range", "bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::unauthorized("no token").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::not_found("task", "abc").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RateLimited { retry_after: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::UpstreamUnavailable {
                service: "images".into()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::UpstreamTimeout {
                service: "images".into()
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_error_maps_to_401() {
        let err = AppError::Auth(AuthError::TokenExpired);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
