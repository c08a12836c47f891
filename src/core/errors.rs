use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Failure talking to an embedding or generation backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited(body)
        } else {
            ProviderError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }

    /// Transport failures, throttling and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Unreachable(_) | ProviderError::RateLimited(_) => true,
            ProviderError::Status { status, .. } => *status >= 500,
            ProviderError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index not found: {0}")]
    Missing(String),
    #[error("index is corrupt: {0}")]
    Corrupt(String),
    #[error("index storage error: {0}")]
    Storage(String),
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        IndexError::Storage(err.to_string())
    }
}

/// Everything that can end a synthesis request.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[source] ProviderError),
    #[error("generation failed: {0}")]
    Generation(#[source] ProviderError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("request cancelled")]
    Cancelled,
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SynthesisError::Validation(_) => ErrorKind::Validation,
            SynthesisError::EmbeddingUnavailable(_) | SynthesisError::Generation(_) => {
                ErrorKind::Provider
            }
            SynthesisError::Index(_) => ErrorKind::Index,
            SynthesisError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Coarse error class carried on terminal error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Index,
    Cancelled,
}

/// Terminal failure as observed by a consumer of the event channel.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct FailedRun {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<SynthesisError> for FailedRun {
    fn from(err: SynthesisError) -> Self {
        FailedRun {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config at '{path}': {message}")]
    Invalid { path: String, message: String },
    #[error("Config could not be applied: {0}")]
    Deserialize(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => ApiError::BadRequest(message),
            ErrorKind::Provider => ApiError::ServiceUnavailable(message),
            ErrorKind::Index => ApiError::Internal(message),
            // The caller is gone; nobody reads this body.
            ErrorKind::Cancelled => ApiError::ServiceUnavailable(message),
        }
    }
}

impl From<SynthesisError> for ApiError {
    fn from(err: SynthesisError) -> Self {
        ApiError::from_kind(err.kind(), err.to_string())
    }
}

impl From<FailedRun> for ApiError {
    fn from(err: FailedRun) -> Self {
        ApiError::from_kind(err.kind, err.message)
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Missing(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Unreachable("down".into()).is_retryable());
        assert!(ProviderError::RateLimited("slow down".into()).is_retryable());
        assert!(ProviderError::Status {
            status: 502,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Status {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Malformed("bad json".into()).is_retryable());
    }

    #[test]
    fn too_many_requests_maps_to_rate_limited() {
        let err = ProviderError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "quota".into());
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[test]
    fn synthesis_errors_map_to_http_status() {
        let resp = ApiError::from(SynthesisError::Validation("empty".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(SynthesisError::EmbeddingUnavailable(
            ProviderError::Unreachable("x".into()),
        ))
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = ApiError::from(SynthesisError::Index(IndexError::Corrupt("x".into())))
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
