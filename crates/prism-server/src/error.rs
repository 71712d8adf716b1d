//! HTTP error mapping.
//!
//! The error kind crosses the RPC boundary as a structured JSON body
//! `{kind, message, retryable}`, so clients keep the machine-readable
//! classification and retry guidance.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use prism_admin::FsmError;
use prism_runtime::PatternError;
use prism_traits::error::ErrorKind;

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Whether the caller may retry.
    pub retryable: bool,
}

/// An API error carrying its taxonomy kind.
#[derive(Debug)]
pub struct ApiError {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `not_found` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// `precondition_failed` error, used when an addressed proxy, launcher,
    /// or pattern is unknown to the control plane.
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    /// `validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// `internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Validation | ErrorKind::InterfaceNotSupported => StatusCode::BAD_REQUEST,
            ErrorKind::Capacity | ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            kind: self.kind,
            message: self.message,
            retryable: self.kind.default_retry().retryable,
        };
        (status, Json(body)).into_response()
    }
}

impl From<FsmError> for ApiError {
    fn from(e: FsmError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<PatternError> for ApiError {
    fn from(e: PatternError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}
