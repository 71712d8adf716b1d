//! Error taxonomy for driver and gateway operations.
//!
//! Every error carries a machine-readable [`ErrorKind`], a human message,
//! and retry advice ([`RetryAdvice`]) so callers never have to guess whether
//! an operation is worth repeating. The kind survives RPC boundaries as a
//! structured detail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ERROR KIND
// =============================================================================

/// Machine-readable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced entity does not exist.
    NotFound,
    /// Entity already exists (e.g. duplicate register).
    AlreadyExists,
    /// A precondition was violated (e.g. assign to a full launcher, CAS conflict).
    PreconditionFailed,
    /// Input failed validation (e.g. filter depth exceeded).
    Validation,
    /// A capacity limit was reached (e.g. `max_identities`).
    Capacity,
    /// The driver's remote system is unreachable.
    BackendUnavailable,
    /// Operation deadline exceeded.
    Timeout,
    /// Quota exceeded; retry after the reset window.
    RateLimited,
    /// The caller is not authorized for the operation.
    Unauthorized,
    /// A slot driver is missing a required capability.
    InterfaceNotSupported,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Stable string form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PreconditionFailed => "precondition_failed",
            Self::Validation => "validation",
            Self::Capacity => "capacity",
            Self::BackendUnavailable => "backend_unavailable",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::InterfaceNotSupported => "interface_not_supported",
            Self::Internal => "internal",
        }
    }

    /// Default retry advice for this kind of failure.
    pub fn default_retry(&self) -> RetryAdvice {
        match self {
            Self::BackendUnavailable => RetryAdvice::exponential(3, 200, 2.0),
            Self::Timeout => RetryAdvice::exponential(3, 500, 2.0),
            Self::Capacity => RetryAdvice::fixed(1, 30_000),
            Self::RateLimited => RetryAdvice::fixed(1, 1_000),
            Self::Internal => RetryAdvice::fixed(2, 100),
            _ => RetryAdvice::never(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RETRY ADVICE
// =============================================================================

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Do not retry.
    Never,
    /// Constant delay between attempts.
    Fixed,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay doubles (or multiplies) per attempt.
    Exponential,
    /// Exponential with randomized jitter.
    Jitter,
}

/// Retry guidance attached to errors.
///
/// Carried as a value so clients act on the server's judgement instead of
/// re-deriving policy from the error text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryAdvice {
    /// Whether the operation is worth retrying at all.
    pub retryable: bool,
    /// Maximum sensible attempts beyond the first.
    pub max_retries: u32,
    /// Delay growth strategy.
    pub backoff: Backoff,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryAdvice {
    /// Non-retryable.
    pub fn never() -> Self {
        Self {
            retryable: false,
            max_retries: 0,
            backoff: Backoff::Never,
            base_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Retry with a constant delay.
    pub fn fixed(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            retryable: true,
            max_retries,
            backoff: Backoff::Fixed,
            base_delay_ms,
            multiplier: 1.0,
        }
    }

    /// Retry with exponentially growing delay.
    pub fn exponential(max_retries: u32, base_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            retryable: true,
            max_retries,
            backoff: Backoff::Exponential,
            base_delay_ms,
            multiplier,
        }
    }

    /// Delay before the given retry attempt (0-based), in milliseconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        match self.backoff {
            Backoff::Never => 0,
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Linear => self.base_delay_ms.saturating_mul(attempt as u64 + 1),
            Backoff::Exponential | Backoff::Jitter => {
                let factor = self.multiplier.powi(attempt as i32);
                (self.base_delay_ms as f64 * factor) as u64
            }
        }
    }
}

// =============================================================================
// DRIVER ERROR
// =============================================================================

/// Common error type for driver and pattern operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Requested entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Precondition violated
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Input validation failed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Capacity limit reached
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Remote backend unreachable
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Operation deadline exceeded
    #[error("timeout")]
    Timeout,

    /// Quota exceeded
    #[error("rate limited")]
    RateLimited,

    /// Caller not authorized
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Capability not implemented by the bound driver
    #[error("interface not supported: {0}")]
    Unsupported(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transient I/O failure
    #[error("IO error: {0}")]
    Io(String),

    /// Connection lost irrecoverably
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// The machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Validation(_) | Self::Serialization(_) => ErrorKind::Validation,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::Unavailable(_) | Self::Io(_) | Self::ConnectionLost(_) => {
                ErrorKind::BackendUnavailable
            }
            Self::Timeout => ErrorKind::Timeout,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Unsupported(_) => ErrorKind::InterfaceNotSupported,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Retry advice for this error.
    pub fn retry(&self) -> RetryAdvice {
        self.kind().default_retry()
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retry().retryable
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            DriverError::NotFound("ns".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DriverError::Unavailable("redis down".into()).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            DriverError::Unsupported("keyvalue-ttl".into()).kind(),
            ErrorKind::InterfaceNotSupported
        );
    }

    #[test]
    fn test_retryability() {
        assert!(DriverError::Timeout.is_retryable());
        assert!(DriverError::Unavailable("down".into()).is_retryable());
        assert!(!DriverError::AlreadyExists("dup".into()).is_retryable());
        assert!(!DriverError::Validation("bad filter".into()).is_retryable());
    }

    #[test]
    fn test_backoff_delays() {
        let advice = RetryAdvice::exponential(3, 100, 2.0);
        assert_eq!(advice.delay_for_attempt(0), 100);
        assert_eq!(advice.delay_for_attempt(1), 200);
        assert_eq!(advice.delay_for_attempt(2), 400);

        let fixed = RetryAdvice::fixed(2, 250);
        assert_eq!(fixed.delay_for_attempt(0), 250);
        assert_eq!(fixed.delay_for_attempt(5), 250);
    }

    #[test]
    fn test_kind_wire_form() {
        assert_eq!(ErrorKind::PreconditionFailed.as_str(), "precondition_failed");
        let json = serde_json::to_string(&ErrorKind::InterfaceNotSupported).unwrap();
        assert_eq!(json, "\"interface_not_supported\"");
    }
}
