//! Pattern runtime error types.

use thiserror::Error;

use prism_traits::driver::Capability;
use prism_traits::error::{DriverError, ErrorKind};
use prism_traits::filter::FilterError;

/// Pattern runtime error type.
#[derive(Debug, Error)]
pub enum PatternError {
    /// A driver operation failed
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A filter failed validation
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Input validation failed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Configured slot name is not declared by the pattern
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    /// A required slot has no configuration
    #[error("missing slot: {0}")]
    MissingSlot(String),

    /// A slot's driver does not implement a required capability
    #[error("slot '{slot}' driver missing capability {capability}")]
    MissingCapability {
        /// Slot name.
        slot: String,
        /// The capability the driver lacks.
        capability: Capability,
    },

    /// No driver factory registered for the configured backend
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Identity already registered and not expired
    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    /// Identity count reached the configured maximum
    #[error("identity capacity reached ({0})")]
    Capacity(usize),

    /// Pattern is draining or stopped
    #[error("pattern is shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl PatternError {
    /// The machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Driver(e) => e.kind(),
            Self::Filter(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::UnknownSlot(_) | Self::MissingSlot(_) | Self::UnknownBackend(_) => {
                ErrorKind::Validation
            }
            Self::MissingCapability { .. } => ErrorKind::InterfaceNotSupported,
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyExists,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::ShuttingDown => ErrorKind::BackendUnavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
