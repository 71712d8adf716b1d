//! FSM error types.

use thiserror::Error;

use prism_traits::error::ErrorKind;

/// Errors from command application and snapshot handling.
#[derive(Debug, Error)]
pub enum FsmError {
    /// Command references a proxy that does not exist
    #[error("unknown proxy: {0}")]
    UnknownProxy(String),

    /// Command references a launcher that does not exist
    #[error("unknown launcher: {0}")]
    UnknownLauncher(String),

    /// Command references a pattern placement that does not exist
    #[error("unknown pattern: {0}")]
    UnknownPattern(String),

    /// Launcher has no free process slots
    #[error("launcher '{0}' has no available slots")]
    NoAvailableSlots(String),

    /// Pattern id is already placed
    #[error("pattern already assigned: {0}")]
    PatternAlreadyAssigned(String),

    /// Command payload could not be decoded
    #[error("malformed command: {0}")]
    Malformed(String),

    /// Snapshot bytes could not be decoded
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Partition id outside `0..256`
    #[error("partition {0} out of range")]
    PartitionOutOfRange(i32),
}

impl FsmError {
    /// The machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProxy(_) | Self::UnknownLauncher(_) | Self::UnknownPattern(_) => {
                ErrorKind::NotFound
            }
            Self::NoAvailableSlots(_) => ErrorKind::PreconditionFailed,
            Self::PatternAlreadyAssigned(_) => ErrorKind::AlreadyExists,
            Self::Malformed(_) | Self::InvalidSnapshot(_) | Self::PartitionOutOfRange(_) => {
                ErrorKind::Validation
            }
        }
    }
}
