//! Pattern runtime for the Prism data gateway.
//!
//! A *pattern* is a reusable data-access abstraction composed of named
//! *slots*, each filled by a backend driver implementing a required
//! capability set. This crate provides:
//!
//! - Slot binding and capability verification ([`slots`])
//! - Pattern lifecycle: graceful shutdown, drain accounting, health
//!   aggregation ([`runtime`])
//! - The multicast-registry core: register / enumerate / multicast /
//!   unregister with TTL and retried fan-out ([`registry`])
//! - The consumer core: worker pool, ack/nack, offset checkpointing, and
//!   dead-letter routing ([`consumer`])
//!
//! Patterns hold drivers behind capability interfaces only; no concrete
//! driver type appears in pattern code.

#![warn(clippy::all)]

pub mod consumer;
pub mod error;
pub mod pattern;
pub mod registry;
pub mod runtime;
pub mod slots;

pub use consumer::{Consumer, ConsumerConfig, FnProcessor, Processor};
pub use error::PatternError;
pub use pattern::{instantiate_pattern, Pattern};
pub use registry::{MulticastOutcome, MulticastRegistry, RegistryConfig, TargetStatus};
pub use runtime::{DrainSummary, GracefulShutdown, PatternHealth};
pub use slots::{bind_slots, DriverRegistry, SlotMap, SlotSpec};

pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn unix_now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
