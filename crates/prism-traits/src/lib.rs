//! # Prism Traits
//!
//! Trait definitions for the Prism data gateway.
//!
//! This crate contains ONLY trait definitions with ZERO runtime dependencies.
//! All driver implementations are in separate extension crates.
//!
//! ## Module Structure
//!
//! - [`driver`]: Driver lifecycle, health, and capability declarations
//! - [`keyvalue`]: Key-value capability traits (basic, ttl, scan, atomic)
//! - [`messaging`]: Pub/sub and queue capability traits
//! - [`objectstore`]: Object storage capability trait
//! - [`value`]: Tagged scalar values and metadata maps
//! - [`filter`]: Metadata filter expression trees
//! - [`config`]: Namespace and slot configuration types
//! - [`error`]: Error taxonomy with retry advice
//!
//! ## Slot Binding
//!
//! Patterns consume drivers exclusively through these capability traits.
//! A bound slot exposes a [`driver::DriverHandle`] holding one `Arc<dyn ...>`
//! per implemented capability:
//!
//! ```ignore
//! let registry = slots.require("registry")?;
//! let kv = registry.require_keyvalue()?;
//! kv.set("identity:dev-42", payload, 30).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod keyvalue;
pub mod messaging;
pub mod objectstore;
pub mod value;

// Re-export commonly used types
pub use config::{NamespaceConfig, SlotConfig};
pub use driver::{Capability, Driver, DriverConfig, DriverHandle, DriverHealth, HealthState};
pub use error::{Backoff, DriverError, ErrorKind, RetryAdvice};
pub use filter::Filter;
pub use value::{Metadata, Value};
