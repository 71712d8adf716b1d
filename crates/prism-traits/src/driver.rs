//! Driver lifecycle, health, and capability declarations.
//!
//! A backend driver is a long-lived object with the lifecycle
//! `initialize -> start -> [operations] -> stop` and an observable health.
//! Drivers declare which thin capabilities they implement; patterns consume
//! drivers exclusively through those capability traits via a
//! [`DriverHandle`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::keyvalue::{KeyValue, KeyValueAtomic, KeyValueScan, KeyValueTtl};
use crate::messaging::{PubSub, Queue};
use crate::objectstore::ObjectStore;

/// Driver-specific configuration passed through from the namespace config.
pub type DriverConfig = BTreeMap<String, serde_json::Value>;

// =============================================================================
// CAPABILITIES
// =============================================================================

/// A named subset of operations a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// `set`/`get`/`delete`/`exists`.
    KeyvalueBasic,
    /// Per-key expiry: `set_with_ttl`/`get_ttl`/`update_ttl`.
    KeyvalueTtl,
    /// Prefix scans.
    KeyvalueScan,
    /// `compare_and_swap`/`increment`.
    KeyvalueAtomic,
    /// Topic publish/subscribe.
    PubsubBasic,
    /// Queue with per-message ack/nack.
    Queue,
    /// Bucketed object storage.
    ObjectStore,
}

impl Capability {
    /// Stable string form used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyvalueBasic => "keyvalue-basic",
            Self::KeyvalueTtl => "keyvalue-ttl",
            Self::KeyvalueScan => "keyvalue-scan",
            Self::KeyvalueAtomic => "keyvalue-atomic",
            Self::PubsubBasic => "pubsub-basic",
            Self::Queue => "queue",
            Self::ObjectStore => "object-store",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyvalue-basic" => Ok(Self::KeyvalueBasic),
            "keyvalue-ttl" => Ok(Self::KeyvalueTtl),
            "keyvalue-scan" => Ok(Self::KeyvalueScan),
            "keyvalue-atomic" => Ok(Self::KeyvalueAtomic),
            "pubsub-basic" => Ok(Self::PubsubBasic),
            "queue" => Ok(Self::Queue),
            "object-store" => Ok(Self::ObjectStore),
            other => Err(DriverError::Validation(format!(
                "unknown capability: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// HEALTH
// =============================================================================

/// Health state of a driver or pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Functional but impaired.
    Degraded,
    /// Not able to serve operations.
    Unhealthy,
}

impl HealthState {
    /// Returns true if the state still allows serving operations.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// The worse of two states.
    pub fn worst(self, other: HealthState) -> HealthState {
        use HealthState::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Observable driver health with diagnostic key-values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverHealth {
    /// Current state.
    pub state: HealthState,
    /// Optional human-readable message.
    pub message: Option<String>,
    /// Diagnostic details (connection counts, lag, ...).
    pub details: BTreeMap<String, String>,
}

impl DriverHealth {
    /// A healthy report.
    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            message: None,
            details: BTreeMap::new(),
        }
    }

    /// A degraded report with a reason.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Degraded,
            message: Some(message.into()),
            details: BTreeMap::new(),
        }
    }

    /// An unhealthy report with a reason.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unhealthy,
            message: Some(message.into()),
            details: BTreeMap::new(),
        }
    }

    /// Attach a diagnostic detail.
    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

// =============================================================================
// DRIVER LIFECYCLE
// =============================================================================

/// Lifecycle contract every backend driver implements.
///
/// Implementations live in extension crates (`prism-ext-memory`,
/// `prism-ext-redb`, ...). The pattern runtime calls `initialize` then
/// `start` during slot binding, and `stop` in reverse bind order on
/// teardown.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name (e.g. "memory", "redb").
    fn name(&self) -> &str;

    /// Capabilities this driver implements.
    fn capabilities(&self) -> &[Capability];

    /// Apply configuration. Called once, before `start`.
    async fn initialize(&self, config: &DriverConfig) -> Result<(), DriverError>;

    /// Open connections and begin serving operations.
    async fn start(&self) -> Result<(), DriverError>;

    /// Release connections. Operations after `stop` fail.
    async fn stop(&self) -> Result<(), DriverError>;

    /// Current health with diagnostics.
    async fn health(&self) -> DriverHealth;
}

// =============================================================================
// DRIVER HANDLE
// =============================================================================

/// A started driver exposed to a pattern slot, one `Arc<dyn ...>` per
/// implemented capability.
///
/// Patterns hold capability interfaces only; no concrete driver type appears
/// in pattern code. The `require_*` accessors fail with
/// [`DriverError::Unsupported`] naming the missing capability, both at bind
/// time and on any later suspicious call.
#[derive(Clone)]
pub struct DriverHandle {
    /// Backend name.
    pub name: String,
    /// Lifecycle handle.
    pub lifecycle: Arc<dyn Driver>,
    /// Basic key-value operations, if implemented.
    pub keyvalue: Option<Arc<dyn KeyValue>>,
    /// Per-key TTL operations, if implemented.
    pub keyvalue_ttl: Option<Arc<dyn KeyValueTtl>>,
    /// Prefix scans, if implemented.
    pub keyvalue_scan: Option<Arc<dyn KeyValueScan>>,
    /// Atomic operations, if implemented.
    pub keyvalue_atomic: Option<Arc<dyn KeyValueAtomic>>,
    /// Pub/sub operations, if implemented.
    pub pubsub: Option<Arc<dyn PubSub>>,
    /// Queue operations, if implemented.
    pub queue: Option<Arc<dyn Queue>>,
    /// Object store operations, if implemented.
    pub objects: Option<Arc<dyn ObjectStore>>,
}

impl DriverHandle {
    /// Create a handle with no capabilities wired yet.
    pub fn new(name: impl Into<String>, lifecycle: Arc<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            keyvalue: None,
            keyvalue_ttl: None,
            keyvalue_scan: None,
            keyvalue_atomic: None,
            pubsub: None,
            queue: None,
            objects: None,
        }
    }

    /// Wire basic key-value operations.
    pub fn with_keyvalue(mut self, kv: Arc<dyn KeyValue>) -> Self {
        self.keyvalue = Some(kv);
        self
    }

    /// Wire TTL operations.
    pub fn with_keyvalue_ttl(mut self, kv: Arc<dyn KeyValueTtl>) -> Self {
        self.keyvalue_ttl = Some(kv);
        self
    }

    /// Wire scan operations.
    pub fn with_keyvalue_scan(mut self, kv: Arc<dyn KeyValueScan>) -> Self {
        self.keyvalue_scan = Some(kv);
        self
    }

    /// Wire atomic operations.
    pub fn with_keyvalue_atomic(mut self, kv: Arc<dyn KeyValueAtomic>) -> Self {
        self.keyvalue_atomic = Some(kv);
        self
    }

    /// Wire pub/sub operations.
    pub fn with_pubsub(mut self, ps: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(ps);
        self
    }

    /// Wire queue operations.
    pub fn with_queue(mut self, q: Arc<dyn Queue>) -> Self {
        self.queue = Some(q);
        self
    }

    /// Wire object store operations.
    pub fn with_objects(mut self, os: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(os);
        self
    }

    /// Whether this driver implements the given capability.
    pub fn implements(&self, capability: Capability) -> bool {
        match capability {
            Capability::KeyvalueBasic => self.keyvalue.is_some(),
            Capability::KeyvalueTtl => self.keyvalue_ttl.is_some(),
            Capability::KeyvalueScan => self.keyvalue_scan.is_some(),
            Capability::KeyvalueAtomic => self.keyvalue_atomic.is_some(),
            Capability::PubsubBasic => self.pubsub.is_some(),
            Capability::Queue => self.queue.is_some(),
            Capability::ObjectStore => self.objects.is_some(),
        }
    }

    /// Capabilities this handle exposes.
    pub fn capabilities(&self) -> Vec<Capability> {
        [
            Capability::KeyvalueBasic,
            Capability::KeyvalueTtl,
            Capability::KeyvalueScan,
            Capability::KeyvalueAtomic,
            Capability::PubsubBasic,
            Capability::Queue,
            Capability::ObjectStore,
        ]
        .into_iter()
        .filter(|c| self.implements(*c))
        .collect()
    }

    /// Basic key-value operations, or `interface_not_supported`.
    pub fn require_keyvalue(&self) -> Result<&Arc<dyn KeyValue>, DriverError> {
        self.keyvalue
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::KeyvalueBasic))
    }

    /// TTL operations, or `interface_not_supported`.
    pub fn require_keyvalue_ttl(&self) -> Result<&Arc<dyn KeyValueTtl>, DriverError> {
        self.keyvalue_ttl
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::KeyvalueTtl))
    }

    /// Scan operations, or `interface_not_supported`.
    pub fn require_keyvalue_scan(&self) -> Result<&Arc<dyn KeyValueScan>, DriverError> {
        self.keyvalue_scan
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::KeyvalueScan))
    }

    /// Atomic operations, or `interface_not_supported`.
    pub fn require_keyvalue_atomic(&self) -> Result<&Arc<dyn KeyValueAtomic>, DriverError> {
        self.keyvalue_atomic
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::KeyvalueAtomic))
    }

    /// Pub/sub operations, or `interface_not_supported`.
    pub fn require_pubsub(&self) -> Result<&Arc<dyn PubSub>, DriverError> {
        self.pubsub
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::PubsubBasic))
    }

    /// Queue operations, or `interface_not_supported`.
    pub fn require_queue(&self) -> Result<&Arc<dyn Queue>, DriverError> {
        self.queue
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::Queue))
    }

    /// Object store operations, or `interface_not_supported`.
    pub fn require_objects(&self) -> Result<&Arc<dyn ObjectStore>, DriverError> {
        self.objects
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::ObjectStore))
    }

    fn unsupported(&self, capability: Capability) -> DriverError {
        DriverError::Unsupported(format!(
            "driver '{}' does not implement {}",
            self.name, capability
        ))
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
