//! # Prism Ext Memory
//!
//! In-memory backend driver for the Prism data gateway.
//!
//! Implements every driver capability over process-local data structures:
//! - keyvalue (basic, ttl, scan, atomic) over a concurrent map
//! - pubsub-basic over broadcast channels with offset-tracked retention
//! - queue with per-message ack/nack and redelivery
//! - object-store over a bucketed concurrent map
//!
//! This is the default driver for tests and local development; everything
//! lives in the process and is lost on restart.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod keyvalue;
mod messaging;
mod objects;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use prism_traits::driver::{Capability, Driver, DriverConfig, DriverHandle, DriverHealth};
use prism_traits::error::DriverError;

pub use keyvalue::MemoryKeyValue;
pub use messaging::{MemoryPubSub, MemoryQueue};
pub use objects::MemoryObjectStore;

const CAPABILITIES: &[Capability] = &[
    Capability::KeyvalueBasic,
    Capability::KeyvalueTtl,
    Capability::KeyvalueScan,
    Capability::KeyvalueAtomic,
    Capability::PubsubBasic,
    Capability::Queue,
    Capability::ObjectStore,
];

/// In-memory driver lifecycle object.
///
/// Owns the shared stores exposed through the capability handles.
pub struct MemoryDriver {
    keyvalue: Arc<MemoryKeyValue>,
    pubsub: Arc<MemoryPubSub>,
    queue: Arc<MemoryQueue>,
    objects: Arc<MemoryObjectStore>,
    started: AtomicBool,
}

impl MemoryDriver {
    /// Create a driver over the given stores.
    pub fn new(
        keyvalue: Arc<MemoryKeyValue>,
        pubsub: Arc<MemoryPubSub>,
        queue: Arc<MemoryQueue>,
        objects: Arc<MemoryObjectStore>,
    ) -> Self {
        Self {
            keyvalue,
            pubsub,
            queue,
            objects,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    async fn initialize(&self, _config: &DriverConfig) -> Result<(), DriverError> {
        // Nothing to configure; all state is process-local.
        Ok(())
    }

    async fn start(&self) -> Result<(), DriverError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        self.started.store(false, Ordering::Release);
        self.pubsub.close();
        self.queue.close();
        Ok(())
    }

    async fn health(&self) -> DriverHealth {
        if !self.started.load(Ordering::Acquire) {
            return DriverHealth::unhealthy("driver not started");
        }
        DriverHealth::healthy()
            .with_detail("keys", self.keyvalue.len().to_string())
            .with_detail("topics", self.pubsub.topic_count().to_string())
            .with_detail("queues", self.queue.queue_count().to_string())
    }
}

/// Create a fully wired in-memory driver handle.
pub fn memory_driver() -> DriverHandle {
    let keyvalue = Arc::new(MemoryKeyValue::new());
    let pubsub = Arc::new(MemoryPubSub::new());
    let queue = Arc::new(MemoryQueue::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let driver = Arc::new(MemoryDriver::new(
        keyvalue.clone(),
        pubsub.clone(),
        queue.clone(),
        objects.clone(),
    ));

    DriverHandle::new("memory", driver)
        .with_keyvalue(keyvalue.clone())
        .with_keyvalue_ttl(keyvalue.clone())
        .with_keyvalue_scan(keyvalue.clone())
        .with_keyvalue_atomic(keyvalue)
        .with_pubsub(pubsub)
        .with_queue(queue)
        .with_objects(objects)
}

pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
