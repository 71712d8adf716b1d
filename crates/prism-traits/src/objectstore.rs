//! Object storage capability trait (`object-store`).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DriverError;

/// Bucketed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), DriverError>;

    /// Fetch an object. Returns `None` when absent or expired.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, DriverError>;

    /// Set an expiry on an existing object.
    async fn set_ttl(&self, bucket: &str, key: &str, ttl_seconds: u64) -> Result<(), DriverError>;

    /// Remove an object. Returns whether it existed.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, DriverError>;
}
