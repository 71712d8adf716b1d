//! Key-value capability traits.
//!
//! These traits define the thin key-value contracts patterns consume:
//! - [`KeyValue`]: set/get/delete/exists (`keyvalue-basic`)
//! - [`KeyValueTtl`]: per-key expiry (`keyvalue-ttl`)
//! - [`KeyValueScan`]: prefix scans (`keyvalue-scan`)
//! - [`KeyValueAtomic`]: compare-and-swap, counters (`keyvalue-atomic`)
//!
//! Key-value implementations are EXTENSIONS (e.g. memory, redb, Redis).

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DriverError;

/// Basic key-value operations.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Store a value. `ttl_seconds == 0` means no expiry.
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<(), DriverError>;

    /// Fetch a value. Returns `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, DriverError>;

    /// Remove a key. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, DriverError>;

    /// Whether a live value exists for the key.
    async fn exists(&self, key: &str) -> Result<bool, DriverError>;
}

/// Per-key TTL operations.
///
/// Backends with native per-key expiry may delegate `set_with_ttl` to their
/// basic `set`.
#[async_trait]
pub trait KeyValueTtl: Send + Sync {
    /// Store a value with an expiry. `ttl_seconds == 0` means no expiry.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u64,
    ) -> Result<(), DriverError>;

    /// Remaining TTL in seconds. `None` when the key is absent or has no expiry.
    async fn get_ttl(&self, key: &str) -> Result<Option<u64>, DriverError>;

    /// Replace the TTL of an existing key.
    async fn update_ttl(&self, key: &str, ttl_seconds: u64) -> Result<(), DriverError>;
}

/// Prefix scan operations.
#[async_trait]
pub trait KeyValueScan: Send + Sync {
    /// Keys starting with `prefix`, up to `limit` (0 = unlimited).
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<String>, DriverError>;

    /// Keys and values starting with `prefix`, up to `limit` (0 = unlimited).
    async fn scan_with_values(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<BTreeMap<String, Bytes>, DriverError>;
}

/// Atomic read-modify-write operations.
#[async_trait]
pub trait KeyValueAtomic: Send + Sync {
    /// Swap `old` for `new` if the current value equals `old`
    /// (`None` = key absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        old: Option<Bytes>,
        new: Bytes,
    ) -> Result<bool, DriverError>;

    /// Add `delta` to an integer key (missing key counts as 0) and return
    /// the new value.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, DriverError>;
}
