//! # Prism Ext Redb
//!
//! Embedded persistent keyvalue driver using redb for the Prism data
//! gateway.
//!
//! Implements `keyvalue-basic`, `keyvalue-ttl`, `keyvalue-scan`, and
//! `keyvalue-atomic`. Values are stored with their absolute expiry time;
//! expired records are invisible to reads and removed lazily.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use prism_traits::driver::{Capability, Driver, DriverConfig, DriverHandle, DriverHealth};
use prism_traits::error::DriverError;
use prism_traits::keyvalue::{KeyValue, KeyValueAtomic, KeyValueScan, KeyValueTtl};

// Table definitions
const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

const CAPABILITIES: &[Capability] = &[
    Capability::KeyvalueBasic,
    Capability::KeyvalueTtl,
    Capability::KeyvalueScan,
    Capability::KeyvalueAtomic,
];

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A stored value with its absolute expiry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    value: Vec<u8>,
    /// Unix seconds; `None` = no expiry.
    expires_at: Option<i64>,
}

impl StoredRecord {
    fn new(value: &[u8], ttl_seconds: u64) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: (ttl_seconds > 0).then(|| unix_now() + ttl_seconds as i64),
        }
    }

    fn live(&self) -> bool {
        self.expires_at.map(|t| unix_now() < t).unwrap_or(true)
    }
}

/// Redb-backed key-value store.
pub struct RedbKeyValue {
    db: Arc<Database>,
}

impl RedbKeyValue {
    /// Create a store over an open database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn read_record(&self, key: &str) -> Result<Option<StoredRecord>, DriverError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| DriverError::Io(e.to_string()))?;

        let table = match read_txn.open_table(VALUES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(DriverError::Io(e.to_string())),
        };

        match table.get(key) {
            Ok(Some(data)) => {
                let record: StoredRecord = serde_json::from_slice(data.value())
                    .map_err(|e| DriverError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DriverError::Io(e.to_string())),
        }
    }

    fn write_record(&self, key: &str, record: &StoredRecord) -> Result<(), DriverError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(VALUES)
                .map_err(|e| DriverError::Io(e.to_string()))?;
            let bytes = serde_json::to_vec(record)
                .map_err(|e| DriverError::Serialization(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| DriverError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove_key(&self, key: &str) -> Result<Option<StoredRecord>, DriverError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let removed = {
            let mut table = write_txn
                .open_table(VALUES)
                .map_err(|e| DriverError::Io(e.to_string()))?;
            let result = table
                .remove(key)
                .map_err(|e| DriverError::Io(e.to_string()))?;
            match result {
                Some(data) => Some(
                    serde_json::from_slice::<StoredRecord>(data.value())
                        .map_err(|e| DriverError::Serialization(e.to_string()))?,
                ),
                None => None,
            }
        };
        write_txn
            .commit()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        Ok(removed)
    }

    fn scan_records(
        &self,
        prefix: &str,
        limit: usize,
        with_values: bool,
    ) -> Result<BTreeMap<String, Bytes>, DriverError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| DriverError::Io(e.to_string()))?;

        let table = match read_txn.open_table(VALUES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(DriverError::Io(e.to_string())),
        };

        let mut result = BTreeMap::new();
        for item in table.iter().map_err(|e| DriverError::Io(e.to_string()))? {
            let (key, value) = item.map_err(|e| DriverError::Io(e.to_string()))?;
            if !key.value().starts_with(prefix) {
                continue;
            }
            let record: StoredRecord = serde_json::from_slice(value.value())
                .map_err(|e| DriverError::Serialization(e.to_string()))?;
            if !record.live() {
                continue;
            }
            let data = if with_values {
                Bytes::from(record.value)
            } else {
                Bytes::new()
            };
            result.insert(key.value().to_string(), data);
            if limit > 0 && result.len() == limit {
                break;
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl KeyValue for RedbKeyValue {
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<(), DriverError> {
        self.write_record(key, &StoredRecord::new(&value, ttl_seconds))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, DriverError> {
        match self.read_record(key)? {
            Some(record) if record.live() => Ok(Some(Bytes::from(record.value))),
            Some(_) => {
                self.remove_key(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, DriverError> {
        Ok(self.remove_key(key)?.map(|r| r.live()).unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool, DriverError> {
        Ok(self
            .read_record(key)?
            .map(|r| r.live())
            .unwrap_or(false))
    }
}

#[async_trait]
impl KeyValueTtl for RedbKeyValue {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u64,
    ) -> Result<(), DriverError> {
        self.set(key, value, ttl_seconds).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<u64>, DriverError> {
        match self.read_record(key)? {
            Some(record) if record.live() => Ok(record
                .expires_at
                .map(|t| (t - unix_now()).max(0) as u64)),
            _ => Ok(None),
        }
    }

    async fn update_ttl(&self, key: &str, ttl_seconds: u64) -> Result<(), DriverError> {
        match self.read_record(key)? {
            Some(record) if record.live() => self.write_record(
                key,
                &StoredRecord {
                    value: record.value,
                    expires_at: (ttl_seconds > 0).then(|| unix_now() + ttl_seconds as i64),
                },
            ),
            _ => Err(DriverError::NotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl KeyValueScan for RedbKeyValue {
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<String>, DriverError> {
        Ok(self
            .scan_records(prefix, limit, false)?
            .into_keys()
            .collect())
    }

    async fn scan_with_values(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<BTreeMap<String, Bytes>, DriverError> {
        self.scan_records(prefix, limit, true)
    }
}

#[async_trait]
impl KeyValueAtomic for RedbKeyValue {
    async fn compare_and_swap(
        &self,
        key: &str,
        old: Option<Bytes>,
        new: Bytes,
    ) -> Result<bool, DriverError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let swapped = {
            let mut table = write_txn
                .open_table(VALUES)
                .map_err(|e| DriverError::Io(e.to_string()))?;

            let current = match table.get(key).map_err(|e| DriverError::Io(e.to_string()))? {
                Some(data) => {
                    let record: StoredRecord = serde_json::from_slice(data.value())
                        .map_err(|e| DriverError::Serialization(e.to_string()))?;
                    record.live().then(|| Bytes::from(record.value))
                }
                None => None,
            };

            if current == old {
                let record = StoredRecord::new(&new, 0);
                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| DriverError::Serialization(e.to_string()))?;
                table
                    .insert(key, bytes.as_slice())
                    .map_err(|e| DriverError::Io(e.to_string()))?;
                true
            } else {
                false
            }
        };
        write_txn
            .commit()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        Ok(swapped)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, DriverError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let next = {
            let mut table = write_txn
                .open_table(VALUES)
                .map_err(|e| DriverError::Io(e.to_string()))?;

            let current = match table.get(key).map_err(|e| DriverError::Io(e.to_string()))? {
                Some(data) => {
                    let record: StoredRecord = serde_json::from_slice(data.value())
                        .map_err(|e| DriverError::Serialization(e.to_string()))?;
                    if record.live() {
                        std::str::from_utf8(&record.value)
                            .ok()
                            .and_then(|s| s.parse::<i64>().ok())
                            .ok_or_else(|| {
                                DriverError::Validation(format!(
                                    "key '{}' is not an integer",
                                    key
                                ))
                            })?
                    } else {
                        0
                    }
                }
                None => 0,
            };

            let next = current + delta;
            let record = StoredRecord::new(next.to_string().as_bytes(), 0);
            let bytes = serde_json::to_vec(&record)
                .map_err(|e| DriverError::Serialization(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| DriverError::Io(e.to_string()))?;
            next
        };
        write_txn
            .commit()
            .map_err(|e| DriverError::Io(e.to_string()))?;
        Ok(next)
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Redb driver lifecycle object.
pub struct RedbDriver {
    db: Arc<Database>,
    started: AtomicBool,
}

impl RedbDriver {
    /// Create a driver over an open database.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Driver for RedbDriver {
    fn name(&self) -> &str {
        "redb"
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    async fn initialize(&self, _config: &DriverConfig) -> Result<(), DriverError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), DriverError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    async fn health(&self) -> DriverHealth {
        if !self.started.load(Ordering::Acquire) {
            return DriverHealth::unhealthy("driver not started");
        }
        let keys = self
            .db
            .begin_read()
            .ok()
            .and_then(|txn| txn.open_table(VALUES).ok())
            .and_then(|t| t.len().ok())
            .unwrap_or(0);
        DriverHealth::healthy().with_detail("keys", keys.to_string())
    }
}

/// Create a redb driver handle backed by the given database file.
pub fn redb_driver(path: impl AsRef<Path>) -> Result<DriverHandle, DriverError> {
    let db = Arc::new(Database::create(path).map_err(|e| DriverError::Io(e.to_string()))?);
    let keyvalue = Arc::new(RedbKeyValue::new(db.clone()));
    let driver = Arc::new(RedbDriver::new(db));

    Ok(DriverHandle::new("redb", driver)
        .with_keyvalue(keyvalue.clone())
        .with_keyvalue_ttl(keyvalue.clone())
        .with_keyvalue_scan(keyvalue.clone())
        .with_keyvalue_atomic(keyvalue))
}

/// Create a redb driver over a temporary file, for testing.
///
/// Uses a unique file in the system temp directory that will be cleaned up
/// when the process exits.
pub fn temp_redb_driver() -> Result<DriverHandle, DriverError> {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir().join(format!(
        "prism_test_{}_{}.redb",
        std::process::id(),
        id
    ));
    redb_driver(db_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_store() -> (tempfile::TempDir, RedbKeyValue) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("test.redb")).unwrap());
        (dir, RedbKeyValue::new(db))
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let (_dir, kv) = open_test_store();
        kv.set("ns:orders", Bytes::from("config"), 0).await.unwrap();
        assert_eq!(
            kv.get("ns:orders").await.unwrap(),
            Some(Bytes::from("config"))
        );
        assert!(kv.exists("ns:orders").await.unwrap());
        assert!(kv.delete("ns:orders").await.unwrap());
        assert_eq!(kv.get("ns:orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_records_invisible() {
        let (_dir, kv) = open_test_store();
        kv.set("short", Bytes::from("x"), 1).await.unwrap();
        assert!(kv.exists("short").await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(kv.get("short").await.unwrap(), None);
        assert!(kv.scan("short", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_prefix_sorted() {
        let (_dir, kv) = open_test_store();
        for name in ["id:b", "id:a", "id:c", "other"] {
            kv.set(name, Bytes::from("v"), 0).await.unwrap();
        }
        let keys = kv.scan("id:", 0).await.unwrap();
        assert_eq!(keys, vec!["id:a", "id:b", "id:c"]);

        let limited = kv.scan_with_values("id:", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let (_dir, kv) = open_test_store();
        assert!(kv
            .compare_and_swap("owner", None, Bytes::from("p1"))
            .await
            .unwrap());
        assert!(!kv
            .compare_and_swap("owner", None, Bytes::from("p2"))
            .await
            .unwrap());
        assert!(kv
            .compare_and_swap("owner", Some(Bytes::from("p1")), Bytes::from("p2"))
            .await
            .unwrap());
        assert_eq!(kv.get("owner").await.unwrap(), Some(Bytes::from("p2")));
    }

    #[tokio::test]
    async fn test_increment_persists() {
        let (_dir, kv) = open_test_store();
        assert_eq!(kv.increment("seq", 1).await.unwrap(), 1);
        assert_eq!(kv.increment("seq", 9).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_driver_factory() {
        let handle = temp_redb_driver().unwrap();
        assert!(handle.implements(Capability::KeyvalueBasic));
        assert!(handle.implements(Capability::KeyvalueScan));
        assert!(!handle.implements(Capability::PubsubBasic));
        handle.lifecycle.start().await.unwrap();
        assert_eq!(
            handle.lifecycle.health().await.state,
            prism_traits::HealthState::Healthy
        );
    }
}
