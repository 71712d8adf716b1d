//! In-memory key-value store with per-key expiry.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use prism_traits::error::DriverError;
use prism_traits::keyvalue::{KeyValue, KeyValueAtomic, KeyValueScan, KeyValueTtl};

#[derive(Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Bytes, ttl_seconds: u64) -> Self {
        let expires_at =
            (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds));
        Self { data, expires_at }
    }

    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// Concurrent in-memory key-value store.
///
/// Expired entries are invisible to reads and removed lazily on access.
pub struct MemoryKeyValue {
    entries: DashMap<String, StoredValue>,
}

impl MemoryKeyValue {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of entries, including not-yet-reaped expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<Bytes> {
        let value = self.entries.get(key)?;
        if value.live() {
            Some(value.data.clone())
        } else {
            drop(value);
            self.entries.remove_if(key, |_, v| !v.live());
            None
        }
    }
}

impl Default for MemoryKeyValue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValue for MemoryKeyValue {
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<(), DriverError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl_seconds));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, DriverError> {
        Ok(self.live_value(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, DriverError> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| v.live())
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool, DriverError> {
        Ok(self.live_value(key).is_some())
    }
}

#[async_trait]
impl KeyValueTtl for MemoryKeyValue {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u64,
    ) -> Result<(), DriverError> {
        self.set(key, value, ttl_seconds).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<u64>, DriverError> {
        match self.entries.get(key) {
            Some(value) if value.live() => Ok(value
                .expires_at
                .map(|t| t.saturating_duration_since(Instant::now()).as_secs())),
            _ => Ok(None),
        }
    }

    async fn update_ttl(&self, key: &str, ttl_seconds: u64) -> Result<(), DriverError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) if entry.get().live() => {
                let data = entry.get().data.clone();
                entry.insert(StoredValue::new(data, ttl_seconds));
                Ok(())
            }
            _ => Err(DriverError::NotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl KeyValueScan for MemoryKeyValue {
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<String>, DriverError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().live())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        if limit > 0 {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn scan_with_values(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<BTreeMap<String, Bytes>, DriverError> {
        let mut result = BTreeMap::new();
        for entry in self.entries.iter() {
            if entry.key().starts_with(prefix) && entry.value().live() {
                result.insert(entry.key().clone(), entry.value().data.clone());
            }
        }
        if limit > 0 {
            while result.len() > limit {
                let last = result.keys().next_back().cloned();
                if let Some(last) = last {
                    result.remove(&last);
                }
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl KeyValueAtomic for MemoryKeyValue {
    async fn compare_and_swap(
        &self,
        key: &str,
        old: Option<Bytes>,
        new: Bytes,
    ) -> Result<bool, DriverError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().live().then(|| entry.get().data.clone());
                if current == old {
                    entry.insert(StoredValue::new(new, 0));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                if old.is_none() {
                    entry.insert(StoredValue::new(new, 0));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, DriverError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = if entry.get().live() {
                    std::str::from_utf8(&entry.get().data)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            DriverError::Validation(format!("key '{}' is not an integer", key))
                        })?
                } else {
                    0
                };
                let next = current + delta;
                entry.insert(StoredValue::new(Bytes::from(next.to_string()), 0));
                Ok(next)
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredValue::new(Bytes::from(delta.to_string()), 0));
                Ok(delta)
            }
        }
    }
}
