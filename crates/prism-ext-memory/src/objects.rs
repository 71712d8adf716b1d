//! In-memory bucketed object store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use prism_traits::error::DriverError;
use prism_traits::objectstore::ObjectStore;

struct StoredObject {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredObject {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// Concurrent in-memory object store.
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryObjectStore {
    /// Create an empty object store.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Number of stored objects, including not-yet-reaped expired ones.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), DriverError> {
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, DriverError> {
        let id = (bucket.to_string(), key.to_string());
        match self.objects.get(&id) {
            Some(object) if object.live() => Ok(Some(object.data.clone())),
            Some(_) => {
                drop(self.objects.remove_if(&id, |_, o| !o.live()));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ttl(&self, bucket: &str, key: &str, ttl_seconds: u64) -> Result<(), DriverError> {
        let id = (bucket.to_string(), key.to_string());
        match self.objects.get_mut(&id) {
            Some(mut object) if object.live() => {
                object.expires_at =
                    (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds));
                Ok(())
            }
            _ => Err(DriverError::NotFound(format!("{}/{}", bucket, key))),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, DriverError> {
        Ok(self
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|(_, o)| o.live())
            .unwrap_or(false))
    }
}
