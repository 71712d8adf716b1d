//! Multicast registry pattern core.
//!
//! Identities register with metadata and an optional TTL; clients enumerate
//! them through filter expressions and multicast payloads to every match.
//! Delivery fans out in parallel with per-target retries.
//!
//! Slots:
//!
//! | Slot         | Required        | Used for                          |
//! |--------------|-----------------|-----------------------------------|
//! | `registry`   | keyvalue-basic  | Durable identity records          |
//! | `messaging`  | pubsub-basic    | Multicast delivery                |
//! | `durability` | queue (optional)| Undeliverable payload capture     |
//!
//! All identity mutations go through one exclusive lock; enumerate takes the
//! shared lock. The fan-out runs entirely outside any lock, over a target
//! snapshot captured under the shared lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use prism_traits::config::NamespaceConfig;
use prism_traits::driver::Capability;
use prism_traits::error::DriverError;
use prism_traits::filter::Filter;
use prism_traits::messaging::{Headers, PubSub};
use prism_traits::value::Metadata;

use crate::error::PatternError;
use crate::pattern::Pattern;
use crate::runtime::{DrainSummary, GracefulShutdown, PatternHealth};
use crate::slots::{bind_slots, DriverRegistry, SlotMap, SlotSpec};
use crate::{unix_now, unix_now_millis};

const IDENTITY_KEY_PREFIX: &str = "identity:";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Behavior configuration for the multicast registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum live identities per namespace.
    pub max_identities: usize,
    /// Prefix for per-identity delivery topics.
    pub topic_prefix: String,
    /// Retries after the first failed publish.
    pub retry_attempts: u32,
    /// Delay between publish attempts.
    pub retry_delay: Duration,
    /// Deadline for a single publish attempt.
    pub publish_timeout: Duration,
    /// Maximum filter tree depth.
    pub max_filter_depth: usize,
    /// Maximum filter leaf clauses.
    pub max_filter_clauses: usize,
    /// Interval between TTL reaper runs.
    pub reap_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_identities: 10_000,
            topic_prefix: "multicast:".to_string(),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(100),
            publish_timeout: Duration::from_secs(5),
            max_filter_depth: 5,
            max_filter_clauses: 20,
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    const KNOWN_KEYS: &'static [&'static str] = &[
        "max_identities",
        "topic_prefix",
        "retry_attempts",
        "retry_delay_ms",
        "publish_timeout_ms",
        "max_filter_depth",
        "max_filter_clauses",
        "reap_interval_seconds",
    ];

    /// Read behavior keys from a namespace config, warning on unknown keys.
    pub fn from_namespace(config: &NamespaceConfig) -> Self {
        for key in config.behavior.keys() {
            if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                warn!(namespace = %config.name, key = %key, "Ignoring unknown behavior key");
            }
        }
        let defaults = Self::default();
        Self {
            max_identities: config.behavior_u64("max_identities", defaults.max_identities as u64)
                as usize,
            topic_prefix: config.behavior_str("topic_prefix", &defaults.topic_prefix),
            retry_attempts: config.behavior_u64("retry_attempts", defaults.retry_attempts as u64)
                as u32,
            retry_delay: Duration::from_millis(
                config.behavior_u64("retry_delay_ms", defaults.retry_delay.as_millis() as u64),
            ),
            publish_timeout: Duration::from_millis(config.behavior_u64(
                "publish_timeout_ms",
                defaults.publish_timeout.as_millis() as u64,
            )),
            max_filter_depth: config
                .behavior_u64("max_filter_depth", defaults.max_filter_depth as u64)
                as usize,
            max_filter_clauses: config
                .behavior_u64("max_filter_clauses", defaults.max_filter_clauses as u64)
                as usize,
            reap_interval: Duration::from_secs(config.behavior_u64(
                "reap_interval_seconds",
                defaults.reap_interval.as_secs(),
            )),
        }
    }
}

// =============================================================================
// IDENTITY RECORDS
// =============================================================================

/// A registered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Identity name, unique within the namespace.
    pub identity: String,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
    /// Registration time (unix seconds).
    pub registered_at: i64,
    /// Absolute expiry (unix milliseconds); `None` = no expiry.
    pub expires_at: Option<i64>,
}

impl IdentityRecord {
    fn live(&self, now_ms: i64) -> bool {
        self.expires_at.map(|t| now_ms < t).unwrap_or(true)
    }
}

// =============================================================================
// MULTICAST OUTCOME
// =============================================================================

/// Delivery status for one multicast target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// A publish attempt succeeded.
    Delivered,
    /// All attempts failed with backend errors.
    Failed,
    /// The final attempt exceeded the publish deadline.
    Timeout,
}

/// Per-target multicast result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    /// Target identity.
    pub identity: String,
    /// Final delivery status.
    pub status: TargetStatus,
    /// Wall time spent on this target, milliseconds.
    pub latency_ms: u64,
    /// Publish attempts made.
    pub attempts: u32,
    /// Last error, when not delivered.
    pub error: Option<String>,
}

/// Aggregate multicast result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MulticastOutcome {
    /// Identities the filter selected.
    pub target_count: usize,
    /// Targets that acknowledged a publish.
    pub delivered_count: usize,
    /// Targets that did not.
    pub failed_count: usize,
    /// Per-target detail, in completion order.
    pub results: Vec<TargetResult>,
}

// =============================================================================
// REGISTRY
// =============================================================================

struct ReaperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Multicast registry pattern instance.
pub struct MulticastRegistry {
    config: RegistryConfig,
    slots: Arc<SlotMap>,
    identities: Arc<RwLock<HashMap<String, IdentityRecord>>>,
    shutdown: Arc<GracefulShutdown>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl MulticastRegistry {
    /// Slot declarations for this pattern.
    pub fn slot_specs() -> Vec<SlotSpec> {
        vec![
            SlotSpec::required("registry", vec![Capability::KeyvalueBasic]),
            SlotSpec::required("messaging", vec![Capability::PubsubBasic]),
            SlotSpec::optional("durability", vec![Capability::Queue]),
        ]
    }

    /// Bind slots from a namespace config and build the pattern instance.
    ///
    /// When the registry slot supports scans, previously persisted identities
    /// are recovered into the in-memory index.
    pub async fn bind(
        config: &NamespaceConfig,
        drivers: &DriverRegistry,
    ) -> Result<Arc<Self>, PatternError> {
        let slots = bind_slots(&Self::slot_specs(), &config.slots, drivers).await?;
        let registry = Arc::new(Self {
            config: RegistryConfig::from_namespace(config),
            slots: Arc::new(slots),
            identities: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(GracefulShutdown::new()),
            reaper: Mutex::new(None),
        });
        registry.recover().await?;
        Ok(registry)
    }

    /// Register an identity with metadata and a TTL (zero = no expiry).
    pub async fn register(
        &self,
        identity: &str,
        metadata: Metadata,
        ttl: Duration,
    ) -> Result<IdentityRecord, PatternError> {
        let _guard = self
            .shutdown
            .register_operation()
            .ok_or(PatternError::ShuttingDown)?;
        if identity.is_empty() {
            return Err(PatternError::Validation("identity must not be empty".into()));
        }

        let now_ms = unix_now_millis();
        let record = IdentityRecord {
            identity: identity.to_string(),
            metadata,
            registered_at: unix_now(),
            expires_at: (!ttl.is_zero()).then(|| now_ms + ttl.as_millis() as i64),
        };

        {
            let mut identities = self.identities.write();
            if let Some(existing) = identities.get(identity) {
                if existing.live(now_ms) {
                    return Err(PatternError::AlreadyRegistered(identity.to_string()));
                }
            }
            let live = identities.values().filter(|r| r.live(now_ms)).count();
            if live >= self.config.max_identities {
                return Err(PatternError::Capacity(self.config.max_identities));
            }
            identities.insert(identity.to_string(), record.clone());
        }

        let kv = self.slots.require("registry")?.require_keyvalue()?;
        let payload = serde_json::to_vec(&record).map_err(DriverError::from)?;
        let ttl_seconds = if ttl.is_zero() {
            0
        } else {
            // Round up so the backend never expires before the registry does.
            ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
        };
        if let Err(e) = kv
            .set(&Self::identity_key(identity), payload.into(), ttl_seconds)
            .await
        {
            self.identities.write().remove(identity);
            return Err(e.into());
        }

        debug!(identity = %identity, ttl_ms = ttl.as_millis() as u64, "Identity registered");
        Ok(record)
    }

    /// Remove an identity. Succeeds whether or not it exists.
    pub async fn unregister(&self, identity: &str) -> Result<(), PatternError> {
        let _guard = self
            .shutdown
            .register_operation()
            .ok_or(PatternError::ShuttingDown)?;
        self.identities.write().remove(identity);
        let kv = self.slots.require("registry")?.require_keyvalue()?;
        kv.delete(&Self::identity_key(identity)).await?;
        Ok(())
    }

    /// Enumerate live identities matching the optional filter.
    ///
    /// Identities past their expiry are excluded even before the reaper has
    /// removed them.
    pub fn enumerate(&self, filter: Option<&Filter>) -> Result<Vec<IdentityRecord>, PatternError> {
        if let Some(filter) = filter {
            filter.validate(self.config.max_filter_depth, self.config.max_filter_clauses)?;
        }
        let now_ms = unix_now_millis();
        let identities = self.identities.read();
        let mut matched: Vec<IdentityRecord> = identities
            .values()
            .filter(|r| r.live(now_ms))
            .filter(|r| filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(matched)
    }

    /// Number of live identities.
    pub fn len(&self) -> usize {
        let now_ms = unix_now_millis();
        self.identities.read().values().filter(|r| r.live(now_ms)).count()
    }

    /// Whether no live identities exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multicast a payload to every identity matching the filter.
    ///
    /// Targets are snapshotted under the shared lock; delivery fans out in
    /// parallel tasks, each retrying up to `retry_attempts` extra times.
    /// Ordering between targets is unspecified.
    pub async fn multicast(
        &self,
        filter: Option<&Filter>,
        payload: Bytes,
        headers: Headers,
    ) -> Result<MulticastOutcome, PatternError> {
        let _guard = self
            .shutdown
            .register_operation()
            .ok_or(PatternError::ShuttingDown)?;

        let targets = self.enumerate(filter)?;
        let target_count = targets.len();
        if target_count == 0 {
            return Ok(MulticastOutcome::default());
        }

        let pubsub = self.slots.require("messaging")?.require_pubsub()?.clone();
        let (tx, mut rx) = mpsc::channel::<TargetResult>(target_count);

        for target in targets {
            let pubsub = pubsub.clone();
            let tx = tx.clone();
            let topic = format!("{}{}", self.config.topic_prefix, target.identity);
            let payload = payload.clone();
            let headers = headers.clone();
            let attempts = self.config.retry_attempts + 1;
            let retry_delay = self.config.retry_delay;
            let publish_timeout = self.config.publish_timeout;

            tokio::spawn(async move {
                let result = Self::deliver_one(
                    pubsub,
                    &target.identity,
                    &topic,
                    payload,
                    headers,
                    attempts,
                    retry_delay,
                    publish_timeout,
                )
                .await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut outcome = MulticastOutcome {
            target_count,
            ..Default::default()
        };
        while let Some(result) = rx.recv().await {
            match result.status {
                TargetStatus::Delivered => outcome.delivered_count += 1,
                TargetStatus::Failed | TargetStatus::Timeout => outcome.failed_count += 1,
            }
            outcome.results.push(result);
        }

        self.capture_failures(&outcome, &payload).await;
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver_one(
        pubsub: Arc<dyn PubSub>,
        identity: &str,
        topic: &str,
        payload: Bytes,
        headers: Headers,
        attempts: u32,
        retry_delay: Duration,
        publish_timeout: Duration,
    ) -> TargetResult {
        let started = Instant::now();
        let mut last_error = None;
        let mut last_timed_out = false;

        for attempt in 0..attempts {
            last_timed_out = false;
            match tokio::time::timeout(
                publish_timeout,
                pubsub.publish(topic, payload.clone(), headers.clone()),
            )
            .await
            {
                Ok(Ok(_)) => {
                    return TargetResult {
                        identity: identity.to_string(),
                        status: TargetStatus::Delivered,
                        latency_ms: started.elapsed().as_millis() as u64,
                        attempts: attempt + 1,
                        error: None,
                    };
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_) => {
                    last_timed_out = true;
                    last_error = Some("publish timed out".to_string());
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        TargetResult {
            identity: identity.to_string(),
            status: if last_timed_out {
                TargetStatus::Timeout
            } else {
                TargetStatus::Failed
            },
            latency_ms: started.elapsed().as_millis() as u64,
            attempts,
            error: last_error,
        }
    }

    /// Park undeliverable payloads on the durability queue, when bound.
    async fn capture_failures(&self, outcome: &MulticastOutcome, payload: &Bytes) {
        if outcome.failed_count == 0 {
            return;
        }
        let Some(queue) = self.slots.get("durability").and_then(|h| h.queue.clone()) else {
            return;
        };
        for result in &outcome.results {
            if result.status == TargetStatus::Delivered {
                continue;
            }
            let mut headers = Headers::new();
            headers.insert("identity".to_string(), result.identity.clone());
            if let Some(error) = &result.error {
                headers.insert("failure_reason".to_string(), error.clone());
            }
            if let Err(e) = queue
                .enqueue("multicast-failures", payload.clone(), headers)
                .await
            {
                warn!(identity = %result.identity, error = %e, "Failed to capture undelivered payload");
            }
        }
    }

    async fn recover(&self) -> Result<(), PatternError> {
        let handle = self.slots.require("registry")?;
        let Some(scan) = handle.keyvalue_scan.clone() else {
            return Ok(());
        };
        let entries = scan.scan_with_values(IDENTITY_KEY_PREFIX, 0).await?;
        let now_ms = unix_now_millis();
        let mut recovered = 0usize;
        let mut identities = self.identities.write();
        for (key, value) in entries {
            match serde_json::from_slice::<IdentityRecord>(&value) {
                Ok(record) if record.live(now_ms) => {
                    identities.insert(record.identity.clone(), record);
                    recovered += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable identity record"),
            }
        }
        drop(identities);
        if recovered > 0 {
            info!(count = recovered, "Recovered identities from registry slot");
        }
        Ok(())
    }

    fn identity_key(identity: &str) -> String {
        format!("{}{}", IDENTITY_KEY_PREFIX, identity)
    }

    fn spawn_reaper(&self) {
        let (stop, mut stopped) = watch::channel(false);
        let identities = self.identities.clone();
        let slots = self.slots.clone();
        let interval = self.config.reap_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let now_ms = unix_now_millis();
                        let expired: Vec<String> = {
                            let mut map = identities.write();
                            let keys: Vec<String> = map
                                .values()
                                .filter(|r| !r.live(now_ms))
                                .map(|r| r.identity.clone())
                                .collect();
                            for key in &keys {
                                map.remove(key);
                            }
                            keys
                        };
                        if expired.is_empty() {
                            continue;
                        }
                        if let Ok(handle) = slots.require("registry") {
                            if let Ok(kv) = handle.require_keyvalue() {
                                for identity in &expired {
                                    if let Err(e) =
                                        kv.delete(&Self::identity_key(identity)).await
                                    {
                                        warn!(identity = %identity, error = %e, "Reaper delete failed");
                                    }
                                }
                            }
                        }
                        info!(count = expired.len(), "Reaped expired identities");
                    }
                }
            }
        });

        *self.reaper.lock() = Some(ReaperHandle { stop, task });
    }
}

#[async_trait::async_trait]
impl Pattern for MulticastRegistry {
    fn name(&self) -> &str {
        "multicast-registry"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn interfaces(&self) -> Vec<String> {
        vec!["prism.registry.v1".to_string()]
    }

    async fn start(&self) -> Result<(), PatternError> {
        self.spawn_reaper();
        info!(reap_interval_s = self.config.reap_interval.as_secs(), "Multicast registry started");
        Ok(())
    }

    async fn drain(&self, timeout: Duration, reason: &str) -> DrainSummary {
        info!(reason = %reason, timeout_s = timeout.as_secs(), "Draining multicast registry");
        self.shutdown.drain(timeout).await
    }

    async fn stop(&self) -> Result<(), PatternError> {
        if !self.shutdown.is_shutting_down() {
            self.shutdown.drain(Duration::from_secs(0)).await;
        }
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            let _ = reaper.stop.send(true);
            let _ = reaper.task.await;
        }
        self.slots.stop_all().await;
        info!("Multicast registry stopped");
        Ok(())
    }

    async fn health(&self) -> PatternHealth {
        let mut health = PatternHealth::from_slots(&self.slots).await;
        health
            .details
            .insert("identities".to_string(), self.len().to_string());
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use prism_ext_memory::memory_driver;
    use prism_traits::config::SlotConfig;
    use prism_traits::value::Value;

    fn namespace_config() -> (NamespaceConfig, prism_traits::DriverHandle) {
        let shared = memory_driver();
        let config = NamespaceConfig::new("devices", "multicast-registry")
            .with_slot("registry", SlotConfig::new("memory"))
            .with_slot("messaging", SlotConfig::new("memory"))
            .with_behavior("retry_delay_ms", serde_json::json!(10))
            .with_behavior("publish_timeout_ms", serde_json::json!(500));
        (config, shared)
    }

    async fn bind_registry() -> (Arc<MulticastRegistry>, prism_traits::DriverHandle) {
        let (config, shared) = namespace_config();
        let mut drivers = DriverRegistry::new();
        let handle = shared.clone();
        drivers.register("memory", move |_| Ok(handle.clone()));
        let registry = MulticastRegistry::bind(&config, &drivers).await.unwrap();
        (registry, shared)
    }

    fn online(region: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("status".to_string(), Value::Str("online".to_string()));
        m.insert("region".to_string(), Value::Str(region.to_string()));
        m
    }

    #[tokio::test]
    async fn test_register_enumerate_unregister() {
        let (registry, _) = bind_registry().await;
        registry
            .register("dev-1", online("us-west"), Duration::ZERO)
            .await
            .unwrap();

        let all = registry.enumerate(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].identity, "dev-1");

        registry.unregister("dev-1").await.unwrap();
        assert!(registry.enumerate(None).unwrap().is_empty());
        // Unregister is idempotent
        registry.unregister("dev-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let (registry, _) = bind_registry().await;
        registry
            .register("dev-1", online("us-west"), Duration::ZERO)
            .await
            .unwrap();
        let err = registry
            .register("dev-1", online("eu-west"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PatternError::AlreadyRegistered(_)));

        // First registration's metadata persists
        let all = registry.enumerate(None).unwrap();
        assert_eq!(
            all[0].metadata.get("region"),
            Some(&Value::Str("us-west".to_string()))
        );
    }

    #[tokio::test]
    async fn test_expired_identity_invisible_and_replaceable() {
        let (registry, shared) = bind_registry().await;
        registry
            .register("dev-42", online("us-west"), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(registry.enumerate(None).unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        // Expired but not yet reaped: invisible to enumerate
        assert!(registry.enumerate(None).unwrap().is_empty());

        // Re-register over the stale record succeeds
        registry
            .register("dev-42", online("eu-west"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(registry.enumerate(None).unwrap().len(), 1);
        drop(shared);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let (mut config, shared) = namespace_config();
        config = config.with_behavior("max_identities", serde_json::json!(2));
        let mut drivers = DriverRegistry::new();
        let handle = shared.clone();
        drivers.register("memory", move |_| Ok(handle.clone()));
        let registry = MulticastRegistry::bind(&config, &drivers).await.unwrap();

        registry
            .register("a", Metadata::new(), Duration::ZERO)
            .await
            .unwrap();
        registry
            .register("b", Metadata::new(), Duration::ZERO)
            .await
            .unwrap();
        let err = registry
            .register("c", Metadata::new(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PatternError::Capacity(2)));
    }

    #[tokio::test]
    async fn test_filtered_multicast_reaches_only_matches() {
        let (registry, shared) = bind_registry().await;
        registry.register("a", online("us-west"), Duration::ZERO).await.unwrap();
        registry.register("b", online("us-west"), Duration::ZERO).await.unwrap();
        registry.register("c", online("eu-west"), Duration::ZERO).await.unwrap();

        let pubsub = shared.pubsub.clone().unwrap();
        let mut stream_a = pubsub.subscribe("multicast:a", "t").await.unwrap();
        let mut stream_c = pubsub.subscribe("multicast:c", "t").await.unwrap();

        let filter = Filter::And {
            clauses: vec![
                Filter::Eq {
                    field: "status".into(),
                    value: Value::Str("online".into()),
                },
                Filter::Eq {
                    field: "region".into(),
                    value: Value::Str("us-west".into()),
                },
            ],
        };
        let outcome = registry
            .multicast(Some(&filter), Bytes::from("ping"), Headers::new())
            .await
            .unwrap();
        assert_eq!(outcome.target_count, 2);
        assert_eq!(outcome.delivered_count, 2);
        assert_eq!(outcome.failed_count, 0);

        let got = tokio::time::timeout(Duration::from_millis(500), stream_a.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload, Bytes::from("ping"));

        // Non-matching identity receives nothing
        assert!(
            tokio::time::timeout(Duration::from_millis(300), stream_c.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_multicast_failure_reports_attempts() {
        let (registry, shared) = bind_registry().await;
        registry.register("a", online("us-west"), Duration::ZERO).await.unwrap();

        // Closing the backend makes every publish fail.
        shared.lifecycle.stop().await.unwrap();

        let outcome = registry
            .multicast(None, Bytes::from("ping"), Headers::new())
            .await
            .unwrap();
        assert_eq!(outcome.target_count, 1);
        assert_eq!(outcome.delivered_count, 0);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.results[0].status, TargetStatus::Failed);
        assert_eq!(outcome.results[0].attempts, 3);
        assert!(outcome.results[0].error.is_some());
    }

    #[tokio::test]
    async fn test_reaper_removes_backend_records() {
        let (mut config, shared) = namespace_config();
        config = config.with_behavior("reap_interval_seconds", serde_json::json!(1));
        let mut drivers = DriverRegistry::new();
        let handle = shared.clone();
        drivers.register("memory", move |_| Ok(handle.clone()));
        let registry = MulticastRegistry::bind(&config, &drivers).await.unwrap();
        registry.start().await.unwrap();

        registry
            .register("ghost", Metadata::new(), Duration::from_millis(200))
            .await
            .unwrap();
        let kv = shared.keyvalue.clone().unwrap();
        assert!(kv.get("identity:ghost").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(kv.get("identity:ghost").await.unwrap().is_none());
        assert!(registry.enumerate(None).unwrap().is_empty());

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_from_backend() {
        let (config, shared) = namespace_config();
        let mut drivers = DriverRegistry::new();
        let handle = shared.clone();
        drivers.register("memory", move |_| Ok(handle.clone()));

        let first = MulticastRegistry::bind(&config, &drivers).await.unwrap();
        first
            .register("survivor", online("us-west"), Duration::ZERO)
            .await
            .unwrap();

        // A second instance over the same backend sees the persisted record.
        let second = MulticastRegistry::bind(&config, &drivers).await.unwrap();
        let all = second.enumerate(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].identity, "survivor");
    }

    #[tokio::test]
    async fn test_drain_refuses_new_work() {
        let (registry, _) = bind_registry().await;
        let summary = registry.drain(Duration::from_millis(100), "test").await;
        assert_eq!(summary.aborted, 0);
        let err = registry
            .register("late", Metadata::new(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PatternError::ShuttingDown));
    }
}
