//! Namespace and slot configuration types.
//!
//! A namespace binds a pattern to concrete backend drivers. Administrators
//! provide this configuration; the control plane passes it through to
//! proxies and pattern executables unmodified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::DriverConfig;

/// Driver selection and configuration for one pattern slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Backend driver name (e.g. "memory", "redb").
    pub backend: String,
    /// Capabilities the administrator expects the driver to provide.
    /// Checked against the driver's declared capabilities at bind time.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Driver-specific configuration, passed through opaquely.
    #[serde(default)]
    pub config: DriverConfig,
}

impl SlotConfig {
    /// Create a slot config for the given backend.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            capabilities: Vec::new(),
            config: DriverConfig::new(),
        }
    }

    /// Add an expected capability.
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    /// Add a driver config entry.
    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }
}

/// Administrator-provided namespace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Unique namespace name.
    pub name: String,
    /// Pattern to instantiate ("multicast-registry" | "consumer" | ...).
    pub pattern: String,
    /// Expected pattern executable version. Empty = any.
    #[serde(default)]
    pub pattern_version: String,
    /// Slot bindings by slot name.
    #[serde(default)]
    pub slots: BTreeMap<String, SlotConfig>,
    /// Pattern behavior tuning, scalar values only.
    #[serde(default)]
    pub behavior: BTreeMap<String, serde_json::Value>,
}

impl NamespaceConfig {
    /// Create a config for the given namespace and pattern.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            pattern_version: String::new(),
            slots: BTreeMap::new(),
            behavior: BTreeMap::new(),
        }
    }

    /// Bind a slot.
    pub fn with_slot(mut self, name: &str, slot: SlotConfig) -> Self {
        self.slots.insert(name.to_string(), slot);
        self
    }

    /// Set a behavior key.
    pub fn with_behavior(mut self, key: &str, value: serde_json::Value) -> Self {
        self.behavior.insert(key.to_string(), value);
        self
    }

    /// String behavior value, or `default` when absent or mistyped.
    pub fn behavior_str(&self, key: &str, default: &str) -> String {
        self.behavior
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    /// Unsigned behavior value, or `default` when absent or mistyped.
    pub fn behavior_u64(&self, key: &str, default: u64) -> u64 {
        self.behavior.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    /// Boolean behavior value, or `default` when absent or mistyped.
    pub fn behavior_bool(&self, key: &str, default: bool) -> bool {
        self.behavior
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_accessors() {
        let config = NamespaceConfig::new("orders", "consumer")
            .with_behavior("topic", serde_json::json!("orders-events"))
            .with_behavior("concurrency", serde_json::json!(8))
            .with_behavior("auto_commit", serde_json::json!(false));

        assert_eq!(config.behavior_str("topic", ""), "orders-events");
        assert_eq!(config.behavior_u64("concurrency", 4), 8);
        assert!(!config.behavior_bool("auto_commit", true));
        // Absent keys fall back
        assert_eq!(config.behavior_u64("max_retries", 3), 3);
        // Mistyped keys fall back
        assert_eq!(config.behavior_u64("topic", 9), 9);
    }

    #[test]
    fn test_json_round_trip() {
        let config = NamespaceConfig::new("devices", "multicast-registry")
            .with_slot(
                "registry",
                SlotConfig::new("memory").with_capability("keyvalue-basic"),
            )
            .with_slot("messaging", SlotConfig::new("memory"))
            .with_behavior("max_identities", serde_json::json!(500));

        let json = serde_json::to_string(&config).unwrap();
        let back: NamespaceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.slots["registry"].backend, "memory");
    }
}
