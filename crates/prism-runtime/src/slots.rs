//! Slot declaration, driver registries, and bind-time capability checks.
//!
//! A pattern declares its slots as [`SlotSpec`]s; namespace configuration
//! fills each slot with a backend selector and driver config. Binding
//! instantiates the drivers through a [`DriverRegistry`], runs their
//! lifecycle (`initialize` then `start`), and verifies every required
//! capability, failing fast with an error naming the slot and the missing
//! capability.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use prism_traits::config::SlotConfig;
use prism_traits::driver::{Capability, DriverConfig, DriverHandle};
use prism_traits::error::DriverError;

use crate::error::PatternError;

// =============================================================================
// SLOT SPECIFICATION
// =============================================================================

/// Declaration of one named slot in a pattern.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    /// Slot name (e.g. "registry", "message_source").
    pub name: &'static str,
    /// Capabilities the driver must all implement.
    pub required: Vec<Capability>,
    /// Capabilities of which the driver must implement at least one.
    pub any_of: Vec<Capability>,
    /// Whether the slot may be left unconfigured.
    pub optional: bool,
}

impl SlotSpec {
    /// A mandatory slot requiring all listed capabilities.
    pub fn required(name: &'static str, required: Vec<Capability>) -> Self {
        Self {
            name,
            required,
            any_of: Vec::new(),
            optional: false,
        }
    }

    /// An optional slot requiring all listed capabilities when configured.
    pub fn optional(name: &'static str, required: Vec<Capability>) -> Self {
        Self {
            name,
            required,
            any_of: Vec::new(),
            optional: true,
        }
    }

    /// Require at least one of the listed capabilities.
    pub fn with_any_of(mut self, any_of: Vec<Capability>) -> Self {
        self.any_of = any_of;
        self
    }
}

// =============================================================================
// DRIVER REGISTRY
// =============================================================================

type DriverFactory =
    Arc<dyn Fn(&DriverConfig) -> Result<DriverHandle, DriverError> + Send + Sync>;

/// Registry of driver factories by backend name.
///
/// The hosting process registers the backends it ships; namespace configs
/// select among them by name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory under a backend name.
    pub fn register<F>(&mut self, backend: &str, factory: F)
    where
        F: Fn(&DriverConfig) -> Result<DriverHandle, DriverError> + Send + Sync + 'static,
    {
        self.factories.insert(backend.to_string(), Arc::new(factory));
    }

    /// Backend names known to this registry.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiate a driver for the given backend.
    pub fn create(
        &self,
        backend: &str,
        config: &DriverConfig,
    ) -> Result<DriverHandle, PatternError> {
        let factory = self
            .factories
            .get(backend)
            .ok_or_else(|| PatternError::UnknownBackend(backend.to_string()))?;
        Ok(factory(config)?)
    }
}

// =============================================================================
// SLOT MAP
// =============================================================================

/// Bound slots of a running pattern, in bind order.
pub struct SlotMap {
    slots: BTreeMap<String, DriverHandle>,
    bind_order: Vec<String>,
}

impl SlotMap {
    /// Look up a bound slot.
    pub fn get(&self, name: &str) -> Option<&DriverHandle> {
        self.slots.get(name)
    }

    /// Look up a bound slot, failing when absent.
    pub fn require(&self, name: &str) -> Result<&DriverHandle, PatternError> {
        self.slots
            .get(name)
            .ok_or_else(|| PatternError::MissingSlot(name.to_string()))
    }

    /// Names of the bound slots, in bind order.
    pub fn names(&self) -> &[String] {
        &self.bind_order
    }

    /// Stop all drivers in reverse order of initialization.
    pub async fn stop_all(&self) {
        for name in self.bind_order.iter().rev() {
            if let Some(handle) = self.slots.get(name) {
                if let Err(e) = handle.lifecycle.stop().await {
                    warn!(slot = %name, error = %e, "Driver stop failed");
                }
            }
        }
    }
}

// =============================================================================
// BINDING
// =============================================================================

/// Instantiate, start, and verify drivers for every declared slot.
///
/// Unknown slot names in the configuration are rejected. On any failure,
/// drivers already started are stopped in reverse order before the error is
/// returned.
pub async fn bind_slots(
    specs: &[SlotSpec],
    configs: &BTreeMap<String, SlotConfig>,
    registry: &DriverRegistry,
) -> Result<SlotMap, PatternError> {
    for name in configs.keys() {
        if !specs.iter().any(|s| s.name == name) {
            return Err(PatternError::UnknownSlot(name.clone()));
        }
    }

    let mut slots = BTreeMap::new();
    let mut bind_order = Vec::new();

    let result = async {
        for spec in specs {
            let config = match configs.get(spec.name) {
                Some(c) => c,
                None if spec.optional => continue,
                None => return Err(PatternError::MissingSlot(spec.name.to_string())),
            };

            let handle = registry.create(&config.backend, &config.config)?;
            handle.lifecycle.initialize(&config.config).await?;
            handle.lifecycle.start().await?;
            slots.insert(spec.name.to_string(), handle);
            bind_order.push(spec.name.to_string());
            let handle = &slots[spec.name];

            verify_capabilities(spec, config, handle)?;
            debug!(slot = spec.name, backend = %config.backend, "Slot bound");
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        // Unwind: stop whatever already started, newest first.
        for name in bind_order.iter().rev() {
            if let Some(handle) = slots.get(name) {
                let _ = handle.lifecycle.stop().await;
            }
        }
        return Err(e);
    }

    Ok(SlotMap { slots, bind_order })
}

fn verify_capabilities(
    spec: &SlotSpec,
    config: &SlotConfig,
    handle: &DriverHandle,
) -> Result<(), PatternError> {
    for capability in &spec.required {
        if !handle.implements(*capability) {
            return Err(PatternError::MissingCapability {
                slot: spec.name.to_string(),
                capability: *capability,
            });
        }
    }

    if !spec.any_of.is_empty() && !spec.any_of.iter().any(|c| handle.implements(*c)) {
        return Err(PatternError::MissingCapability {
            slot: spec.name.to_string(),
            capability: spec.any_of[0],
        });
    }

    // Administrator-declared expectations are checked too, so a config
    // demanding more than the pattern needs still fails loudly.
    for declared in &config.capabilities {
        let capability: Capability = declared
            .parse()
            .map_err(|_| PatternError::Validation(format!("unknown capability: {}", declared)))?;
        if !handle.implements(capability) {
            return Err(PatternError::MissingCapability {
                slot: spec.name.to_string(),
                capability,
            });
        }
    }

    Ok(())
}
