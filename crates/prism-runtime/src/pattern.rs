//! The pattern contract and pattern instantiation.
//!
//! Every pattern exposes the same lifecycle the control plane drives over
//! the bridge: start, drain, stop, health, plus the interface names it
//! serves for dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use prism_traits::config::NamespaceConfig;

use crate::consumer::{Consumer, LoggingProcessor};
use crate::error::PatternError;
use crate::registry::MulticastRegistry;
use crate::runtime::{DrainSummary, PatternHealth};
use crate::slots::DriverRegistry;

/// A running pattern instance.
#[async_trait]
pub trait Pattern: Send + Sync {
    /// Pattern type name (e.g. "multicast-registry").
    fn name(&self) -> &str;

    /// Executable version, matched against the namespace's
    /// `pattern_version` when one is pinned.
    fn version(&self) -> &str;

    /// Interface names this pattern serves, used for dispatch by the proxy.
    fn interfaces(&self) -> Vec<String>;

    /// Begin serving operations and start background tasks.
    async fn start(&self) -> Result<(), PatternError>;

    /// Refuse new operations and wait for in-flight ones.
    async fn drain(&self, timeout: Duration, reason: &str) -> DrainSummary;

    /// Tear down background tasks and release all drivers.
    async fn stop(&self) -> Result<(), PatternError>;

    /// Aggregated health.
    async fn health(&self) -> PatternHealth;
}

/// Instantiate a pattern from a namespace configuration.
///
/// Binds slots through the given driver registry and verifies the pinned
/// `pattern_version`, when present, against the built-in executable version.
pub async fn instantiate_pattern(
    config: &NamespaceConfig,
    drivers: &DriverRegistry,
) -> Result<Arc<dyn Pattern>, PatternError> {
    let pattern: Arc<dyn Pattern> = match config.pattern.as_str() {
        "multicast-registry" => MulticastRegistry::bind(config, drivers).await?,
        "consumer" => Consumer::bind(config, drivers, Arc::new(LoggingProcessor)).await?,
        other => {
            return Err(PatternError::Validation(format!(
                "unknown pattern: {}",
                other
            )))
        }
    };

    if !config.pattern_version.is_empty() && config.pattern_version != pattern.version() {
        pattern.stop().await?;
        return Err(PatternError::Validation(format!(
            "pattern version mismatch: namespace pins {}, executable is {}",
            config.pattern_version,
            env!("CARGO_PKG_VERSION")
        )));
    }

    Ok(pattern)
}
