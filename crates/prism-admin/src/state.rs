//! Cluster state entities owned by the admin FSM.
//!
//! Every map is a `BTreeMap` so the serialized snapshot of a state is a
//! deterministic function of its contents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use prism_traits::config::NamespaceConfig;
use prism_traits::driver::HealthState;

use crate::partition::PartitionRange;

/// A registered namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    /// Unique name.
    pub name: String,
    /// Partition derived from the name (`0..256`).
    pub partition_id: i32,
    /// Proxy currently serving the partition, when one owns it.
    pub assigned_proxy: Option<String>,
    /// Administrator-provided configuration.
    pub config: NamespaceConfig,
    /// Principal that created the namespace.
    pub created_by: String,
    /// Creation time (unix seconds).
    pub created_at: i64,
    /// Last update time (unix seconds).
    pub updated_at: i64,
}

/// A registered proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEntry {
    /// Unique proxy id.
    pub proxy_id: String,
    /// Reachable address (host:port).
    pub address: String,
    /// Deployment region.
    pub region: String,
    /// Software version.
    pub version: String,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Health status.
    pub status: HealthState,
    /// Last heartbeat (unix seconds).
    pub last_seen: i64,
    /// Registration sequence, fixing partition-range order.
    pub seq: u64,
    /// Partition ranges this proxy owns.
    pub partition_ranges: Vec<PartitionRange>,
}

/// A registered launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherEntry {
    /// Unique launcher id.
    pub launcher_id: String,
    /// Reachable address (host:port).
    pub address: String,
    /// Deployment region.
    pub region: String,
    /// Software version.
    pub version: String,
    /// Pattern types this launcher can host.
    pub process_types: Vec<String>,
    /// Maximum concurrent pattern processes.
    pub max_processes: u32,
    /// Remaining free slots.
    pub available_slots: u32,
    /// Health status.
    pub status: HealthState,
    /// Last heartbeat (unix seconds).
    pub last_seen: i64,
}

/// Lifecycle of a pattern placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    /// Assigned but not yet reported running.
    Pending,
    /// Running on its launcher.
    Running,
    /// Drain requested.
    Draining,
    /// Drained and stopped.
    Stopped,
    /// Failed on the launcher.
    Failed,
}

/// A pattern placed on a launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPlacement {
    /// Unique pattern instance id.
    pub pattern_id: String,
    /// Pattern type (e.g. "multicast-registry").
    pub pattern_type: String,
    /// Hosting launcher.
    pub launcher_id: String,
    /// Namespace the pattern serves.
    pub namespace: String,
    /// Namespace configuration handed to the executable.
    pub config: NamespaceConfig,
    /// Current lifecycle status.
    pub status: PlacementStatus,
}

/// Complete admin state. Mutated only through FSM apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Monotonic state version, bumped on every successful apply.
    pub version: u64,
    /// Index of the last applied log entry.
    pub last_applied_index: u64,
    /// Term of the last applied log entry.
    pub last_applied_term: u64,
    /// Namespaces by name.
    pub namespaces: BTreeMap<String, NamespaceEntry>,
    /// Proxies by id.
    pub proxies: BTreeMap<String, ProxyEntry>,
    /// Launchers by id.
    pub launchers: BTreeMap<String, LauncherEntry>,
    /// Pattern placements by id.
    pub patterns: BTreeMap<String, PatternPlacement>,
    /// Partition ownership, partition id to proxy id.
    pub partitions: BTreeMap<i32, String>,
    /// Next proxy registration sequence number.
    pub next_proxy_seq: u64,
    /// Launcher id to placed pattern ids. Derived; rebuilt on restore.
    #[serde(skip)]
    pub launcher_patterns: BTreeMap<String, BTreeSet<String>>,
}

impl ClusterState {
    /// Proxy owning the given partition, if any.
    pub fn partition_owner(&self, partition: i32) -> Option<&str> {
        self.partitions.get(&partition).map(String::as_str)
    }

    /// Namespaces whose partition falls in any of the given ranges.
    pub fn namespaces_in_ranges(&self, ranges: &[PartitionRange]) -> Vec<&NamespaceEntry> {
        self.namespaces
            .values()
            .filter(|ns| ranges.iter().any(|r| r.contains(ns.partition_id)))
            .collect()
    }

    /// Non-stopped placements on a launcher.
    pub fn active_patterns_on(&self, launcher_id: &str) -> usize {
        self.launcher_patterns
            .get(launcher_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.patterns
                            .get(*id)
                            .map(|p| {
                                !matches!(
                                    p.status,
                                    PlacementStatus::Stopped | PlacementStatus::Failed
                                )
                            })
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Rebuild the launcher-to-patterns index from the placements map.
    pub fn rebuild_indexes(&mut self) {
        self.launcher_patterns.clear();
        for (pattern_id, placement) in &self.patterns {
            self.launcher_patterns
                .entry(placement.launcher_id.clone())
                .or_default()
                .insert(pattern_id.clone());
        }
    }
}
