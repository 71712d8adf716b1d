//! Replicated-log command envelope.
//!
//! Commands are the only way admin state changes. The envelope carries the
//! issue time and issuer alongside a type-tagged payload; the consensus
//! layer wraps it with a log index and term.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use prism_traits::config::NamespaceConfig;
use prism_traits::driver::HealthState;

/// Type-tagged command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CommandPayload {
    /// Create or idempotently update a namespace.
    CreateNamespace {
        /// Namespace name.
        name: String,
        /// Pre-computed partition; derived from the name when absent.
        partition_id: Option<i32>,
        /// Proxy to pin; resolved from the partition map when absent.
        assigned_proxy: Option<String>,
        /// Administrator-provided configuration.
        config: NamespaceConfig,
        /// Principal recorded as creator on first insertion.
        principal: String,
    },
    /// Remove a namespace if present.
    DeleteNamespace {
        /// Namespace name.
        name: String,
    },
    /// Register a proxy or update a known one.
    RegisterProxy {
        /// Proxy id.
        proxy_id: String,
        /// Reachable address.
        address: String,
        /// Deployment region.
        region: String,
        /// Software version.
        version: String,
        /// Advertised capabilities.
        capabilities: Vec<String>,
        /// Free-form metadata.
        metadata: BTreeMap<String, String>,
    },
    /// Update proxy health from a heartbeat.
    UpdateProxyStatus {
        /// Proxy id.
        proxy_id: String,
        /// Reported status.
        status: HealthState,
        /// Heartbeat time (unix seconds).
        last_seen: i64,
    },
    /// Register a launcher or update a known one.
    RegisterLauncher {
        /// Launcher id.
        launcher_id: String,
        /// Reachable address.
        address: String,
        /// Deployment region.
        region: String,
        /// Software version.
        version: String,
        /// Pattern types the launcher can host.
        process_types: Vec<String>,
        /// Maximum concurrent processes.
        max_processes: u32,
    },
    /// Update launcher health from a heartbeat.
    UpdateLauncherStatus {
        /// Launcher id.
        launcher_id: String,
        /// Reported status.
        status: HealthState,
        /// Heartbeat time (unix seconds).
        last_seen: i64,
        /// Reported free slots, when the launcher self-reports.
        available_slots: Option<u32>,
    },
    /// Place a pattern on a launcher, consuming one slot.
    AssignPattern {
        /// Pattern instance id.
        pattern_id: String,
        /// Pattern type.
        pattern_type: String,
        /// Hosting launcher.
        launcher_id: String,
        /// Namespace the pattern serves.
        namespace: String,
        /// Namespace configuration for the executable.
        config: NamespaceConfig,
    },
    /// Request drain of a placed pattern.
    RevokePattern {
        /// Pattern instance id.
        pattern_id: String,
    },
    /// Launcher report that a revoked pattern finished draining.
    ReportPatternStopped {
        /// Pattern instance id.
        pattern_id: String,
    },
    /// Remove a proxy and free its partition ranges.
    EvictProxy {
        /// Proxy id.
        proxy_id: String,
    },
}

impl CommandPayload {
    /// Stable name of the command type, as carried on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CreateNamespace { .. } => "CreateNamespace",
            Self::DeleteNamespace { .. } => "DeleteNamespace",
            Self::RegisterProxy { .. } => "RegisterProxy",
            Self::UpdateProxyStatus { .. } => "UpdateProxyStatus",
            Self::RegisterLauncher { .. } => "RegisterLauncher",
            Self::UpdateLauncherStatus { .. } => "UpdateLauncherStatus",
            Self::AssignPattern { .. } => "AssignPattern",
            Self::RevokePattern { .. } => "RevokePattern",
            Self::ReportPatternStopped { .. } => "ReportPatternStopped",
            Self::EvictProxy { .. } => "EvictProxy",
        }
    }
}

/// A command with its envelope fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Issue time (unix seconds). Apply uses this, never the wall clock.
    pub timestamp: i64,
    /// Identity of the issuer.
    pub issuer: String,
    /// Type-tagged payload.
    #[serde(flatten)]
    pub payload: CommandPayload,
}

impl Command {
    /// Wrap a payload with envelope fields.
    pub fn new(timestamp: i64, issuer: impl Into<String>, payload: CommandPayload) -> Self {
        Self {
            timestamp,
            issuer: issuer.into(),
            payload,
        }
    }
}

/// A command at a position in the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log index; strictly increasing.
    pub index: u64,
    /// Log term.
    pub term: u64,
    /// The command to apply.
    pub command: Command,
}

impl LogEntry {
    /// Create a log entry.
    pub fn new(index: u64, term: u64, command: Command) -> Self {
        Self {
            index,
            term,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let command = Command::new(
            1700000000,
            "alice",
            CommandPayload::DeleteNamespace {
                name: "orders".into(),
            },
        );
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], "DeleteNamespace");
        assert_eq!(json["timestamp"], 1700000000);
        assert_eq!(json["issuer"], "alice");
        assert_eq!(json["payload"]["name"], "orders");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn test_deterministic_encoding() {
        let command = Command::new(
            1,
            "system",
            CommandPayload::RegisterProxy {
                proxy_id: "P1".into(),
                address: "a:1".into(),
                region: "us-west".into(),
                version: "1.0".into(),
                capabilities: vec!["keyvalue".into()],
                metadata: BTreeMap::new(),
            },
        );
        let first = serde_json::to_vec(&command).unwrap();
        let second = serde_json::to_vec(&command).unwrap();
        assert_eq!(first, second);
    }
}
