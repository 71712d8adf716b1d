//! The admin finite-state machine.
//!
//! One `apply` at a time (the consensus layer guarantees ordering); readers
//! take the shared lock; snapshot clones the state under the shared lock and
//! serializes outside it. Apply is a pure transform over state plus the
//! command envelope: no clocks, no I/O, no randomness.
//!
//! Command errors (unknown launcher, exhausted slots) advance
//! `last_applied_index`/`last_applied_term` but leave the rest of the state
//! untouched, so a rejected command never stalls the log.

use parking_lot::RwLock;
use tracing::{debug, warn};

use prism_traits::driver::HealthState;

use crate::command::{Command, CommandPayload, LogEntry};
use crate::error::FsmError;
use crate::partition::{allocate_ranges, partition_for, PARTITION_COUNT};
use crate::state::{
    ClusterState, LauncherEntry, NamespaceEntry, PatternPlacement, PlacementStatus, ProxyEntry,
};

/// The replicated admin state machine.
#[derive(Default)]
pub struct AdminFsm {
    state: RwLock<ClusterState>,
}

impl AdminFsm {
    /// Create an FSM with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one log entry. Log indexes are 1-based; entries at or below
    /// `last_applied_index` are skipped idempotently.
    pub fn apply(&self, entry: &LogEntry) -> Result<(), FsmError> {
        let mut state = self.state.write();
        if entry.index <= state.last_applied_index {
            warn!(
                index = entry.index,
                applied = state.last_applied_index,
                "Skipping already-applied log entry"
            );
            return Ok(());
        }

        let result = Self::apply_command(&mut state, &entry.command);
        state.last_applied_index = entry.index;
        state.last_applied_term = entry.term;
        match result {
            Ok(()) => {
                state.version += 1;
                debug!(
                    index = entry.index,
                    command = entry.command.payload.type_name(),
                    version = state.version,
                    "Applied command"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    index = entry.index,
                    command = entry.command.payload.type_name(),
                    error = %e,
                    "Command rejected"
                );
                Err(e)
            }
        }
    }

    /// Decode and apply a raw command at the given log position.
    ///
    /// Malformed payloads are logged and skipped, advancing only
    /// `last_applied_index`/`last_applied_term`.
    pub fn apply_raw(&self, index: u64, term: u64, bytes: &[u8]) -> Result<(), FsmError> {
        match serde_json::from_slice::<Command>(bytes) {
            Ok(command) => self.apply(&LogEntry::new(index, term, command)),
            Err(e) => {
                let mut state = self.state.write();
                if index > state.last_applied_index {
                    state.last_applied_index = index;
                    state.last_applied_term = term;
                }
                warn!(index, error = %e, "Skipping malformed command");
                Err(FsmError::Malformed(e.to_string()))
            }
        }
    }

    /// Run a closure against the state under the shared lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&ClusterState) -> R) -> R {
        f(&self.state.read())
    }

    /// Current state version.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// `(last_applied_index, last_applied_term)`.
    pub fn last_applied(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.last_applied_index, state.last_applied_term)
    }

    /// Clone a namespace entry.
    pub fn get_namespace(&self, name: &str) -> Option<NamespaceEntry> {
        self.state.read().namespaces.get(name).cloned()
    }

    /// Clone a proxy entry.
    pub fn get_proxy(&self, proxy_id: &str) -> Option<ProxyEntry> {
        self.state.read().proxies.get(proxy_id).cloned()
    }

    /// Clone a launcher entry.
    pub fn get_launcher(&self, launcher_id: &str) -> Option<LauncherEntry> {
        self.state.read().launchers.get(launcher_id).cloned()
    }

    /// Clone a pattern placement.
    pub fn get_pattern(&self, pattern_id: &str) -> Option<PatternPlacement> {
        self.state.read().patterns.get(pattern_id).cloned()
    }

    /// Serialize the complete state.
    ///
    /// The snapshot is a deterministic function of the applied command
    /// sequence: identical logs yield byte-equal snapshots.
    pub fn snapshot(&self) -> Result<Vec<u8>, FsmError> {
        let state = self.state.read().clone();
        serde_json::to_vec(&state).map_err(|e| FsmError::InvalidSnapshot(e.to_string()))
    }

    /// Replace all state from a snapshot atomically.
    ///
    /// On decode failure the current state is left untouched.
    pub fn restore(&self, data: &[u8]) -> Result<(), FsmError> {
        let mut restored: ClusterState =
            serde_json::from_slice(data).map_err(|e| FsmError::InvalidSnapshot(e.to_string()))?;
        restored.rebuild_indexes();
        *self.state.write() = restored;
        Ok(())
    }

    // =========================================================================
    // COMMAND APPLICATION
    // =========================================================================

    fn apply_command(state: &mut ClusterState, command: &Command) -> Result<(), FsmError> {
        let timestamp = command.timestamp;
        match &command.payload {
            CommandPayload::CreateNamespace {
                name,
                partition_id,
                assigned_proxy,
                config,
                principal,
            } => {
                let partition = match partition_id {
                    Some(p) if !(0..PARTITION_COUNT).contains(p) => {
                        return Err(FsmError::PartitionOutOfRange(*p))
                    }
                    Some(p) => *p,
                    None => partition_for(name),
                };
                let owner = assigned_proxy
                    .clone()
                    .or_else(|| state.partition_owner(partition).map(str::to_string));

                if let Some(existing) = state.namespaces.get_mut(name) {
                    existing.partition_id = partition;
                    existing.assigned_proxy = owner;
                    existing.config = config.clone();
                    existing.updated_at = timestamp;
                } else {
                    state.namespaces.insert(
                        name.clone(),
                        NamespaceEntry {
                            name: name.clone(),
                            partition_id: partition,
                            assigned_proxy: owner,
                            config: config.clone(),
                            created_by: principal.clone(),
                            created_at: timestamp,
                            updated_at: timestamp,
                        },
                    );
                }
                Ok(())
            }

            CommandPayload::DeleteNamespace { name } => {
                state.namespaces.remove(name);
                Ok(())
            }

            CommandPayload::RegisterProxy {
                proxy_id,
                address,
                region,
                version,
                capabilities,
                metadata,
            } => {
                if let Some(existing) = state.proxies.get_mut(proxy_id) {
                    // Known proxy: refresh identity, keep its ranges.
                    existing.address = address.clone();
                    existing.region = region.clone();
                    existing.version = version.clone();
                    existing.capabilities = capabilities.clone();
                    existing.metadata = metadata.clone();
                    existing.status = HealthState::Healthy;
                    existing.last_seen = timestamp;
                } else {
                    let seq = state.next_proxy_seq;
                    state.next_proxy_seq += 1;
                    state.proxies.insert(
                        proxy_id.clone(),
                        ProxyEntry {
                            proxy_id: proxy_id.clone(),
                            address: address.clone(),
                            region: region.clone(),
                            version: version.clone(),
                            capabilities: capabilities.clone(),
                            metadata: metadata.clone(),
                            status: HealthState::Healthy,
                            last_seen: timestamp,
                            seq,
                            partition_ranges: Vec::new(),
                        },
                    );
                    Self::rebuild_partitions(state);
                }
                Ok(())
            }

            CommandPayload::UpdateProxyStatus {
                proxy_id,
                status,
                last_seen,
            } => {
                // Heartbeats for unknown proxies are a no-op.
                if let Some(proxy) = state.proxies.get_mut(proxy_id) {
                    proxy.status = *status;
                    proxy.last_seen = *last_seen;
                }
                Ok(())
            }

            CommandPayload::RegisterLauncher {
                launcher_id,
                address,
                region,
                version,
                process_types,
                max_processes,
            } => {
                let active = state.active_patterns_on(launcher_id) as u32;
                if let Some(existing) = state.launchers.get_mut(launcher_id) {
                    existing.address = address.clone();
                    existing.region = region.clone();
                    existing.version = version.clone();
                    existing.process_types = process_types.clone();
                    if existing.max_processes != *max_processes {
                        existing.max_processes = *max_processes;
                        existing.available_slots = max_processes.saturating_sub(active);
                    }
                    existing.status = HealthState::Healthy;
                    existing.last_seen = timestamp;
                } else {
                    state.launchers.insert(
                        launcher_id.clone(),
                        LauncherEntry {
                            launcher_id: launcher_id.clone(),
                            address: address.clone(),
                            region: region.clone(),
                            version: version.clone(),
                            process_types: process_types.clone(),
                            max_processes: *max_processes,
                            available_slots: *max_processes,
                            status: HealthState::Healthy,
                            last_seen: timestamp,
                        },
                    );
                }
                Ok(())
            }

            CommandPayload::UpdateLauncherStatus {
                launcher_id,
                status,
                last_seen,
                available_slots,
            } => {
                let launcher = state
                    .launchers
                    .get_mut(launcher_id)
                    .ok_or_else(|| FsmError::UnknownLauncher(launcher_id.clone()))?;
                launcher.status = *status;
                launcher.last_seen = *last_seen;
                if let Some(slots) = available_slots {
                    launcher.available_slots = (*slots).min(launcher.max_processes);
                }
                Ok(())
            }

            CommandPayload::AssignPattern {
                pattern_id,
                pattern_type,
                launcher_id,
                namespace,
                config,
            } => {
                if let Some(existing) = state.patterns.get(pattern_id) {
                    if existing.launcher_id == *launcher_id {
                        // Identical re-apply; slots were already consumed.
                        return Ok(());
                    }
                    return Err(FsmError::PatternAlreadyAssigned(pattern_id.clone()));
                }
                let launcher = state
                    .launchers
                    .get_mut(launcher_id)
                    .ok_or_else(|| FsmError::UnknownLauncher(launcher_id.clone()))?;
                if launcher.available_slots == 0 {
                    return Err(FsmError::NoAvailableSlots(launcher_id.clone()));
                }
                launcher.available_slots -= 1;
                state.patterns.insert(
                    pattern_id.clone(),
                    PatternPlacement {
                        pattern_id: pattern_id.clone(),
                        pattern_type: pattern_type.clone(),
                        launcher_id: launcher_id.clone(),
                        namespace: namespace.clone(),
                        config: config.clone(),
                        status: PlacementStatus::Running,
                    },
                );
                state
                    .launcher_patterns
                    .entry(launcher_id.clone())
                    .or_default()
                    .insert(pattern_id.clone());
                Ok(())
            }

            CommandPayload::RevokePattern { pattern_id } => {
                let placement = state
                    .patterns
                    .get_mut(pattern_id)
                    .ok_or_else(|| FsmError::UnknownPattern(pattern_id.clone()))?;
                match placement.status {
                    PlacementStatus::Stopped | PlacementStatus::Failed => Ok(()),
                    _ => {
                        placement.status = PlacementStatus::Draining;
                        Ok(())
                    }
                }
            }

            CommandPayload::ReportPatternStopped { pattern_id } => {
                let placement = state
                    .patterns
                    .get_mut(pattern_id)
                    .ok_or_else(|| FsmError::UnknownPattern(pattern_id.clone()))?;
                if placement.status == PlacementStatus::Stopped {
                    return Ok(());
                }
                placement.status = PlacementStatus::Stopped;
                let launcher_id = placement.launcher_id.clone();
                if let Some(launcher) = state.launchers.get_mut(&launcher_id) {
                    launcher.available_slots =
                        (launcher.available_slots + 1).min(launcher.max_processes);
                }
                Ok(())
            }

            CommandPayload::EvictProxy { proxy_id } => {
                if state.proxies.remove(proxy_id).is_none() {
                    return Err(FsmError::UnknownProxy(proxy_id.clone()));
                }
                Self::rebuild_partitions(state);
                Ok(())
            }
        }
    }

    /// Rebuild range assignment over all proxies in registration order, then
    /// refresh the partition map and namespace ownership.
    fn rebuild_partitions(state: &mut ClusterState) {
        let mut order: Vec<(u64, String)> = state
            .proxies
            .values()
            .map(|p| (p.seq, p.proxy_id.clone()))
            .collect();
        order.sort();

        for proxy in state.proxies.values_mut() {
            proxy.partition_ranges.clear();
        }
        state.partitions.clear();

        let ranges = allocate_ranges(order.len());
        for ((_, proxy_id), range) in order.iter().zip(ranges.iter()) {
            if let Some(proxy) = state.proxies.get_mut(proxy_id) {
                proxy.partition_ranges = vec![*range];
            }
            for partition in range.start..=range.end {
                state.partitions.insert(partition, proxy_id.clone());
            }
        }

        let partitions = state.partitions.clone();
        for namespace in state.namespaces.values_mut() {
            namespace.assigned_proxy = partitions.get(&namespace.partition_id).cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_traits::config::NamespaceConfig;
    use std::collections::BTreeMap;

    fn entry(index: u64, payload: CommandPayload) -> LogEntry {
        LogEntry::new(index, 1, Command::new(1_700_000_000 + index as i64, "test", payload))
    }

    fn register_proxy(proxy_id: &str, address: &str, version: &str) -> CommandPayload {
        CommandPayload::RegisterProxy {
            proxy_id: proxy_id.into(),
            address: address.into(),
            region: "us-west".into(),
            version: version.into(),
            capabilities: vec![],
            metadata: BTreeMap::new(),
        }
    }

    fn register_launcher(launcher_id: &str, max_processes: u32) -> CommandPayload {
        CommandPayload::RegisterLauncher {
            launcher_id: launcher_id.into(),
            address: "l:1".into(),
            region: "us-west".into(),
            version: "1.0".into(),
            process_types: vec!["multicast-registry".into()],
            max_processes,
        }
    }

    fn create_namespace(name: &str, principal: &str) -> CommandPayload {
        CommandPayload::CreateNamespace {
            name: name.into(),
            partition_id: None,
            assigned_proxy: None,
            config: NamespaceConfig::new(name, "multicast-registry"),
            principal: principal.into(),
        }
    }

    fn assign_pattern(pattern_id: &str, launcher_id: &str) -> CommandPayload {
        CommandPayload::AssignPattern {
            pattern_id: pattern_id.into(),
            pattern_type: "multicast-registry".into(),
            launcher_id: launcher_id.into(),
            namespace: "devices".into(),
            config: NamespaceConfig::new("devices", "multicast-registry"),
        }
    }

    #[test]
    fn test_namespace_creation_and_partition_routing() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_proxy("P1", "a:1", "1.0"))).unwrap();
        fsm.apply(&entry(2, create_namespace("orders", "alice"))).unwrap();

        let ns = fsm.get_namespace("orders").unwrap();
        assert_eq!(ns.partition_id, partition_for("orders"));
        assert_eq!(ns.assigned_proxy.as_deref(), Some("P1"));
        assert_eq!(ns.created_by, "alice");
    }

    #[test]
    fn test_proxy_reregistration_is_idempotent() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_proxy("P1", "a:1", "1.0"))).unwrap();
        fsm.apply(&entry(2, register_proxy("P1", "a:1", "1.1"))).unwrap();

        fsm.with_state(|state| {
            assert_eq!(state.proxies.len(), 1);
        });
        let proxy = fsm.get_proxy("P1").unwrap();
        assert_eq!(proxy.version, "1.1");
        assert_eq!(proxy.status, HealthState::Healthy);
        // Sole proxy still owns the full range.
        assert_eq!(proxy.partition_ranges, vec![crate::PartitionRange::new(0, 255)]);
    }

    #[test]
    fn test_launcher_capacity_enforced() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_launcher("L1", 2))).unwrap();
        fsm.apply(&entry(2, assign_pattern("pat-1", "L1"))).unwrap();
        fsm.apply(&entry(3, assign_pattern("pat-2", "L1"))).unwrap();
        assert_eq!(fsm.get_launcher("L1").unwrap().available_slots, 0);

        let err = fsm.apply(&entry(4, assign_pattern("pat-3", "L1"))).unwrap_err();
        assert!(matches!(err, FsmError::NoAvailableSlots(_)));
        assert_eq!(
            err.kind(),
            prism_traits::error::ErrorKind::PreconditionFailed
        );
        // The rejected command still advanced the log position.
        assert_eq!(fsm.last_applied(), (4, 1));
    }

    #[test]
    fn test_revoke_and_stop_restore_slots() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_launcher("L1", 2))).unwrap();
        fsm.apply(&entry(2, assign_pattern("pat-1", "L1"))).unwrap();
        fsm.apply(&entry(3, CommandPayload::RevokePattern { pattern_id: "pat-1".into() }))
            .unwrap();
        assert_eq!(
            fsm.get_pattern("pat-1").unwrap().status,
            PlacementStatus::Draining
        );
        // Slot comes back only when the launcher reports the stop.
        assert_eq!(fsm.get_launcher("L1").unwrap().available_slots, 1);

        fsm.apply(&entry(
            4,
            CommandPayload::ReportPatternStopped { pattern_id: "pat-1".into() },
        ))
        .unwrap();
        assert_eq!(
            fsm.get_pattern("pat-1").unwrap().status,
            PlacementStatus::Stopped
        );
        assert_eq!(fsm.get_launcher("L1").unwrap().available_slots, 2);

        // Double report does not over-credit.
        fsm.apply(&entry(
            5,
            CommandPayload::ReportPatternStopped { pattern_id: "pat-1".into() },
        ))
        .unwrap();
        assert_eq!(fsm.get_launcher("L1").unwrap().available_slots, 2);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(
            1,
            CommandPayload::CreateNamespace {
                name: "ns-1".into(),
                partition_id: Some(1),
                assigned_proxy: Some("P1".into()),
                config: NamespaceConfig::new("ns-1", "consumer"),
                principal: "alice".into(),
            },
        ))
        .unwrap();
        fsm.apply(&entry(2, register_proxy("P1", "a:1", "1.0"))).unwrap();
        fsm.apply(&entry(3, register_launcher("L1", 10))).unwrap();

        let snapshot = fsm.snapshot().unwrap();

        let restored = AdminFsm::new();
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.get_namespace("ns-1").unwrap().partition_id, 1);
        assert_eq!(restored.get_proxy("P1").unwrap().address, "a:1");
        let launcher = restored.get_launcher("L1").unwrap();
        assert_eq!(launcher.max_processes, 10);
        assert_eq!(launcher.available_slots, 10);
        assert_eq!(restored.last_applied(), (3, 1));

        // Applying an empty tail leaves the states equal.
        assert_eq!(fsm.snapshot().unwrap(), restored.snapshot().unwrap());
    }

    #[test]
    fn test_identical_logs_yield_byte_equal_snapshots() {
        let commands = vec![
            register_proxy("P1", "a:1", "1.0"),
            register_proxy("P2", "b:1", "1.0"),
            create_namespace("orders", "alice"),
            register_launcher("L1", 4),
            assign_pattern("pat-1", "L1"),
            CommandPayload::RevokePattern { pattern_id: "pat-1".into() },
            CommandPayload::ReportPatternStopped { pattern_id: "pat-1".into() },
            CommandPayload::EvictProxy { proxy_id: "P2".into() },
        ];

        let first = AdminFsm::new();
        let second = AdminFsm::new();
        for (i, payload) in commands.iter().enumerate() {
            let e = entry(i as u64 + 1, payload.clone());
            let _ = first.apply(&e);
            let _ = second.apply(&e);
        }
        assert_eq!(first.snapshot().unwrap(), second.snapshot().unwrap());
    }

    #[test]
    fn test_partition_rebuild_on_registration_and_eviction() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_proxy("P1", "a:1", "1.0"))).unwrap();
        fsm.apply(&entry(2, create_namespace("orders", "alice"))).unwrap();
        fsm.apply(&entry(3, register_proxy("P2", "b:1", "1.0"))).unwrap();

        let p1 = fsm.get_proxy("P1").unwrap();
        let p2 = fsm.get_proxy("P2").unwrap();
        assert_eq!(p1.partition_ranges, vec![crate::PartitionRange::new(0, 127)]);
        assert_eq!(p2.partition_ranges, vec![crate::PartitionRange::new(128, 255)]);

        // Namespace ownership follows its partition.
        let ns = fsm.get_namespace("orders").unwrap();
        let expected_owner = if ns.partition_id <= 127 { "P1" } else { "P2" };
        assert_eq!(ns.assigned_proxy.as_deref(), Some(expected_owner));

        fsm.apply(&entry(4, CommandPayload::EvictProxy { proxy_id: "P1".into() }))
            .unwrap();
        let p2 = fsm.get_proxy("P2").unwrap();
        assert_eq!(p2.partition_ranges, vec![crate::PartitionRange::new(0, 255)]);
        assert_eq!(
            fsm.get_namespace("orders").unwrap().assigned_proxy.as_deref(),
            Some("P2")
        );
    }

    #[test]
    fn test_malformed_command_skipped_but_log_advances() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_launcher("L1", 1))).unwrap();

        let err = fsm.apply_raw(2, 1, b"{\"type\":\"Nonsense\"}").unwrap_err();
        assert!(matches!(err, FsmError::Malformed(_)));
        assert_eq!(fsm.last_applied(), (2, 1));
        // Version did not move.
        assert_eq!(fsm.version(), 1);

        // The log keeps flowing after the bad entry.
        let good = serde_json::to_vec(&Command::new(3, "test", register_launcher("L2", 1))).unwrap();
        fsm.apply_raw(3, 1, &good).unwrap();
        assert!(fsm.get_launcher("L2").is_some());
    }

    #[test]
    fn test_duplicate_index_skipped() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, register_launcher("L1", 5))).unwrap();
        let version = fsm.version();

        // Replay of the same index is a no-op.
        fsm.apply(&entry(1, register_launcher("L1", 99))).unwrap();
        assert_eq!(fsm.version(), version);
        assert_eq!(fsm.get_launcher("L1").unwrap().max_processes, 5);
    }

    #[test]
    fn test_unknown_proxy_heartbeat_is_noop() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(
            1,
            CommandPayload::UpdateProxyStatus {
                proxy_id: "ghost".into(),
                status: HealthState::Degraded,
                last_seen: 42,
            },
        ))
        .unwrap();
        assert!(fsm.get_proxy("ghost").is_none());
    }

    #[test]
    fn test_delete_namespace() {
        let fsm = AdminFsm::new();
        fsm.apply(&entry(1, create_namespace("orders", "alice"))).unwrap();
        fsm.apply(&entry(2, CommandPayload::DeleteNamespace { name: "orders".into() }))
            .unwrap();
        assert!(fsm.get_namespace("orders").is_none());
        // Deleting again is harmless.
        fsm.apply(&entry(3, CommandPayload::DeleteNamespace { name: "orders".into() }))
            .unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Assign(u8),
            Revoke(u8),
            ReportStopped(u8),
        }

        fn step_strategy() -> impl Strategy<Value = Step> {
            prop_oneof![
                (0u8..8).prop_map(Step::Assign),
                (0u8..8).prop_map(Step::Revoke),
                (0u8..8).prop_map(Step::ReportStopped),
            ]
        }

        proptest! {
            /// available_slots + active placements == max_processes, after
            /// any interleaving of assigns, revokes, and stop reports.
            #[test]
            fn slot_accounting_balances(steps in proptest::collection::vec(step_strategy(), 1..60)) {
                let fsm = AdminFsm::new();
                fsm.apply(&entry(1, register_launcher("L1", 4))).unwrap();

                let mut index = 2u64;
                for step in steps {
                    let payload = match step {
                        Step::Assign(n) => assign_pattern(&format!("pat-{}", n), "L1"),
                        Step::Revoke(n) => CommandPayload::RevokePattern {
                            pattern_id: format!("pat-{}", n),
                        },
                        Step::ReportStopped(n) => CommandPayload::ReportPatternStopped {
                            pattern_id: format!("pat-{}", n),
                        },
                    };
                    let _ = fsm.apply(&entry(index, payload));
                    index += 1;
                }

                fsm.with_state(|state| {
                    let launcher = &state.launchers["L1"];
                    let active = state.active_patterns_on("L1") as u32;
                    prop_assert_eq!(launcher.available_slots + active, launcher.max_processes);
                    Ok(())
                })?;
            }

            /// Identical random logs produce byte-equal snapshots.
            #[test]
            fn random_logs_are_deterministic(steps in proptest::collection::vec(step_strategy(), 1..40)) {
                let build = || {
                    let fsm = AdminFsm::new();
                    fsm.apply(&entry(1, register_launcher("L1", 3))).unwrap();
                    let mut index = 2u64;
                    for step in &steps {
                        let payload = match step {
                            Step::Assign(n) => assign_pattern(&format!("pat-{}", n), "L1"),
                            Step::Revoke(n) => CommandPayload::RevokePattern {
                                pattern_id: format!("pat-{}", n),
                            },
                            Step::ReportStopped(n) => CommandPayload::ReportPatternStopped {
                                pattern_id: format!("pat-{}", n),
                            },
                        };
                        let _ = fsm.apply(&entry(index, payload));
                        index += 1;
                    }
                    fsm.snapshot().unwrap()
                };
                prop_assert_eq!(build(), build());
            }
        }
    }
}
