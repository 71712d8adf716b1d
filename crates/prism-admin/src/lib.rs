//! Admin cluster state machine for the Prism data gateway.
//!
//! The admin service owns the authoritative registry of namespaces, proxies,
//! launchers, and pattern placements. All mutations flow through a
//! deterministic, log-driven FSM ([`fsm::AdminFsm`]): a consensus layer
//! replicates [`command::LogEntry`] values and calls `apply`; reads go
//! through a shared lock; snapshots capture the complete state for restart
//! and catch-up.
//!
//! Determinism rules:
//! - state maps are `BTreeMap`s, so serialized snapshots are byte-stable
//! - `apply` never reads clocks or randomness; time comes from the command
//!   envelope's timestamp
//! - partition ranges are rebuilt by a pure function of registration order
//!
//! Partition addressing ([`partition`]) hashes namespace names with CRC-32
//! (IEEE) mod 256. The mapping is part of the external contract.

#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod fsm;
pub mod partition;
pub mod state;

pub use command::{Command, CommandPayload, LogEntry};
pub use error::FsmError;
pub use fsm::AdminFsm;
pub use partition::{allocate_ranges, partition_for, PartitionRange, PARTITION_COUNT};
pub use state::{
    ClusterState, LauncherEntry, NamespaceEntry, PatternPlacement, PlacementStatus, ProxyEntry,
};
