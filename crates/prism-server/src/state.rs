//! Shared server state and the command log feeding the FSM.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{info, warn};

use prism_admin::{AdminFsm, Command, CommandPayload, FsmError, LogEntry};
use prism_traits::driver::HealthState;

use crate::bridge::BridgeSessions;
use crate::config::ServerConfig;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// COMMAND LOG
// =============================================================================

/// Single-node command log.
///
/// Assigns monotonically increasing indexes and applies entries to the FSM
/// directly. A replicated deployment swaps this for a consensus log; the
/// FSM contract (`apply` in log order, one at a time) is the same.
pub struct CommandLog {
    fsm: Arc<AdminFsm>,
    next_index: AtomicU64,
    term: u64,
}

impl CommandLog {
    /// Create a log over the given FSM, resuming after its applied index.
    pub fn new(fsm: Arc<AdminFsm>) -> Self {
        let (applied, term) = fsm.last_applied();
        Self {
            fsm,
            next_index: AtomicU64::new(applied + 1),
            term: term.max(1),
        }
    }

    /// Append a command and apply it.
    pub fn propose(&self, payload: CommandPayload, issuer: &str) -> Result<(), FsmError> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let entry = LogEntry::new(index, self.term, Command::new(unix_now(), issuer, payload));
        self.fsm.apply(&entry)
    }

    /// The FSM this log feeds.
    pub fn fsm(&self) -> &Arc<AdminFsm> {
        &self.fsm
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared state behind every handler.
pub struct AppState {
    /// The admin FSM.
    pub fsm: Arc<AdminFsm>,
    /// Command log feeding the FSM.
    pub log: CommandLog,
    /// Connected pattern bridge sessions.
    pub sessions: BridgeSessions,
    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Build state over a fresh FSM.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_fsm(config, Arc::new(AdminFsm::new()))
    }

    /// Build state over an existing (possibly restored) FSM.
    pub fn with_fsm(config: ServerConfig, fsm: Arc<AdminFsm>) -> Arc<Self> {
        Arc::new(Self {
            log: CommandLog::new(fsm.clone()),
            fsm,
            sessions: BridgeSessions::new(),
            config,
        })
    }
}

// =============================================================================
// HEARTBEAT SWEEP
// =============================================================================

/// Background sweep marking silent proxies/launchers unhealthy and evicting
/// long-silent proxies.
///
/// Returns a sender; send `true` (or drop it) to stop the task.
pub fn spawn_heartbeat_sweep(state: Arc<AppState>) -> watch::Sender<bool> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let interval = Duration::from_secs(state.config.sweep_interval_seconds.max(1));
    let unhealthy_after = state.config.heartbeat_timeout_seconds as i64;
    let evict_after = state.config.eviction_timeout_seconds as i64;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => sweep_once(&state, unhealthy_after, evict_after),
            }
        }
    });

    stop_tx
}

fn sweep_once(state: &AppState, unhealthy_after: i64, evict_after: i64) {
    let now = unix_now();

    let (stale_proxies, dead_proxies, stale_launchers) = state.fsm.with_state(|s| {
        let stale_proxies: Vec<String> = s
            .proxies
            .values()
            .filter(|p| p.status != HealthState::Unhealthy && now - p.last_seen > unhealthy_after)
            .map(|p| p.proxy_id.clone())
            .collect();
        let dead_proxies: Vec<String> = s
            .proxies
            .values()
            .filter(|p| now - p.last_seen > evict_after)
            .map(|p| p.proxy_id.clone())
            .collect();
        let stale_launchers: Vec<String> = s
            .launchers
            .values()
            .filter(|l| l.status != HealthState::Unhealthy && now - l.last_seen > unhealthy_after)
            .map(|l| l.launcher_id.clone())
            .collect();
        (stale_proxies, dead_proxies, stale_launchers)
    });

    for proxy_id in stale_proxies {
        if dead_proxies.contains(&proxy_id) {
            continue;
        }
        info!(proxy_id = %proxy_id, "Marking silent proxy unhealthy");
        if let Err(e) = state.log.propose(
            CommandPayload::UpdateProxyStatus {
                proxy_id: proxy_id.clone(),
                status: HealthState::Unhealthy,
                last_seen: now,
            },
            "heartbeat-sweep",
        ) {
            warn!(proxy_id = %proxy_id, error = %e, "Status update failed");
        }
    }

    for proxy_id in dead_proxies {
        info!(proxy_id = %proxy_id, "Evicting proxy after missed heartbeats");
        if let Err(e) = state.log.propose(
            CommandPayload::EvictProxy {
                proxy_id: proxy_id.clone(),
            },
            "heartbeat-sweep",
        ) {
            warn!(proxy_id = %proxy_id, error = %e, "Eviction failed");
        }
    }

    for launcher_id in stale_launchers {
        info!(launcher_id = %launcher_id, "Marking silent launcher unhealthy");
        if let Err(e) = state.log.propose(
            CommandPayload::UpdateLauncherStatus {
                launcher_id: launcher_id.clone(),
                status: HealthState::Unhealthy,
                last_seen: now,
                available_slots: None,
            },
            "heartbeat-sweep",
        ) {
            warn!(launcher_id = %launcher_id, error = %e, "Status update failed");
        }
    }
}
