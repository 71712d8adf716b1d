//! Runtime patterns shared by pattern cores.
//!
//! - **Graceful shutdown**: RAII operation guards with drain accounting
//! - **Health aggregation**: pattern health rolled up from slot drivers
//!
//! Drain refuses new operations, waits for in-flight ones up to a timeout,
//! and reports `{drained, aborted}` counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use prism_traits::driver::HealthState;

use crate::slots::SlotMap;

// =============================================================================
// DRAIN SUMMARY
// =============================================================================

/// Outcome of a drain request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    /// Operations that completed during the drain window.
    pub drained: u64,
    /// Operations still in flight when the window expired.
    pub aborted: u64,
}

// =============================================================================
// GRACEFUL SHUTDOWN
// =============================================================================

/// Tracks in-flight operations and coordinates drain.
///
/// Operations hold an [`OperationGuard`] for their lifetime; once shutdown
/// begins, new guards are refused.
pub struct GracefulShutdown {
    shutting_down: AtomicBool,
    active: AtomicU64,
    completed: AtomicU64,
    notify: Notify,
}

impl GracefulShutdown {
    /// Create a tracker accepting operations.
    pub fn new() -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            active: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Register an operation. Returns `None` once shutdown has begun.
    pub fn register_operation(self: &Arc<Self>) -> Option<OperationGuard> {
        if self.shutting_down.load(Ordering::Acquire) {
            return None;
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        // Shutdown may have raced in; back out if so.
        if self.shutting_down.load(Ordering::Acquire) {
            self.active.fetch_sub(1, Ordering::AcqRel);
            self.notify.notify_waiters();
            return None;
        }
        Some(OperationGuard {
            tracker: self.clone(),
        })
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Number of operations currently in flight.
    pub fn active_operations(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Begin refusing new operations and wait for in-flight ones.
    ///
    /// Returns once all operations complete or `timeout` elapses, whichever
    /// comes first.
    pub async fn drain(&self, timeout: Duration) -> DrainSummary {
        self.shutting_down.store(true, Ordering::Release);
        let completed_before = self.completed.load(Ordering::Acquire);
        let deadline = Instant::now() + timeout;

        loop {
            if self.active.load(Ordering::Acquire) == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }

        DrainSummary {
            drained: self.completed.load(Ordering::Acquire) - completed_before,
            aborted: self.active.load(Ordering::Acquire),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight operation.
pub struct OperationGuard {
    tracker: Arc<GracefulShutdown>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::AcqRel);
        self.tracker.completed.fetch_add(1, Ordering::AcqRel);
        self.tracker.notify.notify_waiters();
    }
}

// =============================================================================
// PATTERN HEALTH
// =============================================================================

/// Aggregated pattern health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternHealth {
    /// Worst state across all bound slots.
    pub state: HealthState,
    /// Optional message describing the degradation.
    pub message: Option<String>,
    /// Per-slot diagnostic details.
    pub details: BTreeMap<String, String>,
}

impl PatternHealth {
    /// A healthy report.
    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            message: None,
            details: BTreeMap::new(),
        }
    }

    /// An unhealthy report with a reason.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unhealthy,
            message: Some(message.into()),
            details: BTreeMap::new(),
        }
    }

    /// Roll up driver health across all bound slots.
    ///
    /// Any unhealthy slot makes the pattern unhealthy; any degraded slot
    /// makes it degraded.
    pub async fn from_slots(slots: &SlotMap) -> Self {
        let mut state = HealthState::Healthy;
        let mut message = None;
        let mut details = BTreeMap::new();

        for name in slots.names() {
            if let Some(handle) = slots.get(name) {
                let health = handle.lifecycle.health().await;
                if health.state != HealthState::Healthy && message.is_none() {
                    message = health
                        .message
                        .clone()
                        .map(|m| format!("slot '{}': {}", name, m));
                }
                state = state.worst(health.state);
                details.insert(
                    format!("slot.{}", name),
                    format!("{}:{:?}", handle.name, health.state),
                );
            }
        }

        Self {
            state,
            message,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_with_no_operations() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let summary = shutdown.drain(Duration::from_millis(100)).await;
        assert_eq!(summary, DrainSummary::default());
        assert!(shutdown.is_shutting_down());
        assert!(shutdown.register_operation().is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_inflight() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let guard = shutdown.register_operation().unwrap();
        assert_eq!(shutdown.active_operations(), 1);

        let tracker = shutdown.clone();
        let drainer = tokio::spawn(async move { tracker.drain(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let summary = drainer.await.unwrap();
        assert_eq!(summary.drained, 1);
        assert_eq!(summary.aborted, 0);
    }

    #[tokio::test]
    async fn test_drain_reports_aborted() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let _guard = shutdown.register_operation().unwrap();

        let summary = shutdown.drain(Duration::from_millis(50)).await;
        assert_eq!(summary.drained, 0);
        assert_eq!(summary.aborted, 1);
    }
}
