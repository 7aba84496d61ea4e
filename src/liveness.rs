//! Liveness Supervisor (C8) — the four probes that run only while a session
//! is `CONNECTED`, plus the classification helpers they share (§4.4, §4.5).
//!
//! The probes themselves are spawned as cancellable tasks owned by
//! `ProbeHandles` on the `SessionState`; this module holds the pure
//! decision logic so it can be unit tested without a live adapter.

use crate::adapter::{AdapterState, BrowserAdapter};
use crate::config::Policy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of a single heartbeat probe (§4.4.1): a lightweight `get_state`
/// call racing a short timeout, run every `heartbeat_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ok,
    Failed,
}

pub async fn heartbeat(adapter: &Arc<dyn BrowserAdapter>, policy: &Policy) -> HeartbeatOutcome {
    match crate::adapter::with_timeout(policy.state_check_timeout(), async {
        adapter.get_state().await
    })
    .await
    {
        Ok(AdapterState::Connected) => HeartbeatOutcome::Ok,
        _ => HeartbeatOutcome::Failed,
    }
}

/// Whether `consecutive_ping_failures` has crossed the threshold that forces
/// a reconnect regardless of what the adapter otherwise reports (§4.4.1).
pub fn heartbeat_exhausted(policy: &Policy, consecutive_failures: u32) -> bool {
    consecutive_failures >= policy.max_consecutive_failures
}

/// Deep probe (§4.4.2): a heavier check run on a longer cadence
/// (`deep_check_interval`), also racing a timeout.
pub async fn deep_check(adapter: &Arc<dyn BrowserAdapter>, policy: &Policy) -> HeartbeatOutcome {
    match crate::adapter::with_timeout(policy.deep_check_timeout(), async {
        adapter.get_state().await
    })
    .await
    {
        Ok(AdapterState::Connected) => HeartbeatOutcome::Ok,
        _ => HeartbeatOutcome::Failed,
    }
}

/// Watchdog (§4.4.3): fires every `watchdog_interval`, comparing wall-clock
/// time since the last successful ping against `ping_timeout_threshold`.
pub fn watchdog_stale(policy: &Policy, last_ping_ok: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(last_ping_ok);
    elapsed
        > chrono::Duration::from_std(policy.ping_timeout_threshold()).unwrap_or(chrono::Duration::zero())
}

/// Recovery sweep zombie test (§4.5): `CONNECTED` and silent past
/// `zombie_threshold`.
pub fn is_zombie(policy: &Policy, last_ping_ok: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(last_ping_ok);
    elapsed > chrono::Duration::from_std(policy.zombie_threshold()).unwrap_or(chrono::Duration::zero())
}

/// Recovery sweep stuck test (§4.5): still `INITIALIZING`/`LOADING` past
/// `loading_timeout`.
pub fn is_stuck(policy: &Policy, loading_started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(loading_started_at);
    elapsed > chrono::Duration::from_std(policy.loading_timeout()).unwrap_or(chrono::Duration::zero())
}

/// Classification produced by the recovery sweep (§4.4.4, §4.5): a session
/// with no client handle for longer than `zombie_threshold`, or one with no
/// observed activity for longer than `inactivity_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryVerdict {
    Healthy,
    Zombie,
    Inactive,
}

pub fn classify_for_recovery(
    policy: &Policy,
    has_client_handle: bool,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RecoveryVerdict {
    let since_created = now.signed_duration_since(created_at);
    let zombie_threshold =
        chrono::Duration::from_std(policy.zombie_threshold()).unwrap_or(chrono::Duration::zero());
    if !has_client_handle && since_created > zombie_threshold {
        return RecoveryVerdict::Zombie;
    }

    let since_activity = now.signed_duration_since(last_activity);
    let inactivity_threshold =
        chrono::Duration::from_std(policy.inactivity_threshold()).unwrap_or(chrono::Duration::zero());
    if since_activity > inactivity_threshold {
        return RecoveryVerdict::Inactive;
    }

    RecoveryVerdict::Healthy
}

/// Memory monitor (§4.5): samples process memory on `memory_check_interval`,
/// keeps a short history, and flags a suspected leak when the trend is
/// non-decreasing over the last five samples.
pub struct MemoryMonitor {
    history: std::collections::VecDeque<u64>,
}

impl MemoryMonitor {
    const HISTORY_LEN: usize = 5;

    pub fn new() -> Self {
        Self { history: std::collections::VecDeque::with_capacity(Self::HISTORY_LEN) }
    }

    pub fn record(&mut self, sample_bytes: u64) {
        if self.history.len() == Self::HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample_bytes);
    }

    /// True once the history is full and every consecutive pair is
    /// non-decreasing — heap never shrank across the whole window.
    pub fn is_leak_suspected(&self) -> bool {
        if self.history.len() < Self::HISTORY_LEN {
            return false;
        }
        self.history.iter().zip(self.history.iter().skip(1)).all(|(a, b)| b >= a)
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples this process's resident memory in bytes (sysinfo reports KiB; we
/// normalise to bytes). Returns `None` if the platform doesn't expose it —
/// the monitor simply skips that tick.
pub fn sample_process_memory() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = sysinfo::System::new_all();
    system.refresh_all();
    system.process(pid).map(|p| p.memory() * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;

    #[tokio::test]
    async fn heartbeat_ok_when_adapter_reports_connected() {
        let (adapter, _tx) = MockAdapter::new();
        adapter.set_state(AdapterState::Connected).await;
        let adapter: Arc<dyn BrowserAdapter> = adapter;
        assert_eq!(heartbeat(&adapter, &Policy::default()).await, HeartbeatOutcome::Ok);
    }

    #[tokio::test]
    async fn heartbeat_fails_when_adapter_reports_other_state() {
        let (adapter, _tx) = MockAdapter::new();
        adapter.set_state(AdapterState::Conflict).await;
        let adapter: Arc<dyn BrowserAdapter> = adapter;
        assert_eq!(
            heartbeat(&adapter, &Policy::default()).await,
            HeartbeatOutcome::Failed
        );
    }

    #[test]
    fn heartbeat_exhausted_at_threshold() {
        let policy = Policy::default();
        assert!(!heartbeat_exhausted(&policy, policy.max_consecutive_failures - 1));
        assert!(heartbeat_exhausted(&policy, policy.max_consecutive_failures));
    }

    #[test]
    fn watchdog_flags_stale_ping() {
        let policy = Policy::default();
        let now = Utc::now();
        let last_ok = now - chrono::Duration::seconds(policy.ping_timeout_threshold_secs as i64 + 1);
        assert!(watchdog_stale(&policy, last_ok, now));
        assert!(!watchdog_stale(&policy, now, now));
    }

    #[test]
    fn recovery_classifies_zombie_without_handle() {
        let policy = Policy::default();
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(policy.zombie_threshold_secs as i64 + 1);
        let verdict = classify_for_recovery(&policy, false, created, now, now);
        assert_eq!(verdict, RecoveryVerdict::Zombie);
    }

    #[test]
    fn recovery_classifies_inactive_session() {
        let policy = Policy::default();
        let now = Utc::now();
        let last_activity = now - chrono::Duration::seconds(policy.inactivity_threshold_secs as i64 + 1);
        let verdict = classify_for_recovery(&policy, true, now, last_activity, now);
        assert_eq!(verdict, RecoveryVerdict::Inactive);
    }

    #[test]
    fn recovery_classifies_healthy_session() {
        let policy = Policy::default();
        let now = Utc::now();
        let verdict = classify_for_recovery(&policy, true, now, now, now);
        assert_eq!(verdict, RecoveryVerdict::Healthy);
    }

    #[test]
    fn is_zombie_flags_stale_connected_session() {
        let policy = Policy::default();
        let now = Utc::now();
        let last_ping_ok = now - chrono::Duration::seconds(policy.zombie_threshold_secs as i64 + 1);
        assert!(is_zombie(&policy, last_ping_ok, now));
        assert!(!is_zombie(&policy, now, now));
    }

    #[test]
    fn is_stuck_flags_loading_past_timeout() {
        let policy = Policy::default();
        let now = Utc::now();
        let started = now - chrono::Duration::seconds(policy.loading_timeout_secs as i64 + 1);
        assert!(is_stuck(&policy, started, now));
        assert!(!is_stuck(&policy, now, now));
    }

    #[test]
    fn memory_monitor_needs_full_history_before_flagging() {
        let mut monitor = MemoryMonitor::new();
        for sample in [100, 110, 120] {
            monitor.record(sample);
        }
        assert!(!monitor.is_leak_suspected());
    }

    #[test]
    fn memory_monitor_flags_non_decreasing_trend() {
        let mut monitor = MemoryMonitor::new();
        for sample in [100, 110, 120, 130, 140] {
            monitor.record(sample);
        }
        assert!(monitor.is_leak_suspected());
    }

    #[test]
    fn memory_monitor_clears_on_any_decrease() {
        let mut monitor = MemoryMonitor::new();
        for sample in [100, 110, 90, 130, 140] {
            monitor.record(sample);
        }
        assert!(!monitor.is_leak_suspected());
    }
}
