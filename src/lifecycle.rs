//! Session Lifecycle Controller (C7) — owns the connection state machine
//! (§4.2), drives the AUTHENTICATED→CONNECTED promotion loop (§4.3), and
//! wires the liveness probes (C8), reconnector (C9), and pending queue
//! (C10) together around a single session.
//!
//! The state machine itself (`apply_event`) is a pure function over
//! `&mut SessionState` so it can be unit tested without a live adapter or
//! a tokio runtime; `LifecycleController` is the thin async shell that
//! drives it from a real adapter's event stream.

use crate::adapter::{AdapterEvent, AdapterFactory, BrowserAdapter};
use crate::config::{DisconnectReason, Policy};
use crate::queue::PendingQueue;
use crate::reconnect::{self, ReconnectDecision};
use crate::session::{SessionRegistry, SessionState, SessionStatus};
use crate::store::{AuthBlobStore, InstanceMetadataStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Side effects `apply_event` asks the controller to perform. Keeping these
/// as data rather than inline async calls is what lets the transition table
/// be tested without mocking the whole controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartPromotionLoop,
    SpawnProbes,
    CancelProbes,
    ScheduleReconnect { reason: DisconnectReason, attempts: u32 },
    Disable,
    DrainQueue,
    PersistStatus,
    None,
}

/// Applies one adapter event to `state`, returning the effects the
/// controller must carry out. This is the connection state machine from
/// §4.2.
pub fn apply_event(state: &mut SessionState, event: &AdapterEvent, policy: &Policy) -> Effect {
    match event {
        AdapterEvent::Qr(code) => {
            state.status = SessionStatus::QrRequired;
            state.qr = Some(code.clone());
            Effect::PersistStatus
        }
        AdapterEvent::Loading { percent, .. } => {
            state.status = SessionStatus::Loading(*percent);
            if state.loading_started_at.is_none() {
                state.loading_started_at = Some(chrono::Utc::now());
            }
            Effect::None
        }
        AdapterEvent::Authenticated => {
            state.status = SessionStatus::Authenticated;
            state.authenticated_at = Some(chrono::Utc::now());
            state.qr = None;
            Effect::StartPromotionLoop
        }
        AdapterEvent::Ready => {
            promote_to_connected(state);
            Effect::SpawnProbes
        }
        AdapterEvent::RemoteSessionSaved => Effect::PersistStatus,
        AdapterEvent::ContextError => {
            state.context_error_count += 1;
            if state.context_error_count >= policy.max_context_errors {
                disconnect(state, DisconnectReason::NetworkError);
                Effect::ScheduleReconnect {
                    reason: DisconnectReason::NetworkError,
                    attempts: state.reconnect_attempts,
                }
            } else {
                Effect::None
            }
        }
        AdapterEvent::AuthFailure(_) => {
            state.status = SessionStatus::AuthFailure;
            disconnect(state, DisconnectReason::Unpaired);
            Effect::Disable
        }
        AdapterEvent::ChangeState(_) => Effect::None,
        AdapterEvent::Disconnected(reason) => {
            let was_connected = state.status == SessionStatus::Connected;
            disconnect(state, *reason);
            if was_connected {
                state.reconnect_attempts = 0;
            }
            if reason.is_permanent() {
                Effect::Disable
            } else {
                Effect::ScheduleReconnect {
                    reason: *reason,
                    attempts: state.reconnect_attempts,
                }
            }
        }
    }
}

fn promote_to_connected(state: &mut SessionState) {
    state.status = SessionStatus::Connected;
    state.connected_since = Some(chrono::Utc::now());
    state.last_ping_ok = chrono::Utc::now();
    state.last_activity = chrono::Utc::now();
    state.consecutive_ping_failures = 0;
    state.context_error_count = 0;
    state.lifecycle_promotion_running = false;
}

fn disconnect(state: &mut SessionState, reason: DisconnectReason) {
    state.probes.abort_all();
    state.status = SessionStatus::Disconnected;
    state.client_handle = None;
    state.last_disconnect_reason = Some(reason);
    state.disconnected_at = Some(chrono::Utc::now());
}

/// Result of running the AUTHENTICATED→CONNECTED promotion loop in
/// isolation (§4.3): whether the adapter confirmed `Connected` within the
/// poll budget, or the session should fall back to `SyncTimeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted,
    TimedOut,
}

/// Polls `probe` up to `policy.promotion_max_polls` times, `promotion_poll`
/// apart, stopping as soon as it reports connected (§4.3).
pub async fn run_promotion_loop<F, Fut>(policy: &Policy, mut probe: F) -> PromotionOutcome
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..policy.promotion_max_polls {
        if probe().await {
            return PromotionOutcome::Promoted;
        }
        tokio::time::sleep(policy.promotion_poll()).await;
    }
    PromotionOutcome::TimedOut
}

/// Ties the registry, adapter factory, stores, and queue together for a
/// running engine instance. Each public method is the entrypoint an HTTP
/// handler or the rehydrator calls.
pub struct LifecycleController {
    pub registry: Arc<SessionRegistry>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub auth_blobs: Arc<dyn AuthBlobStore>,
    pub metadata: Arc<dyn InstanceMetadataStore>,
    pub queue: Arc<PendingQueue>,
    pub policy: Policy,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        adapters: Arc<dyn AdapterFactory>,
        auth_blobs: Arc<dyn AuthBlobStore>,
        metadata: Arc<dyn InstanceMetadataStore>,
        queue: Arc<PendingQueue>,
        policy: Policy,
    ) -> Self {
        Self { registry, adapters, auth_blobs, metadata, queue, policy }
    }

    /// Starts (or restarts) an instance from cold: creates a fresh adapter,
    /// initialises it with a timeout, and spawns the event-driven loop that
    /// carries it through the state machine (§4.2, §6.1).
    pub async fn start(self: &Arc<Self>, instance_id: &str) {
        let handle = self.registry.get_or_create(instance_id).await;
        {
            let mut state = handle.lock().await;
            state.status = SessionStatus::Initializing;
            state.loading_started_at = Some(chrono::Utc::now());
        }

        let adapter = self.adapters.create(instance_id);
        let mut events = adapter.subscribe();

        match crate::adapter::with_timeout(self.policy.init_timeout(), async {
            adapter.initialize().await
        })
        .await
        {
            Ok(()) => {
                handle.lock().await.client_handle = Some(adapter.clone());
            }
            Err(err) => {
                warn!(instance_id, error = %err, "lifecycle: adapter initialize failed");
                handle.lock().await.status = SessionStatus::InitError;
                return;
            }
        }

        let controller = self.clone();
        let instance_id = instance_id.to_string();
        let adapter_for_loop = adapter.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_event(&instance_id, &adapter_for_loop, event).await;
            }
        });
    }

    async fn handle_event(
        self: &Arc<Self>,
        instance_id: &str,
        adapter: &Arc<dyn BrowserAdapter>,
        event: AdapterEvent,
    ) {
        let Some(handle) = self.registry.get(instance_id).await else { return };
        let effect = {
            let mut state = handle.lock().await;
            apply_event(&mut state, &event, &self.policy)
        };

        match effect {
            Effect::StartPromotionLoop => {
                self.spawn_promotion_loop(instance_id, adapter.clone(), handle.clone()).await
            }
            Effect::SpawnProbes => {
                self.spawn_probes(instance_id, adapter.clone(), handle.clone()).await;
                self.schedule_drain(instance_id, adapter.clone(), handle.clone());
                let _ = self.metadata.set_connected(instance_id, adapter.info().as_deref()).await;
                let _ = self.metadata.reset_reconnect_attempts(instance_id).await;
            }
            Effect::ScheduleReconnect { reason, attempts, .. } => {
                self.schedule_reconnect(instance_id, reason, attempts);
                let _ = self.metadata.set_status(instance_id, "DISCONNECTED", Some(reason)).await;
            }
            Effect::Disable => {
                let _ = self.metadata.set_enabled(instance_id, false).await;
            }
            Effect::PersistStatus | Effect::CancelProbes | Effect::DrainQueue | Effect::None => {}
        }
    }

    async fn spawn_promotion_loop(
        self: &Arc<Self>,
        instance_id: &str,
        adapter: Arc<dyn BrowserAdapter>,
        handle: Arc<Mutex<SessionState>>,
    ) {
        let policy = self.policy.clone();
        let controller = self.clone();
        let instance_id = instance_id.to_string();
        let handle_for_task = handle.clone();

        let task = tokio::spawn(async move {
            let handle = handle_for_task;
            {
                let mut state = handle.lock().await;
                if state.lifecycle_promotion_running {
                    return;
                }
                state.lifecycle_promotion_running = true;
            }

            let outcome = run_promotion_loop(&policy, || {
                let adapter = adapter.clone();
                async move {
                    matches!(
                        adapter.get_state().await,
                        Ok(crate::adapter::AdapterState::Connected)
                    )
                }
            })
            .await;

            let mut state = handle.lock().await;
            state.lifecycle_promotion_running = false;
            match outcome {
                PromotionOutcome::Promoted => {
                    promote_to_connected(&mut state);
                    drop(state);
                    controller.spawn_probes(&instance_id, adapter.clone(), handle.clone()).await;
                    controller.schedule_drain(&instance_id, adapter, handle);
                    let _ = controller.metadata.set_connected(&instance_id, None).await;
                }
                PromotionOutcome::TimedOut => {
                    state.status = SessionStatus::SyncTimeout;
                    drop(state);
                    controller.schedule_reconnect(&instance_id, DisconnectReason::Timeout, 0);
                }
            }
        });

        handle.lock().await.probes.lifecycle_promotion = Some(task);
    }

    async fn spawn_probes(
        self: &Arc<Self>,
        instance_id: &str,
        adapter: Arc<dyn BrowserAdapter>,
        handle: Arc<Mutex<SessionState>>,
    ) {
        let policy = self.policy.clone();

        let heartbeat_handle = {
            let adapter = adapter.clone();
            let handle = handle.clone();
            let policy = policy.clone();
            let instance_id = instance_id.to_string();
            let controller = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(policy.heartbeat_interval()).await;
                    let outcome = crate::liveness::heartbeat(&adapter, &policy).await;
                    let mut state = handle.lock().await;
                    match outcome {
                        crate::liveness::HeartbeatOutcome::Ok => {
                            state.consecutive_ping_failures = 0;
                            state.last_ping_ok = chrono::Utc::now();
                        }
                        crate::liveness::HeartbeatOutcome::Failed => {
                            state.consecutive_ping_failures += 1;
                            if crate::liveness::heartbeat_exhausted(&policy, state.consecutive_ping_failures) {
                                disconnect(&mut state, DisconnectReason::NetworkError);
                                drop(state);
                                controller.schedule_reconnect(&instance_id, DisconnectReason::NetworkError, 0);
                                break;
                            }
                        }
                    }
                }
            })
        };

        let deep_check_handle = {
            let adapter = adapter.clone();
            let handle = handle.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(policy.deep_check_interval()).await;
                    if crate::liveness::deep_check(&adapter, &policy).await
                        == crate::liveness::HeartbeatOutcome::Ok
                    {
                        handle.lock().await.last_deep_check_ok = Some(chrono::Utc::now());
                    }
                }
            })
        };

        let watchdog_handle = {
            let handle = handle.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(policy.watchdog_interval()).await;
                    let last_ping_ok = handle.lock().await.last_ping_ok;
                    if crate::liveness::watchdog_stale(&policy, last_ping_ok, chrono::Utc::now()) {
                        warn!("liveness: watchdog detected stale ping");
                    }
                }
            })
        };

        let mut state = handle.lock().await;
        state.probes.heartbeat = Some(heartbeat_handle);
        state.probes.deep_check = Some(deep_check_handle);
        state.probes.watchdog = Some(watchdog_handle);
    }

    /// Waits `drain_stabilisation` after promotion, then drains the pending
    /// queue, stopping early if the session has since left `CONNECTED`
    /// (§4.7).
    fn schedule_drain(
        self: &Arc<Self>,
        instance_id: &str,
        adapter: Arc<dyn BrowserAdapter>,
        handle: Arc<Mutex<SessionState>>,
    ) {
        let queue = self.queue.clone();
        let policy = self.policy.clone();
        let instance_id = instance_id.to_string();
        let stabilisation = policy.drain_stabilisation();

        tokio::spawn(async move {
            tokio::time::sleep(stabilisation).await;

            let still_connected = {
                let handle = handle.clone();
                move || {
                    handle
                        .try_lock()
                        .map(|s| s.status == SessionStatus::Connected)
                        .unwrap_or(true)
                }
            };

            let report = queue.drain(&instance_id, &adapter, &policy, still_connected).await;
            info!(
                instance_id = %instance_id,
                sent = report.sent.len(),
                expired = report.expired.len(),
                dropped = report.dropped.len(),
                "queue: drain pass complete"
            );
        });
    }

    /// Global recovery sweep (§4.4 "Recovery sweep", §4.5): every
    /// `recovery_check_interval`, reconnects zombie/stuck sessions and
    /// restarts any `enabled = true` instance that has no in-memory
    /// session at all (e.g. a rehydrate attempt that never got a session
    /// created, or one removed by a prior reconnect teardown that never
    /// rescheduled).
    pub async fn run_recovery_sweep(self: &Arc<Self>) {
        loop {
            tokio::time::sleep(self.policy.recovery_check_interval()).await;
            self.recovery_pass().await;
        }
    }

    /// `pub(crate)` (rather than private) so integration tests can drive a
    /// single pass deterministically instead of racing `run_recovery_sweep`'s
    /// timer loop.
    pub(crate) async fn recovery_pass(self: &Arc<Self>) {
        let now = chrono::Utc::now();
        for id in self.registry.enumerate().await {
            let Some(handle) = self.registry.get(&id).await else { continue };
            let reason = {
                let state = handle.lock().await;
                if state.reconnecting || state.shutting_down {
                    None
                } else if state.status == SessionStatus::Connected
                    && crate::liveness::is_zombie(&self.policy, state.last_ping_ok, now)
                {
                    Some(DisconnectReason::NetworkError)
                } else if matches!(state.status, SessionStatus::Initializing | SessionStatus::Loading(_))
                    && state
                        .loading_started_at
                        .map(|t| crate::liveness::is_stuck(&self.policy, t, now))
                        .unwrap_or(false)
                {
                    Some(DisconnectReason::Timeout)
                } else {
                    None
                }
            };

            if let Some(reason) = reason {
                warn!(instance_id = %id, %reason, "recovery sweep: reconnecting unhealthy session");
                let attempts = {
                    let mut state = handle.lock().await;
                    disconnect(&mut state, reason);
                    state.reconnect_attempts
                };
                self.schedule_reconnect(&id, reason, attempts);
            }
        }

        if let Ok(rows) = self.metadata.list_enabled().await {
            for row in rows {
                if self.registry.get(&row.id).await.is_none() {
                    info!(instance_id = %row.id, "recovery sweep: restarting enabled instance with no session");
                    self.start(&row.id).await;
                }
            }
        }
    }

    /// Memory monitor (§4.5): samples process memory every
    /// `memory_check_interval`; when the trend is non-decreasing over five
    /// samples, reconnects the oldest `CONNECTED` session to shed state.
    pub async fn run_memory_monitor(self: &Arc<Self>) {
        let mut monitor = crate::liveness::MemoryMonitor::new();
        loop {
            tokio::time::sleep(self.policy.memory_check_interval()).await;
            let Some(sample) = crate::liveness::sample_process_memory() else { continue };
            monitor.record(sample);
            if !monitor.is_leak_suspected() {
                continue;
            }
            warn!(rss_bytes = sample, "liveness: suspected memory leak, shedding oldest session");

            let mut oldest: Option<(String, chrono::DateTime<chrono::Utc>)> = None;
            for id in self.registry.enumerate().await {
                let Some(handle) = self.registry.get(&id).await else { continue };
                let state = handle.lock().await;
                if state.status != SessionStatus::Connected {
                    continue;
                }
                if oldest.as_ref().map(|(_, t)| state.created_at < *t).unwrap_or(true) {
                    oldest = Some((id.clone(), state.created_at));
                }
            }

            if let Some((id, _)) = oldest {
                let Some(handle) = self.registry.get(&id).await else { continue };
                let attempts = {
                    let mut state = handle.lock().await;
                    disconnect(&mut state, DisconnectReason::NetworkError);
                    state.reconnect_attempts
                };
                self.schedule_reconnect(&id, DisconnectReason::NetworkError, attempts);
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, instance_id: &str, reason: DisconnectReason, attempts: u32) {
        let decision = reconnect::decide(&self.policy, reason, attempts);
        let controller = self.clone();
        let instance_id = instance_id.to_string();

        match decision {
            ReconnectDecision::GiveUp => {
                info!(instance_id = %instance_id, %reason, "reconnector: giving up, disabling instance");
                tokio::spawn(async move {
                    let _ = controller.metadata.set_enabled(&instance_id, false).await;
                });
            }
            ReconnectDecision::Retry { delay, attempts } => {
                info!(instance_id = %instance_id, %reason, ?delay, attempts, "reconnector: scheduling retry");
                tokio::spawn(async move {
                    if let Some(handle) = controller.registry.get(&instance_id).await {
                        handle.lock().await.reconnect_attempts = attempts;
                    }
                    let _ = controller.metadata.increment_reconnect_attempts(&instance_id).await;
                    tokio::time::sleep(delay).await;
                    controller.start(&instance_id).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterState;

    fn state() -> SessionState {
        SessionState::new("A")
    }

    #[test]
    fn qr_event_sets_qr_required() {
        let mut s = state();
        let policy = Policy::default();
        apply_event(&mut s, &AdapterEvent::Qr("abc".into()), &policy);
        assert_eq!(s.status, SessionStatus::QrRequired);
        assert_eq!(s.qr.as_deref(), Some("abc"));
    }

    #[test]
    fn authenticated_event_starts_promotion_loop() {
        let mut s = state();
        let policy = Policy::default();
        let effect = apply_event(&mut s, &AdapterEvent::Authenticated, &policy);
        assert_eq!(s.status, SessionStatus::Authenticated);
        assert_eq!(effect, Effect::StartPromotionLoop);
    }

    #[test]
    fn ready_event_promotes_to_connected() {
        let mut s = state();
        let policy = Policy::default();
        let effect = apply_event(&mut s, &AdapterEvent::Ready, &policy);
        assert_eq!(s.status, SessionStatus::Connected);
        assert_eq!(effect, Effect::SpawnProbes);
    }

    #[test]
    fn permanent_disconnect_disables_instance() {
        let mut s = state();
        s.status = SessionStatus::Connected;
        let policy = Policy::default();
        let effect = apply_event(&mut s, &AdapterEvent::Disconnected(DisconnectReason::Banned), &policy);
        assert_eq!(s.status, SessionStatus::Disconnected);
        assert_eq!(effect, Effect::Disable);
    }

    #[test]
    fn transient_disconnect_schedules_reconnect_and_resets_attempts() {
        let mut s = state();
        s.status = SessionStatus::Connected;
        s.reconnect_attempts = 5;
        let policy = Policy::default();
        let effect = apply_event(&mut s, &AdapterEvent::Disconnected(DisconnectReason::Timeout), &policy);
        assert_eq!(s.reconnect_attempts, 0);
        assert!(matches!(effect, Effect::ScheduleReconnect { reason: DisconnectReason::Timeout, .. }));
    }

    #[test]
    fn excess_context_errors_force_disconnect() {
        let mut s = state();
        let policy = Policy::default();
        for _ in 0..policy.max_context_errors - 1 {
            apply_event(&mut s, &AdapterEvent::ContextError, &policy);
        }
        assert_eq!(s.status, SessionStatus::Initializing);
        let effect = apply_event(&mut s, &AdapterEvent::ContextError, &policy);
        assert_eq!(s.status, SessionStatus::Disconnected);
        assert!(matches!(effect, Effect::ScheduleReconnect { .. }));
    }

    #[tokio::test]
    async fn promotion_loop_stops_as_soon_as_connected() {
        let policy = Policy::default();
        let mut calls = 0;
        let outcome = run_promotion_loop(&policy, || {
            calls += 1;
            async move { calls >= 2 }
        })
        .await;
        assert_eq!(outcome, PromotionOutcome::Promoted);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn promotion_loop_times_out_after_max_polls() {
        let mut policy = Policy::default();
        policy.promotion_max_polls = 2;
        policy.promotion_poll_secs = 0;
        let outcome = run_promotion_loop(&policy, || async { false }).await;
        assert_eq!(outcome, PromotionOutcome::TimedOut);
    }

    #[test]
    fn adapter_state_connected_matches_promotion_probe() {
        assert_eq!(AdapterState::Connected, AdapterState::Connected);
    }
}
