//! `SessionState` — one per instance (§3). Lives entirely inside the
//! `SessionRegistry`; nothing outside this crate mutates it directly.

use crate::adapter::BrowserAdapter;
use crate::config::DisconnectReason;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The state set from §4.2. `Loading` carries a percentage because the
/// adapter reports loading progress incrementally.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum SessionStatus {
    Initializing,
    Loading(u8),
    QrRequired,
    Authenticated,
    Connected,
    SyncTimeout,
    Disconnected,
    AuthFailure,
    InitError,
    Reconnecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Loading(_) => "LOADING",
            Self::QrRequired => "QR_REQUIRED",
            Self::Authenticated => "AUTHENTICATED",
            Self::Connected => "CONNECTED",
            Self::SyncTimeout => "SYNC_TIMEOUT",
            Self::Disconnected => "DISCONNECTED",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::InitError => "INIT_ERROR",
            Self::Reconnecting => "RECONNECTING",
        }
    }

    pub fn is_terminalish(&self) -> bool {
        matches!(self, Self::Disconnected | Self::InitError | Self::AuthFailure)
    }
}

/// Cancellable timer handles owned by the session; leaving `CONNECTED`
/// cancels them collectively by dropping/aborting this struct (§4.4, §9).
#[derive(Default)]
pub struct ProbeHandles {
    pub heartbeat: Option<JoinHandle<()>>,
    pub deep_check: Option<JoinHandle<()>>,
    pub watchdog: Option<JoinHandle<()>>,
    pub lifecycle_promotion: Option<JoinHandle<()>>,
}

impl ProbeHandles {
    pub fn abort_all(&mut self) {
        for handle in [
            self.heartbeat.take(),
            self.deep_check.take(),
            self.watchdog.take(),
            self.lifecycle_promotion.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

impl Drop for ProbeHandles {
    fn drop(&mut self) {
        self.abort_all();
    }
}

pub struct SessionState {
    pub instance_id: String,
    pub status: SessionStatus,
    pub client_handle: Option<Arc<dyn BrowserAdapter>>,
    pub qr: Option<String>,

    pub created_at: DateTime<Utc>,
    pub loading_started_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub last_ping_ok: DateTime<Utc>,
    pub last_deep_check_ok: Option<DateTime<Utc>>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,

    pub reconnect_attempts: u32,
    pub consecutive_ping_failures: u32,
    pub context_error_count: u32,
    pub ws_check_failures: u32,

    pub reconnecting: bool,
    pub shutting_down: bool,
    pub needs_reconnect: bool,
    pub lifecycle_promotion_running: bool,

    pub probes: ProbeHandles,
    pub last_disconnect_reason: Option<DisconnectReason>,

    /// When the current `CONNECTED` episode began; used for the
    /// reconnect-counter reset rule (§4.6 success criterion).
    pub connected_since: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            status: SessionStatus::Initializing,
            client_handle: None,
            qr: None,
            created_at: now,
            loading_started_at: Some(now),
            last_activity: now,
            last_ping_ok: now,
            last_deep_check_ok: None,
            authenticated_at: None,
            disconnected_at: None,
            reconnect_attempts: 0,
            consecutive_ping_failures: 0,
            context_error_count: 0,
            ws_check_failures: 0,
            reconnecting: false,
            shutting_down: false,
            needs_reconnect: false,
            lifecycle_promotion_running: false,
            probes: ProbeHandles::default(),
            last_disconnect_reason: None,
            connected_since: None,
        }
    }

    /// Invariant: `client_handle` is non-empty iff status is neither
    /// `Disconnected` nor `InitError` (§3).
    pub fn check_client_handle_invariant(&self) -> bool {
        let should_have_handle = !matches!(
            self.status,
            SessionStatus::Disconnected | SessionStatus::InitError
        );
        self.client_handle.is_some() == should_have_handle
    }
}

/// A cheap, read-only view for the health endpoint and tests — never the
/// mutation path (§4.1 "a reader may take a shallow copy").
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub instance_id: String,
    pub status: String,
    pub has_qr: bool,
    pub reconnect_attempts: u32,
    pub last_disconnect_reason: Option<String>,
}

impl From<&SessionState> for SessionSnapshot {
    fn from(s: &SessionState) -> Self {
        Self {
            instance_id: s.instance_id.clone(),
            status: s.status.as_str().to_string(),
            has_qr: s.qr.is_some(),
            reconnect_attempts: s.reconnect_attempts,
            last_disconnect_reason: s.last_disconnect_reason.map(|r| r.to_string()),
        }
    }
}
