//! Structured, instance-tagged log bus (C2).
//!
//! Every lifecycle, probe, and reconnect event is logged through
//! `tracing` with an `instance_id` field so operators can filter the
//! stream per-instance. We do not introduce a bespoke event bus: `tracing`
//! already gives categorised, structured, subscriber-agnostic events.

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber from the configured log level.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Log categories used across the engine, so call sites stay consistent
/// about which bucket an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Lifecycle,
    Liveness,
    Reconnect,
    Queue,
    Rehydrate,
    Shutdown,
    Gateway,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Liveness => "liveness",
            Self::Reconnect => "reconnect",
            Self::Queue => "queue",
            Self::Rehydrate => "rehydrate",
            Self::Shutdown => "shutdown",
            Self::Gateway => "gateway",
        }
    }
}
