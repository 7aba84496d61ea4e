use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the session engine.
///
/// Each subsystem defines its own error variant. Callers match on these to
/// decide recovery strategy; internal code continues to use `anyhow::Result`
/// for ad-hoc context chains where no caller needs to branch on the kind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),

    #[error("session: {0}")]
    Session(#[from] SessionError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors surfaced by the browser client adapter (C6). `TornDown` models the
/// silenced "context destroyed" / "target closed" exceptions from the source
/// system as an explicit variant instead of swallowing them silently.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("adapter call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("adapter was torn down mid-call")]
    TornDown,

    #[error("adapter rejected the operation: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session registered for instance {0}")]
    NotFound(String),

    #[error("instance {0} is not connected")]
    NotConnected(String),

    #[error("pending queue for instance {0} is full")]
    QueueFull(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("auth blob error for session {name}: {reason}")]
    AuthBlob { name: String, reason: String },

    #[error("metadata store error: {0}")]
    Metadata(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("instance {0} not found")]
    UnknownInstance(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
