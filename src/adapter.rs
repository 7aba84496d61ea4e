//! Browser client adapter (C6) — consumed, not re-specified. This module
//! defines the narrow trait boundary the engine talks to; the actual
//! browser-automation implementation lives outside this crate's scope.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Raw state the adapter reports, independent of the engine's own
/// `SessionStatus` (§4.2). The engine reconciles the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Connected,
    Opening,
    Pairing,
    Unpaired,
    UnpairedIdle,
    Conflict,
    Timeout,
}

/// Events the engine subscribes to (§6.1).
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Qr(String),
    Loading { percent: u8, message: String },
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(crate::config::DisconnectReason),
    ChangeState(AdapterState),
    RemoteSessionSaved,
    ContextError,
}

/// What the engine asks the adapter to send.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Text { to: String, body: String },
    Media { to: String, media_ref: String, caption: Option<String> },
}

/// Operations the core invokes on a live browser-backed client (§6.1).
///
/// Every method here is a suspension point crossing a process boundary;
/// callers must race it against a timeout and must hold no lock while
/// awaiting it (§5).
#[async_trait]
pub trait BrowserAdapter: Send + Sync {
    async fn initialize(&self) -> Result<(), AdapterError>;

    async fn get_state(&self) -> Result<AdapterState, AdapterError>;

    async fn destroy(&self) -> Result<(), AdapterError>;

    async fn send_message(&self, payload: OutboundPayload) -> Result<(), AdapterError>;

    async fn takeover(&self) -> Result<(), AdapterError>;

    /// Phone id, once authenticated.
    fn info(&self) -> Option<String>;

    /// Subscribe to this adapter's event stream. The engine drains it with
    /// a state-machine `match` rather than re-registering many listeners.
    fn subscribe(&self) -> mpsc::Receiver<AdapterEvent>;
}

/// Constructs a fresh `BrowserAdapter` for a given instance id. The concrete
/// browser-automation implementation lives outside this crate; the engine
/// only needs this factory seam to create one adapter per session start and
/// one more per reconnect attempt.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, instance_id: &str) -> std::sync::Arc<dyn BrowserAdapter>;
}

/// Factory that reports every adapter as permanently rejected. This is the
/// integration seam: the binary links against it until a real
/// browser-automation `BrowserAdapter`/`AdapterFactory` pair is substituted
/// at deployment time.
pub struct UnwiredAdapterFactory;

struct UnwiredAdapter;

#[async_trait]
impl BrowserAdapter for UnwiredAdapter {
    async fn initialize(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Rejected("no browser client adapter wired in".into()))
    }
    async fn get_state(&self) -> Result<AdapterState, AdapterError> {
        Err(AdapterError::Rejected("no browser client adapter wired in".into()))
    }
    async fn destroy(&self) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn send_message(&self, _payload: OutboundPayload) -> Result<(), AdapterError> {
        Err(AdapterError::Rejected("no browser client adapter wired in".into()))
    }
    async fn takeover(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Rejected("no browser client adapter wired in".into()))
    }
    fn info(&self) -> Option<String> {
        None
    }
    fn subscribe(&self) -> mpsc::Receiver<AdapterEvent> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

impl AdapterFactory for UnwiredAdapterFactory {
    fn create(&self, _instance_id: &str) -> std::sync::Arc<dyn BrowserAdapter> {
        std::sync::Arc::new(UnwiredAdapter)
    }
}

/// Runs `fut` against `timeout`, mapping expiry onto `AdapterError::Timeout`
/// so every external-call site is uniformly wrapped (§5).
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, AdapterError>
where
    F: std::future::Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout)),
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory adapter used by integration tests to drive the lifecycle
    //! controller without a real browser process.
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc::Sender;
    use tokio::sync::Mutex;

    pub struct MockAdapter {
        tx: Sender<AdapterEvent>,
        rx: Mutex<Option<mpsc::Receiver<AdapterEvent>>>,
        state: Mutex<AdapterState>,
        phone: Mutex<Option<String>>,
        pub fail_destroy: std::sync::atomic::AtomicBool,
        pub fail_send: std::sync::atomic::AtomicBool,
        pub sent_count: std::sync::atomic::AtomicUsize,
    }

    impl MockAdapter {
        pub fn new() -> (std::sync::Arc<Self>, Sender<AdapterEvent>) {
            let (tx, rx) = mpsc::channel(32);
            let adapter = std::sync::Arc::new(Self {
                tx: tx.clone(),
                rx: Mutex::new(Some(rx)),
                state: Mutex::new(AdapterState::Opening),
                phone: Mutex::new(None),
                fail_destroy: std::sync::atomic::AtomicBool::new(false),
                fail_send: std::sync::atomic::AtomicBool::new(false),
                sent_count: std::sync::atomic::AtomicUsize::new(0),
            });
            (adapter, tx)
        }

        pub async fn set_state(&self, state: AdapterState) {
            *self.state.lock().await = state;
        }

        pub async fn set_phone(&self, phone: &str) {
            *self.phone.lock().await = Some(phone.to_string());
        }
    }

    #[async_trait]
    impl BrowserAdapter for MockAdapter {
        async fn initialize(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn get_state(&self) -> Result<AdapterState, AdapterError> {
            Ok(*self.state.lock().await)
        }

        async fn destroy(&self) -> Result<(), AdapterError> {
            if self.fail_destroy.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AdapterError::TornDown);
            }
            Ok(())
        }

        async fn send_message(&self, _payload: OutboundPayload) -> Result<(), AdapterError> {
            if self.fail_send.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AdapterError::Rejected("mock send failure".into()));
            }
            self.sent_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn takeover(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        fn info(&self) -> Option<String> {
            None
        }

        fn subscribe(&self) -> mpsc::Receiver<AdapterEvent> {
            self.rx
                .try_lock()
                .expect("subscribe called once")
                .take()
                .expect("subscribe called once")
        }
    }

    /// Factory that always hands out a fresh `MockAdapter`, recording every
    /// instance id it was asked to build so tests can assert call counts,
    /// and keeping the event sender + concrete adapter handle around so a
    /// test can drive the adapter that a running `LifecycleController`
    /// actually holds for a given instance (`start()` creates adapters
    /// internally; there is no other way back to them).
    pub struct MockAdapterFactory {
        pub created: std::sync::Mutex<Vec<String>>,
        senders: std::sync::Mutex<HashMap<String, Sender<AdapterEvent>>>,
        adapters: std::sync::Mutex<HashMap<String, std::sync::Arc<MockAdapter>>>,
    }

    impl MockAdapterFactory {
        pub fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                created: std::sync::Mutex::new(Vec::new()),
                senders: std::sync::Mutex::new(HashMap::new()),
                adapters: std::sync::Mutex::new(HashMap::new()),
            })
        }

        /// The event sender for the most recently created adapter for
        /// `instance_id`, so a test can push `AdapterEvent`s into the
        /// controller's event loop for that instance.
        pub fn sender_for(&self, instance_id: &str) -> Sender<AdapterEvent> {
            self.senders
                .lock()
                .unwrap()
                .get(instance_id)
                .cloned()
                .expect("adapter not created for instance_id yet")
        }

        /// The most recently created concrete adapter for `instance_id`, so
        /// a test can inspect e.g. `sent_count`.
        pub fn adapter_for(&self, instance_id: &str) -> std::sync::Arc<MockAdapter> {
            self.adapters
                .lock()
                .unwrap()
                .get(instance_id)
                .cloned()
                .expect("adapter not created for instance_id yet")
        }
    }

    impl AdapterFactory for MockAdapterFactory {
        fn create(&self, instance_id: &str) -> std::sync::Arc<dyn BrowserAdapter> {
            self.created.lock().unwrap().push(instance_id.to_string());
            let (adapter, tx) = MockAdapter::new();
            self.senders.lock().unwrap().insert(instance_id.to_string(), tx);
            self.adapters.lock().unwrap().insert(instance_id.to_string(), adapter.clone());
            adapter
        }
    }
}
