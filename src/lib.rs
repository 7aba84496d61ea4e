//! Session Lifecycle & Resilience Engine for a multi-tenant WhatsApp Web
//! gateway: owns each instance's connection state machine, liveness
//! probing, reconnection, pending-message queueing, rehydration on boot,
//! and graceful shutdown. The actual browser-automation client (C6) is
//! consumed through the `BrowserAdapter` trait, not implemented here.

pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod liveness;
pub mod log;
pub mod queue;
pub mod reconnect;
pub mod rehydrate;
pub mod session;
pub mod shutdown;
pub mod store;


pub use error::{EngineError, EngineResult};
