//! Shutdown Coordinator (C12) — responds to a termination signal by
//! stopping every session cleanly within a hard deadline (§4.9).

use crate::adapter::BrowserAdapter;
use crate::session::{SessionRegistry, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Marks every session `shutting_down`/`Disconnected`, calls
/// `adapter.destroy()` on each live client handle racing
/// `destroy_timeout`, and reports how many sessions were torn down within
/// `deadline` versus left behind when the deadline expired (§4.9).
pub async fn shutdown_all(
    registry: &SessionRegistry,
    destroy_timeout: Duration,
    deadline: Duration,
) -> ShutdownReport {
    let ids = registry.enumerate().await;
    let mut report = ShutdownReport::default();

    let work = async {
        for id in &ids {
            let Some(handle) = registry.get(id).await else {
                continue;
            };

            let client = {
                let mut state = handle.lock().await;
                state.shutting_down = true;
                state.probes.abort_all();
                state.status = SessionStatus::Disconnected;
                state.client_handle.take()
            };

            if let Some(client) = client {
                match destroy_with_timeout(&client, destroy_timeout).await {
                    Ok(()) => report.closed.push(id.clone()),
                    Err(err) => {
                        warn!(instance_id = %id, error = %err, "shutdown: adapter.destroy failed");
                        report.failed.push(id.clone());
                    }
                }
            } else {
                report.closed.push(id.clone());
            }
        }
    };

    match tokio::time::timeout(deadline, work).await {
        Ok(()) => info!(total = ids.len(), "shutdown: all sessions processed within deadline"),
        Err(_) => {
            error!(
                deadline_secs = deadline.as_secs(),
                "shutdown: graceful deadline exceeded, remaining sessions abandoned"
            );
            report.timed_out = true;
        }
    }

    report
}

async fn destroy_with_timeout(
    client: &Arc<dyn BrowserAdapter>,
    timeout: Duration,
) -> Result<(), crate::error::AdapterError> {
    crate::adapter::with_timeout(timeout, async { client.destroy().await }).await
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: bool,
}
