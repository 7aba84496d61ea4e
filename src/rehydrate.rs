//! Rehydrator (C11) — on boot, restarts every instance marked `enabled` in
//! the metadata store, staggering starts so the browser adapter is not asked
//! to spin up dozens of sessions in the same instant (§4.8).

use crate::store::InstanceMetadataStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Lists enabled instances and invokes `start` for each, sleeping
/// `rehydrate_stagger` between starts. `start` is whatever the lifecycle
/// controller exposes for bringing an instance up from cold.
pub async fn rehydrate<F, Fut>(
    metadata: &Arc<dyn InstanceMetadataStore>,
    stagger: std::time::Duration,
    mut start: F,
) -> usize
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let instances = match metadata.list_enabled().await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, "rehydrator: failed to list enabled instances");
            return 0;
        }
    };

    let total = instances.len();
    info!(count = total, "rehydrator: starting enabled instances");

    for (idx, instance) in instances.into_iter().enumerate() {
        if idx > 0 {
            tokio::time::sleep(stagger).await;
        }
        start(instance.id).await;
    }

    total
}
