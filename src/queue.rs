//! Pending Message Queue (C10) — per-instance bounded FIFO used when a send
//! is requested while the instance is not `CONNECTED` (§4.7).

use crate::adapter::{BrowserAdapter, OutboundPayload};
use crate::config::Policy;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum PendingKind {
    Text { to: String, content: String },
    Media { to: String, media_ref: String, caption: Option<String> },
}

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: String,
    pub kind: PendingKind,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PendingMessage {
    fn new(kind: PendingKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.enqueued_at);
        age > chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
    }

    fn into_payload(self) -> OutboundPayload {
        match self.kind {
            PendingKind::Text { to, content } => OutboundPayload::Text { to, body: content },
            PendingKind::Media { to, media_ref, caption } => {
                OutboundPayload::Media { to, media_ref, caption }
            }
        }
    }
}

/// Outcome of a `drain` pass, surfaced to `/api/queue/:id` callers and tests.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub sent: Vec<String>,
    pub expired: Vec<String>,
    pub dropped: Vec<String>,
}

struct InstanceQueue {
    messages: VecDeque<PendingMessage>,
}

/// Per-instance bounded FIFOs. On overflow the oldest message is evicted —
/// producers prefer recency over completeness, consistent with the short
/// TTL (§4.7, invariant 6 in §8).
pub struct PendingQueue {
    capacity: usize,
    max_retries: u32,
    queues: Mutex<HashMap<String, InstanceQueue>>,
}

impl PendingQueue {
    pub fn new(policy: &Policy) -> Self {
        Self {
            capacity: policy.max_queue_size,
            max_retries: policy.max_send_retries,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a message, returning its id and 1-based queue position.
    pub async fn enqueue(&self, instance_id: &str, kind: PendingKind) -> (String, usize) {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceQueue { messages: VecDeque::new() });

        let message = PendingMessage::new(kind);
        let id = message.id.clone();
        queue.messages.push_back(message);

        while queue.messages.len() > self.capacity {
            queue.messages.pop_front();
        }

        let position = queue.messages.iter().position(|m| m.id == id).map_or(0, |p| p + 1);
        (id, position)
    }

    pub async fn len(&self, instance_id: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(instance_id)
            .map_or(0, |q| q.messages.len())
    }

    pub async fn clear(&self, instance_id: &str) {
        self.queues.lock().await.remove(instance_id);
    }

    pub async fn list(&self, instance_id: &str) -> Vec<PendingMessage> {
        self.queues
            .lock()
            .await
            .get(instance_id)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drains the queue FIFO, pacing sends with `policy.drain_pace`, and
    /// stopping early if `still_connected` returns false (§4.7). Expired
    /// messages are dropped and reported rather than dispatched (invariant
    /// 7 in §8).
    pub async fn drain(
        &self,
        instance_id: &str,
        adapter: &Arc<dyn BrowserAdapter>,
        policy: &Policy,
        still_connected: impl Fn() -> bool,
    ) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if !still_connected() {
                break;
            }

            let next = {
                let mut queues = self.queues.lock().await;
                let Some(queue) = queues.get_mut(instance_id) else {
                    break;
                };
                queue.messages.pop_front()
            };

            let Some(mut message) = next else {
                break;
            };

            if message.is_expired(policy.message_ttl(), Utc::now()) {
                report.expired.push(message.id);
                continue;
            }

            match adapter.send_message(message.clone().into_payload()).await {
                Ok(()) => report.sent.push(message.id),
                Err(err) => {
                    message.attempts += 1;
                    message.last_error = Some(err.to_string());
                    if message.attempts >= self.max_retries {
                        report.dropped.push(message.id);
                    } else {
                        let id = message.id.clone();
                        let mut queues = self.queues.lock().await;
                        if let Some(queue) = queues.get_mut(instance_id) {
                            queue.messages.push_back(message);
                        }
                        report.dropped.push(id);
                        break;
                    }
                }
            }

            tokio::time::sleep(policy.drain_pace()).await;
        }

        report
    }
}
