//! Session Registry (C5) — the sole owner and mutator of `SessionState`.
//!
//! One `tokio::sync::Mutex<SessionState>` per instance serialises that
//! instance's transitions; the outer `RwLock<HashMap<..>>` only guards
//! registry membership (insert/remove/enumerate), so unrelated instances
//! never contend with each other (§4.1, §5).

use super::state::{SessionSnapshot, SessionState, SessionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing session handle, or creates a fresh
    /// `SessionState` and registers it.
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(existing) = self.sessions.read().await.get(id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(id))))
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session from the registry (used by the reconnector before
    /// re-creating it, and by explicit delete).
    pub async fn delete(&self, id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn enumerate(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn count_by_status(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.read().await.values() {
            let status = session.lock().await.status.as_str();
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }

    /// Runs `predicate` against a lock-held view of every session, returning
    /// the ids that matched.
    pub async fn filter<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut matched = Vec::new();
        for (id, session) in self.sessions.read().await.iter() {
            if predicate(&*session.lock().await) {
                matched.push(id.clone());
            }
        }
        matched
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut out = Vec::new();
        for session in self.sessions.read().await.values() {
            out.push(SessionSnapshot::from(&*session.lock().await));
        }
        out
    }

    pub async fn status_of(&self, id: &str) -> Option<SessionStatus> {
        let session = self.get(id).await?;
        let guard = session.lock().await;
        Some(guard.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("A").await;
        let b = registry.get_or_create("A").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn delete_removes_from_enumerate() {
        let registry = SessionRegistry::new();
        registry.get_or_create("A").await;
        assert_eq!(registry.enumerate().await, vec!["A".to_string()]);
        registry.delete("A").await;
        assert!(registry.enumerate().await.is_empty());
    }

    #[tokio::test]
    async fn count_by_status_groups_sessions() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("A").await;
        let b = registry.get_or_create("B").await;
        a.lock().await.status = SessionStatus::Connected;
        b.lock().await.status = SessionStatus::Connected;
        let counts = registry.count_by_status().await;
        assert_eq!(counts.get("CONNECTED"), Some(&2));
    }

    #[tokio::test]
    async fn filter_selects_matching_sessions() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("A").await;
        registry.get_or_create("B").await;
        a.lock().await.status = SessionStatus::Connected;

        let connected = registry
            .filter(|s| s.status == SessionStatus::Connected)
            .await;
        assert_eq!(connected, vec!["A".to_string()]);
    }
}
