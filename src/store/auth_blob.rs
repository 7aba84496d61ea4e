//! Auth blob store (C3) — opaque `session-name -> archive bytes` CRUD.
//!
//! Access must be serialised per session name (a `save` for session X
//! excludes `extract`/`delete` for the same X, §5). We model that with a map
//! of per-key `tokio::sync::Mutex` guards rather than one global lock, so
//! unrelated sessions never contend.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait AuthBlobStore: Send + Sync {
    async fn exists(&self, name: &str) -> bool;
    async fn save(&self, name: &str, archive: Vec<u8>) -> Result<(), StoreError>;
    async fn extract(&self, name: &str) -> Result<Vec<u8>, StoreError>;
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Vec<String>;
}

/// Filesystem-backed store: one archive file per session name under
/// `root_dir`, guarded per-name so concurrent operations on different
/// sessions never block each other.
pub struct FsAuthBlobStore {
    root_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsAuthBlobStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root_dir.join(format!("{name}.archive"))
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl AuthBlobStore for FsAuthBlobStore {
    async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_for(name)).await.unwrap_or(false)
    }

    async fn save(&self, name: &str, archive: Vec<u8>) -> Result<(), StoreError> {
        let guard = self.lock_for(name).await;
        let _permit = guard.lock().await;

        if let Err(e) = tokio::fs::create_dir_all(&self.root_dir).await {
            return Err(StoreError::AuthBlob {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }
        tokio::fs::write(self.path_for(name), archive)
            .await
            .map_err(|e| StoreError::AuthBlob {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn extract(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let guard = self.lock_for(name).await;
        let _permit = guard.lock().await;

        tokio::fs::read(self.path_for(name))
            .await
            .map_err(|e| StoreError::AuthBlob {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let guard = self.lock_for(name).await;
        let _permit = guard.lock().await;

        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.root_dir).await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_extract_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAuthBlobStore::new(dir.path().to_path_buf());

        assert!(!store.exists("RemoteAuth-A").await);
        store.save("RemoteAuth-A", b"blob".to_vec()).await.unwrap();
        assert!(store.exists("RemoteAuth-A").await);
        assert_eq!(store.extract("RemoteAuth-A").await.unwrap(), b"blob");
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAuthBlobStore::new(dir.path().to_path_buf());
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn list_reflects_saved_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAuthBlobStore::new(dir.path().to_path_buf());
        store.save("A", b"1".to_vec()).await.unwrap();
        store.save("B", b"2".to_vec()).await.unwrap();
        let mut names = store.list().await;
        names.sort();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }
}
