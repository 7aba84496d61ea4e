//! Instance metadata store (C4) — durable per-instance intent and
//! last-known connection status, backed by sqlx over SQLite (§6.3).

use crate::config::DisconnectReason;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub webhook_url: Option<String>,
    pub sistema_url: Option<String>,
    pub api_token: Option<String>,
    pub phone: Option<String>,
    pub enabled: bool,
    pub connection_status: String,
    pub last_connection_at: Option<DateTime<Utc>>,
    pub last_disconnect_reason: Option<DisconnectReason>,
    pub reconnect_attempts: i64,
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let reason: Option<String> = row.try_get("last_disconnect_reason")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            webhook_url: row.try_get("webhook_url")?,
            sistema_url: row.try_get("sistema_url")?,
            api_token: row.try_get("api_token")?,
            phone: row.try_get("phone")?,
            enabled: row.try_get("enabled")?,
            connection_status: row.try_get("connection_status")?,
            last_connection_at: row.try_get("last_connection_at")?,
            last_disconnect_reason: reason.and_then(|r| parse_reason(&r)),
            reconnect_attempts: row.try_get("reconnect_attempts")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn parse_reason(s: &str) -> Option<DisconnectReason> {
    Some(match s {
        "CONFLICT" => DisconnectReason::Conflict,
        "UNPAIRED" => DisconnectReason::Unpaired,
        "NAVIGATION" => DisconnectReason::Navigation,
        "TIMEOUT" => DisconnectReason::Timeout,
        "NETWORK_ERROR" => DisconnectReason::NetworkError,
        "LOGOUT" => DisconnectReason::Logout,
        "BANNED" => DisconnectReason::Banned,
        "TOS_BLOCK" => DisconnectReason::TosBlock,
        "SMB_TOS_BLOCK" => DisconnectReason::SmbTosBlock,
        _ => return None,
    })
}

#[async_trait]
pub trait InstanceMetadataStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError>;
    async fn list_enabled(&self) -> Result<Vec<InstanceRecord>, StoreError>;
    async fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError>;
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError>;
    async fn set_status(
        &self,
        id: &str,
        status: &str,
        reason: Option<DisconnectReason>,
    ) -> Result<(), StoreError>;
    async fn set_connected(&self, id: &str, phone: Option<&str>) -> Result<(), StoreError>;
    async fn increment_reconnect_attempts(&self, id: &str) -> Result<i64, StoreError>;
    async fn reset_reconnect_attempts(&self, id: &str) -> Result<(), StoreError>;
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if missing, and add any columns a prior schema
    /// version lacked (§6.3: "the core migrates missing columns at
    /// startup").
    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                webhook_url TEXT,
                sistema_url TEXT,
                api_token TEXT,
                phone TEXT,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                connection_status TEXT NOT NULL DEFAULT 'DISCONNECTED',
                last_connection_at TIMESTAMP,
                last_disconnect_reason TEXT,
                reconnect_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        for (column, ddl) in [
            ("webhook_url", "ALTER TABLE instances ADD COLUMN webhook_url TEXT"),
            ("sistema_url", "ALTER TABLE instances ADD COLUMN sistema_url TEXT"),
            ("api_token", "ALTER TABLE instances ADD COLUMN api_token TEXT"),
            ("phone", "ALTER TABLE instances ADD COLUMN phone TEXT"),
            (
                "reconnect_attempts",
                "ALTER TABLE instances ADD COLUMN reconnect_attempts INTEGER NOT NULL DEFAULT 0",
            ),
        ] {
            if !self.has_column(column).await? {
                sqlx::query(ddl).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn has_column(&self, column: &str) -> Result<bool, StoreError> {
        let rows = sqlx::query("PRAGMA table_info(instances)")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().any(|r| {
            r.try_get::<String, _>("name").map(|n| n == column).unwrap_or(false)
        }))
    }

    /// Insert a new instance row (used by tests and provisioning paths
    /// outside this crate's scope).
    pub async fn upsert(&self, id: &str, name: &str, enabled: bool) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO instances (id, name, enabled)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, enabled = excluded.enabled
            ",
        )
        .bind(id)
        .bind(name)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceMetadataStore for SqliteMetadataStore {
    async fn get(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(InstanceRecord::from_row).transpose().map_err(Into::into)
    }

    async fn list_enabled(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM instances WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(InstanceRecord::from_row).collect::<Result<_, _>>().map_err(Into::into)
    }

    async fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM instances").fetch_all(&self.pool).await?;
        rows.iter().map(InstanceRecord::from_row).collect::<Result<_, _>>().map_err(Into::into)
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE instances SET enabled = ?2 WHERE id = ?1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: &str,
        reason: Option<DisconnectReason>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE instances SET connection_status = ?2, last_disconnect_reason = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(status)
        .bind(reason.map(|r| r.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_connected(&self, id: &str, phone: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE instances
            SET connection_status = 'CONNECTED', phone = ?2, last_connection_at = ?3
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(phone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_reconnect_attempts(&self, id: &str) -> Result<i64, StoreError> {
        sqlx::query("UPDATE instances SET reconnect_attempts = reconnect_attempts + 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT reconnect_attempts FROM instances WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("reconnect_attempts")?)
    }

    async fn reset_reconnect_attempts(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE instances SET reconnect_attempts = 0 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteMetadataStore {
        SqliteMetadataStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = store().await;
        store.upsert("A", "Instance A", true).await.unwrap();
        let rec = store.get("A").await.unwrap().unwrap();
        assert_eq!(rec.name, "Instance A");
        assert!(rec.enabled);
        assert_eq!(rec.connection_status, "DISCONNECTED");
    }

    #[tokio::test]
    async fn set_enabled_false_on_permanent_disconnect() {
        let store = store().await;
        store.upsert("A", "A", true).await.unwrap();
        store
            .set_status("A", "DISCONNECTED", Some(DisconnectReason::Banned))
            .await
            .unwrap();
        store.set_enabled("A", false).await.unwrap();

        let rec = store.get("A").await.unwrap().unwrap();
        assert!(!rec.enabled);
        assert_eq!(rec.last_disconnect_reason, Some(DisconnectReason::Banned));
    }

    #[tokio::test]
    async fn reconnect_attempts_increment_and_reset() {
        let store = store().await;
        store.upsert("A", "A", true).await.unwrap();
        assert_eq!(store.increment_reconnect_attempts("A").await.unwrap(), 1);
        assert_eq!(store.increment_reconnect_attempts("A").await.unwrap(), 2);
        store.reset_reconnect_attempts("A").await.unwrap();
        let rec = store.get("A").await.unwrap().unwrap();
        assert_eq!(rec.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn list_enabled_excludes_disabled_rows() {
        let store = store().await;
        store.upsert("A", "A", true).await.unwrap();
        store.upsert("B", "B", false).await.unwrap();
        let enabled = store.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "A");
    }
}
