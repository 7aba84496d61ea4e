//! Central config & policy (C1): intervals, timeouts, backoff parameters,
//! thresholds, and classification of disconnect reasons. Loaded from a TOML
//! file on disk with environment-variable overrides, mirroring the loader
//! shape of a typical `directories`-based config layer.

mod reasons;

pub use reasons::DisconnectReason;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing policy for the lifecycle controller, liveness probes, and
/// reconnector. Field names track the named constants from §1-§9 directly so
/// a reviewer can match a constant to a field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub init_timeout_secs: u64,
    pub loading_timeout_secs: u64,
    pub promotion_poll_secs: u64,
    pub promotion_max_polls: u32,

    pub heartbeat_interval_secs: u64,
    pub state_check_timeout_secs: u64,
    pub max_consecutive_failures: u32,
    pub max_context_errors: u32,

    pub deep_check_interval_secs: u64,
    pub deep_check_timeout_secs: u64,

    pub watchdog_interval_secs: u64,
    pub ping_timeout_threshold_secs: u64,

    pub recovery_check_interval_secs: u64,
    pub zombie_threshold_secs: u64,
    pub inactivity_threshold_secs: u64,

    pub memory_check_interval_secs: u64,

    pub destroy_timeout_secs: u64,
    pub immediate_base_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub jitter_max_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_reset_after_secs: u64,

    pub max_queue_size: usize,
    pub max_send_retries: u32,
    pub message_ttl_secs: u64,
    pub drain_stabilisation_secs: u64,
    pub drain_pace_ms: u64,

    pub rehydrate_stagger_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for Policy {
    /// The conservative constant set from §9 — the source carried two
    /// conflicting policy tables (conservative / aggressive); this commits
    /// to the conservative one.
    fn default() -> Self {
        Self {
            init_timeout_secs: 180,
            loading_timeout_secs: 300,
            promotion_poll_secs: 15,
            promotion_max_polls: 10,

            heartbeat_interval_secs: 180,
            state_check_timeout_secs: 15,
            max_consecutive_failures: 10,
            max_context_errors: 15,

            deep_check_interval_secs: 1800,
            deep_check_timeout_secs: 20,

            watchdog_interval_secs: 60,
            ping_timeout_threshold_secs: 600,

            recovery_check_interval_secs: 60,
            zombie_threshold_secs: 1800,
            inactivity_threshold_secs: 900,

            memory_check_interval_secs: 900,

            destroy_timeout_secs: 10,
            immediate_base_ms: 3_000,
            base_delay_ms: 5_000,
            max_delay_secs: 300,
            jitter_max_ms: 3_000,
            max_reconnect_attempts: 20,
            reconnect_reset_after_secs: 1_800,

            max_queue_size: 100,
            max_send_retries: 3,
            message_ttl_secs: 300,
            drain_stabilisation_secs: 2,
            drain_pace_ms: 500,

            rehydrate_stagger_secs: 2,
            graceful_shutdown_timeout_secs: 30,
        }
    }
}

impl Policy {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
    pub fn loading_timeout(&self) -> Duration {
        Duration::from_secs(self.loading_timeout_secs)
    }
    pub fn promotion_poll(&self) -> Duration {
        Duration::from_secs(self.promotion_poll_secs)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
    pub fn state_check_timeout(&self) -> Duration {
        Duration::from_secs(self.state_check_timeout_secs)
    }
    pub fn deep_check_interval(&self) -> Duration {
        Duration::from_secs(self.deep_check_interval_secs)
    }
    pub fn deep_check_timeout(&self) -> Duration {
        Duration::from_secs(self.deep_check_timeout_secs)
    }
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
    pub fn ping_timeout_threshold(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_threshold_secs)
    }
    pub fn recovery_check_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_check_interval_secs)
    }
    pub fn zombie_threshold(&self) -> Duration {
        Duration::from_secs(self.zombie_threshold_secs)
    }
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }
    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_secs(self.memory_check_interval_secs)
    }
    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_secs(self.destroy_timeout_secs)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
    pub fn reconnect_reset_after(&self) -> Duration {
        Duration::from_secs(self.reconnect_reset_after_secs)
    }
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
    pub fn drain_stabilisation(&self) -> Duration {
        Duration::from_secs(self.drain_stabilisation_secs)
    }
    pub fn drain_pace(&self) -> Duration {
        Duration::from_millis(self.drain_pace_ms)
    }
    pub fn rehydrate_stagger(&self) -> Duration {
        Duration::from_secs(self.rehydrate_stagger_secs)
    }
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: Policy,
    pub session_storage_path: PathBuf,
    pub cache_path: PathBuf,
    pub log_level: String,
    pub database_url: String,
    pub port: u16,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            session_storage_path: PathBuf::from("./.sessions"),
            cache_path: PathBuf::from("./.cache"),
            log_level: "info".into(),
            database_url: "sqlite://./instances.db".into(),
            port: 8088,
            config_path: PathBuf::from("config.toml"),
        }
    }
}

impl Config {
    /// Default config file location, following the platform config-dir
    /// convention rather than hardcoding a path (§6.6).
    pub fn default_config_path() -> PathBuf {
        directories::ProjectDirs::from("dev", "wa-session-engine", "wa-session-engine")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Load config from `path`, falling back to defaults for a missing file,
    /// then apply the environment-variable overrides from §6.6.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
            toml::from_str::<Config>(&raw)
                .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SESSION_STORAGE_PATH") {
            self.session_storage_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("PORT")
            && let Ok(p) = v.parse()
        {
            self.port = p;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.max_queue_size == 0 {
            return Err(ConfigError::Validation(
                "policy.max_queue_size must be > 0".into(),
            ));
        }
        if self.policy.max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation(
                "policy.max_reconnect_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let policy = Policy::default();
        assert_eq!(policy.heartbeat_interval_secs, 180);
        assert_eq!(policy.ping_timeout_threshold_secs, 600);
        assert_eq!(policy.max_reconnect_attempts, 20);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.port, 8088);
    }

    #[test]
    fn validate_rejects_zero_queue_size() {
        let mut config = Config::default();
        config.policy.max_queue_size = 0;
        assert!(config.validate().is_err());
    }
}
