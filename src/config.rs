//! Process configuration, loaded from a TOML file with environment overrides.
//!
//! Every field mirrors a key in the configuration table: the watcher poll
//! cadence, executor heartbeat cadence, writer retry schedule, registry GC
//! age, and the ambient process-level knobs (bind address, db path, log
//! filter) that every binary needs regardless of which core features are
//! exercised.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::UserDirs;
use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "127.0.0.1:8089".to_string()
}

fn default_db_path() -> String {
    "./agentcore.db".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    65_536
}

fn default_request_timeout_s() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_heartbeat_interval_s() -> u64 {
    15
}

fn default_watcher_max_wait_s() -> u64 {
    3600
}

fn default_writer_retry_schedule_ms() -> Vec<u64> {
    vec![100, 200, 400]
}

fn default_writer_fallback_capacity() -> usize {
    1024
}

fn default_registry_gc_max_age_h() -> u64 {
    24
}

fn default_message_events_ttl_s() -> u64 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCoreConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default = "default_watcher_max_wait_s")]
    pub watcher_max_wait_s: u64,
    #[serde(default = "default_writer_retry_schedule_ms")]
    pub writer_retry_schedule_ms: Vec<u64>,
    #[serde(default = "default_writer_fallback_capacity")]
    pub writer_fallback_capacity: usize,
    #[serde(default = "default_registry_gc_max_age_h")]
    pub registry_gc_max_age_h: u64,
    #[serde(default = "default_message_events_ttl_s")]
    pub message_events_ttl_s: u64,
}

impl Default for AgentCoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            log_filter: default_log_filter(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_s: default_request_timeout_s(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_s: default_heartbeat_interval_s(),
            watcher_max_wait_s: default_watcher_max_wait_s(),
            writer_retry_schedule_ms: default_writer_retry_schedule_ms(),
            writer_fallback_capacity: default_writer_fallback_capacity(),
            registry_gc_max_age_h: default_registry_gc_max_age_h(),
            message_events_ttl_s: default_message_events_ttl_s(),
        }
    }
}

impl AgentCoreConfig {
    /// Loads from `path` if given, otherwise from the user's default config
    /// directory (`~/.agentcore/config.toml`); falls back to built-in
    /// defaults if neither exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn db_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }
}

/// `~/.agentcore/config.toml`, mirroring the teacher's own
/// `UserDirs`-rooted default config directory convention. `None` if the
/// platform has no resolvable home directory (e.g. some container images) —
/// callers treat that the same as a missing file and fall back to defaults.
fn default_config_path() -> Option<PathBuf> {
    let home = UserDirs::new()?.home_dir().to_path_buf();
    Some(home.join(".agentcore").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_configuration_table() {
        let cfg = AgentCoreConfig::default();
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.heartbeat_interval_s, 15);
        assert_eq!(cfg.watcher_max_wait_s, 3600);
        assert_eq!(cfg.writer_retry_schedule_ms, vec![100, 200, 400]);
        assert_eq!(cfg.writer_fallback_capacity, 1024);
        assert_eq!(cfg.registry_gc_max_age_h, 24);
        assert_eq!(cfg.message_events_ttl_s, 0);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cfg = AgentCoreConfig::load(Some(Path::new("/nonexistent/agentcore.toml"))).unwrap();
        assert_eq!(cfg.bind_addr, default_bind_addr());
    }

    #[test]
    fn no_path_given_falls_back_to_defaults_when_default_config_dir_is_absent() {
        // Exercises the `path = None` branch of `load`; whether or not this
        // host actually has a `~/.agentcore/config.toml`, load() must not
        // error — at worst it picks up a real file, at best it defaults.
        let cfg = AgentCoreConfig::load(None).unwrap();
        assert!(!cfg.bind_addr.is_empty());
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentcore.toml");
        std::fs::write(&path, "poll_interval_ms = 250\n").unwrap();
        let cfg = AgentCoreConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.heartbeat_interval_s, 15);
    }
}
