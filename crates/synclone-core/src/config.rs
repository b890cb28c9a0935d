use crate::checkpoint_store::RetentionPolicy;
use crate::model::SyncStrategy;
use crate::progress::DisplayMode;
use crate::retry::RetryPolicy;
use anyhow::Context;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_PARALLEL: usize = 100;

/// Pool and timeout settings for the HTTP client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Time allowed between bytes of a response, headers included.
    pub read_timeout_secs: u64,
    /// Deadline for a whole request.
    pub request_timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout_secs: 90,
            keepalive_secs: 30,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            request_timeout_secs: 60,
            max_redirects: 10,
        }
    }
}

impl ConnectionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub state_dir: Option<PathBuf>,
    pub parallel: usize,
    pub max_retries: u32,
    pub strategy: SyncStrategy,
    pub progress_mode: DisplayMode,
    pub retry: RetryPolicy,
    pub connection: ConnectionConfig,
    pub checkpoint_interval_secs: u64,
    /// Repository count above which checkpoints are saved on the interval
    /// rather than after every repository.
    pub large_set_threshold: usize,
    pub retention: RetentionPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            parallel: 10,
            max_retries: 3,
            strategy: SyncStrategy::Reset,
            progress_mode: DisplayMode::Compact,
            retry: RetryPolicy::default(),
            connection: ConnectionConfig::default(),
            checkpoint_interval_secs: 30,
            large_set_threshold: 500,
            retention: RetentionPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).context("read config")?;
        let config = serde_json::from_str(&data).context("parse config")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, data).context("write config")?;
        Ok(())
    }

    pub fn state_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_state_dir(),
        }
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let project = ProjectDirs::from("com", "gzh", "synclone").context("resolve project dirs")?;
    Ok(project.config_dir().join("config.json"))
}

/// `~/.gzh/state`
pub fn default_state_dir() -> anyhow::Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home directory")?;
    Ok(base.home_dir().join(".gzh").join("state"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = SyncConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.parallel, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(30));
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let config = SyncConfig {
            state_dir: Some(tmp.path().join("state")),
            parallel: 4,
            strategy: SyncStrategy::Fetch,
            progress_mode: DisplayMode::Detailed,
            ..SyncConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.state_dir().unwrap(), tmp.path().join("state"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"parallel":3,"retry":{"max_retries":5},"strategy":"pull"}"#).unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.parallel, 3);
        assert_eq!(config.strategy, SyncStrategy::Pull);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.connection.max_redirects, 10);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }
}
