use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::identity::Identity;
use crate::error::ConfigError;

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("listsync")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join("listsync")
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// GraphQL endpoint of the hosted API.
    pub api_url: String,
    pub cache_dir: PathBuf,
    /// How long a loaded snapshot counts as fresh.
    pub cache_ttl_secs: u64,
    /// Lists are read as one page of at most this many.
    pub list_page_limit: u32,
    pub task_page_size: u32,
    pub inbox_name: String,
    pub seed_demo_data: bool,
    /// Group whose members may run the admin scans.
    pub admin_group: String,
    pub debug_logging: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            cache_dir: default_cache_dir(),
            cache_ttl_secs: 300,
            list_page_limit: 1000,
            task_page_size: 100,
            inbox_name: "Inbox".into(),
            seed_demo_data: true,
            admin_group: "Admins".into(),
            debug_logging: false,
        }
    }
}

impl SyncConfig {
    pub fn config_path() -> PathBuf {
        default_config_dir().join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from the default location, falling back to defaults.
    pub fn load_or_default() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn cache_ttl_ms(&self) -> i64 {
        i64::try_from(self.cache_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Snapshot file for one identity; identities never share a file.
    pub fn snapshot_path(&self, identity: &Identity) -> PathBuf {
        self.cache_dir
            .join(format!("snapshot-{}.json", identity.storage_key()))
    }

    pub fn sync_ready(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}
