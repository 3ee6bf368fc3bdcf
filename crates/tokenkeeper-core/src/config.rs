//! Application configuration management.
//!
//! Holds the backend URLs, the renewal timings and the public route and view
//! allowlists. Every field has a default, so a partial file is fine.
//!
//! Configuration is stored at `~/.config/tokenkeeper/config.json`.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::auth::session::DEFAULT_STORAGE_KEY;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "tokenkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Renew this long before the access credential lapses.
const DEFAULT_RENEWAL_HORIZON_SECS: u64 = 5 * 60;

const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub auth_base_url: String,
    pub renewal_horizon_secs: u64,
    pub renewal_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub storage_key: String,
    /// Keep the session record in the OS keychain instead of the cache directory.
    pub use_keychain: bool,
    pub public_routes: Vec<String>,
    pub public_views: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            auth_base_url: "http://localhost:8080/api/auth".to_string(),
            renewal_horizon_secs: DEFAULT_RENEWAL_HORIZON_SECS,
            renewal_interval_secs: DEFAULT_RENEWAL_INTERVAL_SECS,
            request_timeout_secs: crate::api::transport::REQUEST_TIMEOUT_SECS,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            use_keychain: false,
            public_routes: vec![
                "POST /auth/login".to_string(),
                "POST /auth/refresh".to_string(),
                "POST /leads/public".to_string(),
                "GET /catalog/**".to_string(),
            ],
            public_views: vec!["/login".to_string(), "/public/**".to_string()],
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the session record.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn renewal_horizon(&self) -> Duration {
        Duration::seconds(self.renewal_horizon_secs as i64)
    }

    pub fn renewal_interval(&self) -> StdDuration {
        // A zero period would make the timer spin.
        StdDuration::from_secs(self.renewal_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }
}
