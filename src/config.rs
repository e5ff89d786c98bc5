//! Server configuration.
//!
//! Loads settings from `wafden.toml` with serde defaults, so a missing file
//! or a partial file both work. Secrets (the bootstrap API key) can be
//! overridden through the environment.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! port = 8080
//!
//! [database]
//! path = "wafden.db"
//!
//! [cache]
//! enabled = true
//! path = "wafden-cache.redb"
//!
//! [auth]
//! bootstrap_key = "change-me"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding `auth.bootstrap_key`.
const BOOTSTRAP_KEY_ENV: &str = "WAFDEN_BOOTSTRAP_KEY";

/// Default config file name, resolved against the working directory.
const CONFIG_FILE: &str = "wafden.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// SQLite source-of-truth settings.
    pub database: DatabaseSettings,
    /// Ban set-cache settings.
    pub cache: CacheSettings,
    /// Auth boundary settings.
    pub auth: AuthSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address for the API listener.
    pub bind: String,
    /// Port for the API listener.
    pub port: u16,
}

/// SQLite settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Ban cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether the set cache is used at all. Disabling it forces every
    /// membership check onto the authoritative database path.
    pub enabled: bool,
    /// Path to the redb cache file.
    pub path: PathBuf,
}

/// Auth settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Plain-text API key used by `wafden init-db` to seed the first
    /// tenant. Only its SHA-256 hash is persisted.
    pub bootstrap_key: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wafden.db"),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("wafden-cache.redb"),
        }
    }
}

impl Config {
    /// Loads configuration.
    ///
    /// With an explicit `path` the file must exist and parse. Without one,
    /// `wafden.toml` in the working directory is used if present, defaults
    /// otherwise. `WAFDEN_BOOTSTRAP_KEY` overrides the bootstrap key either
    /// way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(explicit) => Self::read_file(explicit)?,
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::read_file(default)?
                } else {
                    tracing::debug!("no {CONFIG_FILE} found, using defaults");
                    Self::default()
                }
            }
        };

        if let Ok(key) = std::env::var(BOOTSTRAP_KEY_ENV) {
            if !key.is_empty() {
                config.auth.bootstrap_key = Some(key);
            }
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}
