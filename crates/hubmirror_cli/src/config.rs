//! Configuration file support.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. Environment variables (prefixed with `HUBMIRROR_`, e.g.
//!    `HUBMIRROR_GITHUB_TOKEN`)
//! 2. Config file (`~/.config/hubmirror/config.toml` or `./hubmirror.toml`)
//! 3. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/hubmirror/mirror.db"
//!
//! [github]
//! tokens = ["ghp_..."]  # or use HUBMIRROR_GITHUB_TOKEN
//!
//! [sync]
//! poll_period_secs = 60
//! page_size = 1000
//! requests_per_second = 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub github: GitHubConfig,
    pub sync: SyncSettings,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; defaults to a SQLite file under the state directory.
    pub url: Option<String>,
}

/// Upstream API configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Single token, also settable via HUBMIRROR_GITHUB_TOKEN.
    pub token: Option<String>,
    /// Additional tokens to onboard on startup.
    pub tokens: Vec<String>,
    /// Custom API base (GitHub Enterprise).
    pub api_base: Option<String>,
}

impl GitHubConfig {
    /// All configured tokens, deduplicated, single-token field first.
    pub fn all_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for token in self.token.iter().chain(self.tokens.iter()) {
            if !token.is_empty() && !tokens.contains(token) {
                tokens.push(token.clone());
            }
        }
        tokens
    }
}

/// Sync engine settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub poll_period_secs: u64,
    pub page_size: usize,
    pub requests_per_second: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_period_secs: 60,
            page_size: 1000,
            requests_per_second: 10,
        }
    }
}

impl SyncSettings {
    pub fn to_sync_config(&self) -> hubmirror::SyncConfig {
        let mut config =
            hubmirror::SyncConfig::with_poll_period(Duration::from_secs(self.poll_period_secs));
        config.page_size = self.page_size;
        config.requests_per_second = self.requests_per_second;
        config
    }
}

/// Path to the user config file, if a config directory resolves.
fn config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "hubmirror").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Default database location under the state/data directory.
fn default_database_url() -> String {
    let path = ProjectDirs::from("", "", "hubmirror")
        .map(|dirs| dirs.data_dir().join("mirror.db"))
        .unwrap_or_else(|| PathBuf::from("hubmirror.db"));
    format!("sqlite://{}?mode=rwc", path.display())
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        builder = builder
            .add_source(File::new("hubmirror.toml", FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("HUBMIRROR").separator("_"));

        builder.build()?.try_deserialize()
    }

    /// The effective database URL.
    pub fn database_url(&self) -> String {
        self.database
            .url
            .clone()
            .unwrap_or_else(default_database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sync_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.poll_period_secs, 60);
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.requests_per_second, 10);
    }

    #[test]
    fn all_tokens_deduplicates() {
        let github = GitHubConfig {
            token: Some("a".to_string()),
            tokens: vec!["a".to_string(), "b".to_string(), String::new()],
            api_base: None,
        };
        assert_eq!(github.all_tokens(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn sync_settings_convert_to_engine_config() {
        let settings = SyncSettings {
            poll_period_secs: 30,
            page_size: 50,
            requests_per_second: 5,
        };
        let config = settings.to_sync_config();
        assert_eq!(config.poll_period, Duration::from_secs(30));
        assert_eq!(config.idle_after, Duration::from_secs(90));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.requests_per_second, 5);
    }
}
