//! Configuration loading and persistence.
//!
//! Reads and writes the syncwire configuration file. The token is never
//! written to disk; it comes from `SYNCWIRE_TOKEN` or the command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::connection::{ConnectionOptions, ReconnectPolicy};
use crate::constants::{CONNECT_TIMEOUT, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS};
use crate::session::SessionConfig;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the syncwire CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// REST base URL of the backend.
    pub server_url: String,
    /// API token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Seconds between heartbeat pings.
    pub heartbeat_secs: u64,
    /// Handshake timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Automatic reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Disconnect when the app goes to the background.
    pub disconnect_on_background: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            token: String::new(),
            heartbeat_secs: HEARTBEAT_INTERVAL.as_secs(),
            connect_timeout_secs: CONNECT_TIMEOUT.as_secs(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            disconnect_on_background: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `SYNCWIRE_CONFIG_DIR` overrides the platform config dir
    /// (macOS: ~/Library/Application Support/syncwire).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SYNCWIRE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("syncwire")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from(&dir).unwrap_or_else(|e| {
            log::debug!("Using default config: {e:#}");
            Self::default()
        });
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read `config.json` from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Apply `SYNCWIRE_*` overrides looked up through `var`.
    ///
    /// Numeric values that do not parse are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = var("SYNCWIRE_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(token) = var("SYNCWIRE_TOKEN") {
            self.token = token;
        }

        if let Some(secs) = var("SYNCWIRE_HEARTBEAT_SECS").and_then(|v| v.parse().ok()) {
            self.heartbeat_secs = secs;
        }

        if let Some(max) = var("SYNCWIRE_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_reconnect_attempts = max;
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the token is NOT saved.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Write `config.json` into `dir`, readable by the owner only.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Set one persisted field from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}"))
        }

        match key {
            "server_url" => self.server_url = value.to_string(),
            "heartbeat_secs" => self.heartbeat_secs = parse(key, value)?,
            "connect_timeout_secs" => self.connect_timeout_secs = parse(key, value)?,
            "max_reconnect_attempts" => self.max_reconnect_attempts = parse(key, value)?,
            "disconnect_on_background" => self.disconnect_on_background = parse(key, value)?,
            "token" => anyhow::bail!("The token is not stored; set SYNCWIRE_TOKEN instead"),
            other => anyhow::bail!("Unknown config key '{other}'"),
        }
        Ok(())
    }

    /// Check if a token is configured.
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Token with all but the first four characters masked, for display.
    pub fn redacted_token(&self) -> String {
        if self.token.is_empty() {
            return "(none)".to_string();
        }
        let visible: String = self.token.chars().take(4).collect();
        format!("{visible}…")
    }

    /// Connection tuning derived from this config.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            policy: ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
                ..ReconnectPolicy::default()
            },
            ..ConnectionOptions::default()
        }
    }

    /// Session settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.server_url.clone(),
            credential: self.has_token().then(|| self.token.clone()),
            disconnect_on_background: self.disconnect_on_background,
            connection: self.connection_options(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(!config.disconnect_on_background);
        assert!(!config.has_token());
    }

    #[test]
    fn test_config_serialization_excludes_token() {
        let config = Config {
            token: "secret_token".to_string(),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("secret_token"));
        assert!(!json.contains("\"token\""));
    }

    #[test]
    fn test_save_and_load_roundtrip_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server_url: "https://api.example.com".to_string(),
            token: "secret".to_string(),
            max_reconnect_attempts: 9,
            ..Config::default()
        };
        config.save_to(dir.path()).unwrap();

        let loaded = Config::load_from(dir.path()).unwrap();
        assert_eq!(loaded.server_url, "https://api.example.com");
        assert_eq!(loaded.max_reconnect_attempts, 9);
        assert!(loaded.token.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        Config::default().save_to(dir.path()).unwrap();
        let mode = fs::metadata(dir.path().join(CONFIG_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"server_url":"https://x.test"}"#).unwrap();
        let loaded = Config::load_from(dir.path()).unwrap();
        assert_eq!(loaded.server_url, "https://x.test");
        assert_eq!(loaded.heartbeat_secs, 30);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            ("SYNCWIRE_SERVER_URL", "https://env.test"),
            ("SYNCWIRE_TOKEN", "tok"),
            ("SYNCWIRE_HEARTBEAT_SECS", "15"),
            ("SYNCWIRE_MAX_RECONNECT_ATTEMPTS", "not-a-number"),
        ]));
        assert_eq!(config.server_url, "https://env.test");
        assert_eq!(config.token, "tok");
        assert_eq!(config.heartbeat_secs, 15);
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_set_known_keys() {
        let mut config = Config::default();
        config.set("server_url", "https://set.test").unwrap();
        config.set("max_reconnect_attempts", "8").unwrap();
        config.set("disconnect_on_background", "true").unwrap();
        assert_eq!(config.server_url, "https://set.test");
        assert_eq!(config.max_reconnect_attempts, 8);
        assert!(config.disconnect_on_background);

        assert!(config.set("heartbeat_secs", "soon").is_err());
        assert!(config.set("token", "x").is_err());
        assert!(config.set("colour", "blue").is_err());
    }

    #[test]
    fn test_redacted_token() {
        let mut config = Config::default();
        assert_eq!(config.redacted_token(), "(none)");
        config.token = "abcdefgh".to_string();
        assert_eq!(config.redacted_token(), "abcd…");
    }

    #[test]
    fn test_session_config_conversion() {
        let config = Config {
            server_url: "https://api.test".to_string(),
            token: "tok".to_string(),
            heartbeat_secs: 20,
            max_reconnect_attempts: 3,
            ..Config::default()
        };
        let session = config.session_config();
        assert_eq!(session.ws_url(), "wss://api.test/ws");
        assert_eq!(session.credential.as_deref(), Some("tok"));
        assert_eq!(session.connection.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(session.connection.policy.max_attempts, 3);
        assert_eq!(session.connection.policy.base_delay, Duration::from_secs(2));
    }
}
