//! Configuration management for mpd-stats

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Permission;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// Stats protocol server
    pub server: ServerConfig,

    /// Upstream MPD connection
    pub mpd: MpdConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Data directory (default: ~/.local/share/mpd-stats)
    pub data_dir: Option<PathBuf>,
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path
    pub path: Option<String>,
}

/// Stats server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind entries: `any`, a host name or address, or an absolute unix
    /// socket path
    pub bind: Vec<String>,

    /// TCP port used by every non-socket bind entry
    pub port: u16,

    /// Maximum simultaneous client connections
    pub max_clients: usize,

    /// Permissions granted to a connection before it sends `password`
    pub default_permissions: Permission,

    /// Password to permission table
    pub passwords: HashMap<String, Permission>,
}

/// Upstream MPD connection, used for event monitoring, imports and the
/// client's "current song" shortcuts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpdConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,

    /// Delay before reconnecting after a lost connection (e.g. "5s")
    pub reconnect: String,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: vec!["any".to_string()],
            port: crate::DEFAULT_PORT,
            max_clients: 16,
            default_permissions: Permission::SELECT,
            passwords: HashMap::new(),
        }
    }
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6600,
            password: None,
            reconnect: "5s".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine config directory"))?;
        Ok(config_dir.join(crate::APP_NAME).join("config.toml"))
    }

    /// Get the data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.general.data_dir {
            Ok(dir.clone())
        } else {
            let data_dir = dirs::data_local_dir()
                .ok_or_else(|| Error::config("Could not determine data directory"))?;
            Ok(data_dir.join(crate::APP_NAME))
        }
    }

    /// Get the database path
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.database.path {
            return Ok(PathBuf::from(path));
        }
        Ok(self.data_dir()?.join("stats.db"))
    }

    /// Parsed MPD reconnect interval
    pub fn mpd_reconnect_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.mpd.reconnect).map_err(|e| {
            Error::config(format!(
                "invalid mpd.reconnect '{}': {e}",
                self.mpd.reconnect
            ))
        })
    }

    /// Validate configuration values.
    ///
    /// Call this after loading to ensure all values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "log_level must be one of {:?}, got '{}'",
                valid_levels, self.general.log_level
            )));
        }

        if self.server.bind.is_empty() {
            return Err(Error::config("server.bind must list at least one address"));
        }

        if self.server.max_clients == 0 {
            return Err(Error::config("server.max_clients must be at least 1"));
        }

        if self.server.passwords.keys().any(String::is_empty) {
            return Err(Error::config("server.passwords contains an empty password"));
        }

        self.mpd_reconnect_interval()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, vec!["any"]);
        assert_eq!(config.server.default_permissions, Permission::SELECT);
        assert_eq!(config.mpd_reconnect_interval().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [general]
            log_level = "debug"

            [database]
            path = "/tmp/stats.db"

            [server]
            bind = ["127.0.0.1", "/run/mpd-stats.sock"]
            port = 7000
            max_clients = 4
            default_permissions = ["none"]

            [server.passwords]
            "s3cret" = ["select", "update"]
            "reader" = ["select"]

            [mpd]
            host = "music.local"
            password = "hunter2"
            reconnect = "1m 30s"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.default_permissions, Permission::NONE);
        assert_eq!(config.server.passwords["s3cret"], Permission::ALL);
        assert_eq!(config.server.passwords["reader"], Permission::SELECT);
        assert_eq!(config.mpd.port, 6600);
        assert_eq!(config.mpd.password.as_deref(), Some("hunter2"));
        assert_eq!(config.mpd_reconnect_interval().unwrap(), Duration::from_secs(90));
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/stats.db"));
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [server]
            default_permissions = ["write"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_clients = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mpd.reconnect = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.passwords.insert(String::new(), Permission::ALL);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = Config::default();
        config.server.passwords.insert("pw".to_string(), Permission::ALL);
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.passwords["pw"], Permission::ALL);
        assert_eq!(back.server.port, config.server.port);
    }
}
