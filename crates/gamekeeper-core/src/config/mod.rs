//! Persistent configuration document.
//!
//! One JSON file holds two top-level objects: `hon_data` (game server
//! identity, credentials, directories, ports, capacity, feature flags) and
//! `application_data` (logging, task intervals, notification sinks,
//! security). Every field is serde-defaulted, so loading overlays the file
//! contents onto defaults; after a successful load the merged document is
//! re-written so fields introduced by newer builds appear in the file.

mod validate;

pub use validate::{ValidationIssue, ValidationReport, validate};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_MANAGER_PORT: u16 = 1134;
pub const DEFAULT_GAME_PORT: u16 = 11235;
pub const DEFAULT_VOICE_PORT: u16 = 11335;
pub const DEFAULT_API_PORT: u16 = 5000;

/// Errors from loading or persisting the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration invalid: {0}")]
    Invalid(String),
}

/// Game-server identity, directories, ports, and feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HonData {
    // Paths
    #[serde(rename = "hon_install_directory")]
    pub install_directory: String,
    #[serde(rename = "hon_home_directory")]
    pub home_directory: String,
    #[serde(rename = "hon_artefacts_directory")]
    pub artefacts_directory: String,

    #[serde(rename = "hon_executable_name")]
    pub executable_name: String,

    // Credentials
    #[serde(rename = "svr_login")]
    pub login: String,
    #[serde(rename = "svr_password")]
    pub password: String,

    // Identity
    #[serde(rename = "svr_name")]
    pub name: String,
    #[serde(rename = "svr_location")]
    pub location: String,
    #[serde(rename = "svr_region")]
    pub region: String,
    #[serde(rename = "svr_ip")]
    pub ip: String,
    #[serde(rename = "svr_version")]
    pub server_version: String,

    // Pool capacity
    #[serde(rename = "svr_total")]
    pub total_servers: usize,
    #[serde(rename = "svr_total_per_core")]
    pub servers_per_core: usize,
    #[serde(rename = "svr_max_concurrent_starts")]
    pub max_concurrent_starts: usize,

    // Ports
    #[serde(rename = "svr_starting_gamePort")]
    pub starting_game_port: u16,
    #[serde(rename = "svr_starting_voicePort")]
    pub starting_voice_port: u16,
    #[serde(rename = "svr_managerPort")]
    pub manager_port: u16,
    #[serde(rename = "svr_api_port")]
    pub api_port: u16,

    // Upstream
    #[serde(rename = "svr_masterServer")]
    pub master_server_url: String,
    #[serde(rename = "svr_chatAddress")]
    pub chat_address: String,
    #[serde(rename = "svr_chatPort")]
    pub chat_port: u16,

    // Feature flags
    #[serde(rename = "man_enableProxy")]
    pub enable_proxy: bool,
    #[serde(rename = "man_use_forkmaster")]
    pub use_fork_master: bool,
    #[serde(rename = "svr_noConsole")]
    pub no_console: bool,
    #[serde(rename = "svr_override_affinity")]
    pub override_affinity: bool,
    #[serde(rename = "svr_allow_bot_matches")]
    pub allow_bot_matches: bool,

    #[serde(rename = "svr_max_idle_time")]
    pub max_idle_time: u32,
}

impl Default for HonData {
    fn default() -> Self {
        Self {
            install_directory: String::new(),
            home_directory: String::new(),
            artefacts_directory: String::new(),
            executable_name: String::new(),
            login: String::new(),
            password: String::new(),
            name: String::new(),
            location: String::new(),
            region: String::new(),
            ip: String::new(),
            server_version: String::new(),
            total_servers: 3,
            servers_per_core: 2,
            max_concurrent_starts: 5,
            starting_game_port: DEFAULT_GAME_PORT,
            starting_voice_port: DEFAULT_VOICE_PORT,
            manager_port: DEFAULT_MANAGER_PORT,
            api_port: DEFAULT_API_PORT,
            master_server_url: "api.kongor.net".to_string(),
            chat_address: "96.127.149.202".to_string(),
            chat_port: 11032,
            enable_proxy: false,
            use_fork_master: false,
            no_console: false,
            override_affinity: true,
            allow_bot_matches: false,
            max_idle_time: 60,
        }
    }
}

/// Health-check and scheduled-task intervals, in seconds. Zero disables a
/// check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    #[serde(rename = "general_health_interval_sec")]
    pub general_health: u64,
    #[serde(rename = "disk_check_interval_sec")]
    pub disk_check: u64,
    #[serde(rename = "lag_check_interval_sec")]
    pub lag_check: u64,
    #[serde(rename = "heartbeat_interval_sec")]
    pub heartbeat: u64,
    #[serde(rename = "patch_check_interval_sec")]
    pub patch_check: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            general_health: 60,
            disk_check: 3600,
            lag_check: 120,
            heartbeat: 60,
            patch_check: 120,
        }
    }
}

/// Discord notification sink settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub owner_id: String,
    pub webhook_url: String,
    pub notify_on_lag: bool,
    pub notify_on_crash: bool,
    pub notify_on_disk: bool,
}

/// MQTT telemetry sink settings. The broker client lives outside this
/// repository; the settings are part of the document contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_url: String,
    pub port: u16,
    pub use_tls: bool,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: String::new(),
            port: 8883,
            use_tls: true,
            client_id: String::new(),
        }
    }
}

/// Security settings for the management surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub rate_limit_rps: u32,
    pub auth_disabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            ip_whitelist: Vec::new(),
            rate_limit_rps: 100,
            auth_disabled: true,
        }
    }
}

/// Logging settings for the hosting process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
        }
    }
}

/// Manager application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppData {
    pub timers: TimerConfig,
    pub discord: DiscordConfig,
    pub mqtt: MqttConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hon_data: HonData,
    pub application_data: AppData,
}

impl Config {
    /// True when the operator has not completed initial setup.
    pub fn is_first_run(&self) -> bool {
        self.hon_data.login.is_empty() || self.hon_data.install_directory.is_empty()
    }
}

/// Shared, persistent configuration handle.
///
/// Readers get defensive copies; writers replace whole sections under the
/// write lock and then persist. The lock is never held across I/O awaits.
pub struct ConfigHandle {
    inner: RwLock<Config>,
    path: PathBuf,
}

impl ConfigHandle {
    /// Load the document from `dir/config.json`.
    ///
    /// A missing file is not an error: defaults are written and used. A
    /// present-but-unparsable file is an error — silently clobbering an
    /// operator's edits would be worse than refusing to start.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = dir.as_ref().join(DEFAULT_CONFIG_FILE);

        let config = match fs::read(&path) {
            Ok(bytes) => {
                let config: Config =
                    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, creating defaults");
                Config::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let handle = Self {
            inner: RwLock::new(config),
            path,
        };

        // Re-save so new default fields show up in the file.
        if let Err(err) = handle.save() {
            warn!(error = %err, "failed to re-save config with current defaults");
        }

        Ok(handle)
    }

    /// Build a handle around an in-memory document (tests, tooling).
    pub fn from_config(config: Config, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(config),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the game-server section.
    pub fn hon_data(&self) -> HonData {
        self.inner.read().expect("config lock poisoned").hon_data.clone()
    }

    /// Copy of the application section.
    pub fn app_data(&self) -> AppData {
        self.inner
            .read()
            .expect("config lock poisoned")
            .application_data
            .clone()
    }

    /// Copy of the whole document.
    pub fn snapshot(&self) -> Config {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Replace the game-server section. Does not persist by itself.
    pub fn set_hon_data(&self, data: HonData) {
        self.inner.write().expect("config lock poisoned").hon_data = data;
    }

    /// Replace the application section. Does not persist by itself.
    pub fn set_app_data(&self, data: AppData) {
        self.inner
            .write()
            .expect("config lock poisoned")
            .application_data = data;
    }

    /// Update one `hon_data` field by its JSON key, via a map round-trip.
    pub fn update_hon_field(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let mut map: HashMap<String, serde_json::Value> =
            serde_json::from_value(serde_json::to_value(&guard.hon_data).expect("serializable"))
                .expect("hon_data is a json object");
        map.insert(key.to_string(), value);
        let updated = serde_json::from_value(serde_json::to_value(map).expect("serializable"))
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        guard.hon_data = updated;
        Ok(())
    }

    /// Persist the current document, replacing the file atomically.
    pub fn save(&self) -> Result<(), ConfigError> {
        let snapshot = self.snapshot();

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&snapshot).expect("config serializes");

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).map_err(|source| ConfigError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults_and_writes_them() {
        let dir = tempdir().unwrap();
        let handle = ConfigHandle::load(dir.path()).unwrap();
        assert_eq!(handle.hon_data().total_servers, 3);
        assert!(dir.path().join(DEFAULT_CONFIG_FILE).exists());
    }

    #[test]
    fn load_save_round_trips_every_field() {
        let dir = tempdir().unwrap();
        let handle = ConfigHandle::load(dir.path()).unwrap();

        let mut hon = handle.hon_data();
        hon.login = "operator".into();
        hon.install_directory = "/opt/game".into();
        hon.total_servers = 7;
        hon.enable_proxy = true;
        handle.set_hon_data(hon.clone());
        handle.save().unwrap();

        let reloaded = ConfigHandle::load(dir.path()).unwrap();
        assert_eq!(reloaded.snapshot(), handle.snapshot());
        assert_eq!(reloaded.hon_data(), hon);
    }

    #[test]
    fn partial_file_is_overlaid_on_defaults_and_completed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, r#"{"hon_data":{"svr_total":9}}"#).unwrap();

        let handle = ConfigHandle::load(dir.path()).unwrap();
        let hon = handle.hon_data();
        assert_eq!(hon.total_servers, 9);
        assert_eq!(hon.starting_game_port, DEFAULT_GAME_PORT);

        // Re-save made the missing default fields present in the file.
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("svr_starting_gamePort"));
        assert!(raw.contains("application_data"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(
            ConfigHandle::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn update_hon_field_by_json_key() {
        let handle = ConfigHandle::from_config(Config::default(), "unused.json");
        handle
            .update_hon_field("svr_total", serde_json::json!(12))
            .unwrap();
        assert_eq!(handle.hon_data().total_servers, 12);
    }

    #[test]
    fn first_run_detection() {
        let mut config = Config::default();
        assert!(config.is_first_run());
        config.hon_data.login = "operator".into();
        config.hon_data.install_directory = "/opt/game".into();
        assert!(!config.is_first_run());
    }
}
