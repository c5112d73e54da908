//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config <FILE>` (command line)
//! 2. `$SMTP2MQTT_CONFIG` (environment variable)
//! 3. `~/.config/smtp2mqtt/config.toml` (Linux/macOS)
//!    `%APPDATA%\smtp2mqtt\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Command-line flags are applied on top of whatever was loaded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// SMTP listener settings.
    pub smtp: SmtpConfig,
    /// MQTT broker connection.
    pub mqtt: MqttConfig,
    /// Topic and payload selection.
    pub routing: RoutingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
    /// Log decoded headers, bodies, and routing details.
    pub debug: bool,
}

/// SMTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Address and port to listen on.
    pub listen: String,
    /// Text of the 220 greeting.
    pub welcome: String,
    /// Name announced in the EHLO response.
    pub hostname: String,
    /// Only peers whose `ip:port` starts with this prefix may send.
    pub allow: Option<String>,
    /// Peers whose `ip:port` starts with this prefix are refused.
    pub deny: Option<String>,
    /// Largest accepted message in bytes (default: 10485760 = 10 MB).
    pub max_message_size: usize,
    /// Idle timeout for a session read, in seconds.
    pub read_timeout_secs: u64,
}

/// MQTT broker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL, e.g. `tcp://127.0.0.1:1883`.
    pub server: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// Keep one connection open instead of connecting per message.
    pub keep: bool,
    /// Publish QoS: 0, 1, or 2.
    pub qos: u8,
}

/// Topic and payload selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Prepended to every topic (e.g. `"smtp/"`).
    pub topic_prefix: String,
    /// Publish a JSON envelope instead of the plain-text body.
    pub json: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            debug: false,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:10025".to_string(),
            welcome: "MQTT-forwarder ESMTP ready.".to_string(),
            hostname: "localhost".to_string(),
            allow: None,
            deny: None,
            max_message_size: 10 * 1024 * 1024, // 10 MB
            read_timeout_secs: 300,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: "tcp://127.0.0.1:1883".to_string(),
            user: None,
            password: None,
            client_id: "smtp2mqtt".to_string(),
            keep: false,
            qos: 0,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit` or the standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config(explicit: Option<&Path>) -> Config {
    let path = explicit.map(Path::to_path_buf).or_else(config_file_path);
    if let Some(path) = path {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        } else if explicit.is_some() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("SMTP2MQTT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("smtp2mqtt").join("config.toml"))
}
