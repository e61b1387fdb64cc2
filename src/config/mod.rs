//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Path of the WebSocket endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5051
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            ws_path: default_ws_path(),
        }
    }
}

/// Chat hub behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Largest accepted WebSocket message, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Frames queued per connection before new ones are dropped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Longer user names are truncated
    #[serde(default = "default_max_username_length")]
    pub max_username_length: usize,
    /// Bearer token required by the announcement endpoint (open when unset)
    #[serde(default)]
    pub announce_token: Option<String>,
}

fn default_max_message_bytes() -> usize {
    4096
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_max_username_length() -> usize {
    32
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            outbound_buffer: default_outbound_buffer(),
            max_username_length: default_max_username_length(),
            announce_token: None,
        }
    }
}

/// Per-IP limit on WebSocket handshakes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_connections_per_second")]
    pub connections_per_second: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_connections_per_second() -> u32 {
    5
}

fn default_burst_size() -> u32 {
    20
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            connections_per_second: default_connections_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "chathub")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

impl std::str::FromStr for LogTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" => Ok(LogTarget::Console),
            "file" => Ok(LogTarget::File),
            "both" => Ok(LogTarget::Both),
            _ => Err(format!("Invalid log target: {}", s)),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/chathub")
}

fn default_log_prefix() -> String {
    "chathub".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with CHATHUB_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("CHATHUB_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/chathub/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("chathub/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("CHATHUB_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("CHATHUB_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(workers) = std::env::var("CHATHUB_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.server.workers = w;
            }
        }

        // Chat overrides
        if let Ok(max) = std::env::var("CHATHUB_MAX_MESSAGE_BYTES") {
            if let Ok(m) = max.parse() {
                self.chat.max_message_bytes = m;
            }
        }
        if let Ok(token) = std::env::var("CHATHUB_ANNOUNCE_TOKEN") {
            self.chat.announce_token = Some(token).filter(|t| !t.is_empty());
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CHATHUB_LOG_FORMAT") {
            self.logging.format = format.parse().unwrap_or_default();
        }
        if let Ok(target) = std::env::var("CHATHUB_LOG_TARGET") {
            self.logging.target = target.parse().unwrap_or_default();
        }
        if let Ok(dir) = std::env::var("CHATHUB_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.server.workers == 0 {
            anyhow::bail!("Server workers must be at least 1");
        }

        if !self.server.ws_path.starts_with('/') {
            anyhow::bail!(
                "WebSocket path must start with '/': {}",
                self.server.ws_path
            );
        }

        if self.chat.max_message_bytes < 64 {
            anyhow::bail!("chat.max_message_bytes must be at least 64");
        }

        if self.chat.outbound_buffer == 0 {
            anyhow::bail!("chat.outbound_buffer must be at least 1");
        }

        if self.chat.max_username_length == 0 {
            anyhow::bail!("chat.max_username_length must be at least 1");
        }

        if self.rate_limit.enabled
            && (self.rate_limit.connections_per_second == 0 || self.rate_limit.burst_size == 0)
        {
            anyhow::bail!("Rate limit values must be greater than 0 when enabled");
        }

        Ok(())
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).context("Failed to serialize configuration")
    }
}
