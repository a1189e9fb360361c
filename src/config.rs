//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration (socket endpoint and push stream)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_push_heartbeat_interval")]
    pub push_heartbeat_interval_ms: u64,

    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_connections() -> usize {
    1000
}

fn default_push_heartbeat_interval() -> u64 {
    30_000
}

fn default_push_buffer() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            push_heartbeat_interval_ms: default_push_heartbeat_interval(),
            push_buffer: default_push_buffer(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Falls back to the default when set to zero in code
    pub fn push_heartbeat_interval(&self) -> Duration {
        non_zero_millis(self.push_heartbeat_interval_ms, default_push_heartbeat_interval())
    }
}

/// Token verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Reject connections that do not present a known token
    #[serde(default = "default_auth_required")]
    pub required: bool,

    /// Session token → user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_auth_required() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: default_auth_required(),
            tokens: HashMap::new(),
        }
    }
}

/// Real-time client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_url")]
    pub url: String,

    /// Reconnect automatically after transport loss
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Multiplier applied per reconnect attempt
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: f64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Grace window for traffic after a ping
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Transport open plus `connected` envelope
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Log every frame at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_client_url() -> String {
    "ws://localhost:8090/ws".to_string()
}

fn default_reconnect() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    3000
}

fn default_reconnect_backoff() -> f64 {
    1.5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_heartbeat_timeout() -> u64 {
    10_000
}

fn default_handshake_timeout() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            reconnect: default_reconnect(),
            reconnect_interval_ms: default_reconnect_interval(),
            reconnect_backoff: default_reconnect_backoff(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Create config pointing at a custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        non_zero_millis(self.heartbeat_interval_ms, default_heartbeat_interval())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        non_zero_millis(self.heartbeat_timeout_ms, default_heartbeat_timeout())
    }

    pub fn handshake_timeout(&self) -> Duration {
        non_zero_millis(self.handshake_timeout_ms, default_handshake_timeout())
    }
}

/// Zero would spin timers; treat it as unset
fn non_zero_millis(ms: u64, default: u64) -> Duration {
    Duration::from_millis(if ms == 0 { default } else { ms })
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
    pub fn init(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("switchboard={},tower_http=info", self.level).into()
        });

        let registry = tracing_subscriber::registry().with(filter);
        if self.format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("server.push_heartbeat_interval_ms", self.server.push_heartbeat_interval_ms),
            ("client.heartbeat_interval_ms", self.client.heartbeat_interval_ms),
            ("client.heartbeat_timeout_ms", self.client.heartbeat_timeout_ms),
            ("client.handshake_timeout_ms", self.client.handshake_timeout_ms),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.server.push_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "server.push_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("switchboard").join("config.toml")),
            Some(PathBuf::from("/etc/switchboard/config.toml")),
            Some(PathBuf::from("./switchboard.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SWITCHBOARD_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SWITCHBOARD_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("SWITCHBOARD_URL") {
            self.client.url = url;
        }
        if let Ok(token) = std::env::var("SWITCHBOARD_TOKEN") {
            if let Ok(user) = std::env::var("SWITCHBOARD_TOKEN_USER") {
                self.auth.tokens.insert(token, user);
            }
        }

        if let Ok(level) = std::env::var("SWITCHBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SWITCHBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Switchboard Configuration
#
# Environment variables override these settings:
# - SWITCHBOARD_HOST
# - SWITCHBOARD_PORT
# - SWITCHBOARD_URL
# - SWITCHBOARD_TOKEN / SWITCHBOARD_TOKEN_USER
# - SWITCHBOARD_LOG_LEVEL
# - SWITCHBOARD_LOG_FORMAT

[server]
host = "0.0.0.0"
port = 8090

# Maximum concurrent socket connections
max_connections = 1000

# Interval between HEARTBEAT events on the push stream (ms)
push_heartbeat_interval_ms = 30000

# Events buffered per push stream before back-pressure
push_buffer = 64

[auth]
# Reject sockets and push streams without a known token
required = true

# Session token -> user id
[auth.tokens]
# "change-me" = "admin"

[client]
url = "ws://localhost:8090/ws"
reconnect = true
reconnect_interval_ms = 3000
reconnect_backoff = 1.5
max_reconnect_attempts = 5
max_reconnect_delay_ms = 30000
heartbeat_interval_ms = 30000
heartbeat_timeout_ms = 10000
handshake_timeout_ms = 10000
debug = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
