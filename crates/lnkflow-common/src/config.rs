//! Configuration for lnkflow

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Notification (SMTP) configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (PostgreSQL)
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Rule engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between sweep ticks
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum rules executed concurrently within one sweep tick
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Per-action dispatch timeout in milliseconds
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,

    /// Secret used to sign outgoing webhook payloads
    pub webhook_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            sweep_concurrency: default_sweep_concurrency(),
            action_timeout_ms: default_action_timeout(),
            webhook_secret: None,
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_sweep_concurrency() -> usize {
    10
}

fn default_action_timeout() -> u64 {
    5000
}

/// SMTP notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Enable email notifications
    #[serde(default)]
    pub enabled: bool,

    /// SMTP relay host
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    /// From address for notification mail
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: default_from_address(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "automation@lnkflow.local".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/lnkflow/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_address, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let engine = EngineConfig::default();
        assert_eq!(engine.sweep_interval_secs, 60);
        assert_eq!(engine.sweep_concurrency, 10);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090

[database]
url = "postgres://localhost/lnkflow"

[engine]
sweep_interval_secs = 30
webhook_secret = "s3cret"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.engine.sweep_interval_secs, 30);
        assert_eq!(config.engine.webhook_secret.as_deref(), Some("s3cret"));
        assert!(!config.notifications.enabled);
    }
}
