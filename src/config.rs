//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: Default address, port and request bounds for the ESP32.
//!     - PollingConfig: How often a connected session polls the device.
//!     - RelayConfig: Collector endpoint and its request bound.
//!     - StorageConfig: Where the key-value blobs live.
//!     - NotificationsConfig: Which notification backend to use.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_COLLECTOR_URL: &str =
    "https://hook.us2.make.com/jz9d621l3omczycgisjqkrxl22vhch9g";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub device: DeviceConfig,
    pub polling: PollingConfig,
    pub relay: RelayConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub default_address: String,
    pub port: u16,
    pub fetch_timeout_ms: u64,
    pub reset_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_address: "192.168.1.108".to_string(),
            port: 80,
            fetch_timeout_ms: 5000,
            reset_timeout_ms: 3000,
        }
    }
}

impl DeviceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// connect to the remembered (or default) address on startup
    pub auto_connect: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            auto_connect: false,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COLLECTOR_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationBackend {
    #[default]
    Log,
    Command,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    pub backend: NotificationBackend,
    /// program run as `<command> <title> <body>` by the command backend
    pub command: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            backend: NotificationBackend::Log,
            command: "notify-send".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is set up, so it reports on stdout.
    /// an explicit path is tried first, then `config/monitor.toml` and
    /// `../config/monitor.toml`.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Self {
        let mut paths: Vec<PathBuf> = explicit.into_iter().collect();
        paths.push(PathBuf::from("config").join("monitor.toml"));
        paths.push(PathBuf::from("..").join("config").join("monitor.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          MONITOR CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Default device: {}", self.device.default_address);
        println!("│ Poll interval: {}ms", self.polling.interval_ms);
        println!("│ Collector: {}", self.relay.url);
        println!("│ Storage: {}", self.storage.dir.display());
        println!("│ Notifications: {:?}", self.notifications.backend);
        println!("│ Log level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_contract() {
        let config = MonitorConfig::default();
        assert_eq!(config.device.fetch_timeout(), Duration::from_millis(5000));
        assert_eq!(config.device.reset_timeout(), Duration::from_millis(3000));
        assert_eq!(config.relay.timeout(), Duration::from_millis(10_000));
        assert_eq!(config.polling.interval(), Duration::from_millis(5000));
        assert_eq!(config.device.port, 80);
        assert_eq!(config.notifications.backend, NotificationBackend::Log);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [polling]
            interval_ms = 1000

            [notifications]
            backend = "command"
            "#,
        )
        .unwrap();

        assert_eq!(config.polling.interval_ms, 1000);
        assert!(!config.polling.auto_connect);
        assert_eq!(config.notifications.backend, NotificationBackend::Command);
        assert_eq!(config.notifications.command, "notify-send");
        assert_eq!(config.relay.url, DEFAULT_COLLECTOR_URL);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[device]\ndefault_address = \"10.0.0.5\"\nport = 8080\n").unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.device.default_address, "10.0.0.5");
        assert_eq!(config.device.port, 8080);
        assert_eq!(config.device.fetch_timeout_ms, 5000);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[device\n").unwrap();

        assert!(MonitorConfig::load(&path).is_err());
    }
}
