//! Configuration system for the Skiff CLI.

use serde::{Deserialize, Serialize};
use skiff_core::NodeConfig;
use skiff_discovery::DeviceType;
use skiff_files::CHUNK_SIZE;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Skiff configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device configuration
    #[serde(default)]
    pub device: DeviceConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name. A `Device-xxxxx` name is generated when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Device type (`laptop` or `phone`)
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: String,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seconds a new connection may take to come up
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds a send waits for the peer to connect
    #[serde(default = "default_timeout_secs")]
    pub send_wait_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_device_type() -> String {
    DeviceType::Laptop.to_string()
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: None,
            device_type: default_device_type(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_timeout_secs(),
            send_wait_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("skiff/config.toml")
    }

    /// Load config from `path` if it exists, otherwise use defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.device_type()?;

        if let Some(name) = &self.device.name {
            if name.trim().is_empty() {
                anyhow::bail!("Device name must not be empty");
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > CHUNK_SIZE {
            anyhow::bail!("Chunk size must be between 1 and {} bytes", CHUNK_SIZE);
        }

        if self.transfer.connect_timeout_secs == 0 || self.transfer.send_wait_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be at least 1 second");
        }

        Ok(())
    }

    /// Parsed device type
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `laptop` or `phone`.
    pub fn device_type(&self) -> anyhow::Result<DeviceType> {
        self.device
            .device_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid device type: {}. Must be laptop or phone", self.device.device_type))
    }

    /// Build the node configuration for one device
    ///
    /// # Errors
    ///
    /// Returns an error if the device type is invalid.
    pub fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut node = NodeConfig {
            device_type: self.device_type()?,
            connect_timeout: Duration::from_secs(self.transfer.connect_timeout_secs),
            send_wait_timeout: Duration::from_secs(self.transfer.send_wait_timeout_secs),
            chunk_size: self.transfer.chunk_size,
            ..NodeConfig::default()
        };
        if let Some(name) = &self.device.name {
            node.device_name = name.clone();
        }
        Ok(node)
    }
}
