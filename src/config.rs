//! Application configuration
//!
//! Loaded from TOML. Every field has a default matching the constants in
//! [`crate::constants`], so an empty or missing file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::{PcmFormat, SampleEncoding};

/// How the frame source pulls a chunk off the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// One blocking read-exact call per chunk
    #[default]
    ReadExact,
    /// Repeated reads into the same buffer until it is full
    Accumulate,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on
    pub bind_address: String,
    /// TCP port to listen on
    pub port: u16,
    /// Socket receive buffer size in bytes
    pub recv_buffer_bytes: usize,
    pub read_strategy: ReadStrategy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
            read_strategy: ReadStrategy::default(),
        }
    }
}

/// Audio output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default)
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
    /// Fixed hardware buffer size in frames (None = device default)
    pub hardware_buffer_frames: Option<u32>,
}

impl AudioConfig {
    /// The stream format these settings describe
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels, self.encoding)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            encoding: SampleEncoding::S16Le,
            hardware_buffer_frames: None,
        }
    }
}

/// Buffer pool and flow control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of buffers in the ring (N)
    pub buffers: usize,
    /// Bytes per network chunk
    pub frame_bytes: usize,
    /// Sleep between slot checks in microseconds (0 = spin)
    pub poll_interval_us: u64,
}

impl PoolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffers: DEFAULT_POOL_BUFFERS,
            frame_bytes: DEFAULT_FRAME_BYTES,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub pool: PoolConfig,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pcm-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists, or
    /// fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.buffers == 0 {
            return Err(Error::Config("pool.buffers must be at least 1".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".into()));
        }
        if self.audio.channels == 0 {
            return Err(Error::Config("audio.channels must be non-zero".into()));
        }

        let bytes_per_frame = self.audio.format().bytes_per_frame();
        if self.pool.frame_bytes == 0 || self.pool.frame_bytes % bytes_per_frame != 0 {
            return Err(Error::Config(format!(
                "pool.frame_bytes ({}) must be a non-zero multiple of {} bytes",
                self.pool.frame_bytes, bytes_per_frame
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = AppConfig::default();
        assert_eq!(config.network.port, 9999);
        assert_eq!(config.pool.buffers, 6);
        assert_eq!(config.pool.frame_bytes, 4096);
        assert_eq!(config.audio.sample_rate, 22050);
        assert_eq!(config.network.recv_buffer_bytes, 64 * 1024);
        assert_eq!(config.pool.poll_interval(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [pool]
            buffers = 3

            [network]
            read_strategy = "accumulate"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.buffers, 3);
        assert_eq!(config.pool.frame_bytes, 4096);
        assert_eq!(config.network.read_strategy, ReadStrategy::Accumulate);
        assert_eq!(config.audio.channels, 2);
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let mut config = AppConfig::default();
        config.pool.frame_bytes = 4098;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.pool.buffers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 1;
        config.pool.frame_bytes = 4098;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("pcm-relay-test-{}", std::process::id()))
            .join("config.toml");

        let mut config = AppConfig::default();
        config.audio.device = Some("Speakers".to_string());
        config.pool.poll_interval_us = 0;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.audio.device.as_deref(), Some("Speakers"));
        assert_eq!(loaded.pool.poll_interval_us, 0);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        let result = AppConfig::from_toml("[network]\nread_strategy = \"peek\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
