//! Configuration system for Tensorlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TENSORLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tensorlink/config.toml
//!   3. ~/.config/tensorlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::wire::{DEFAULT_PORT, MAX_CHUNK_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorlinkConfig {
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub datagram: DatagramConfig,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both transports bind to.
    pub bind_addr: String,
    /// TCP port (stream) or UDP port (datagram).
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// What to do with a frame whose size differs from the model input.
    pub on_size_mismatch: SizeMismatchPolicy,
    /// Whether to wait for another peer after a session ends.
    pub accept: AcceptMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatagramConfig {
    /// Maximum payload bytes per chunk. Larger chunks are dropped.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Input tensor shape, NCHW.
    pub input_shape: Vec<u32>,
    /// Bytes per element (4 for f32).
    pub element_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    /// One label per line. Unset = report bare class indices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Policy for a stream frame whose payload size is not the model input size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMismatchPolicy {
    /// Close the session after draining the frame.
    #[default]
    Terminate,
    /// Drain the frame, log it, and keep reading.
    Skip,
}

/// Stream listener behaviour once a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptMode {
    /// Serve one peer, then exit.
    #[default]
    Once,
    /// Accept the next peer after each session.
    Forever,
}

impl FromStr for SizeMismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminate" => Ok(Self::Terminate),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown size mismatch policy: {other}")),
        }
    }
}

impl FromStr for AcceptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "forever" => Ok(Self::Forever),
            other => Err(format!("unknown accept mode: {other}")),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            // ResNet-18 layer3 feature map
            input_shape: vec![1, 256, 7, 7],
            element_size: 4,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl ModelConfig {
    /// Byte length of one input tensor: shape × element size.
    pub fn expected_input_byte_length(&self) -> Result<u32, ConfigError> {
        if self.input_shape.len() != 4 {
            return Err(ConfigError::InvalidShape(format!(
                "expected 4 dimensions (NCHW), got {}",
                self.input_shape.len()
            )));
        }
        self.input_shape
            .iter()
            .try_fold(self.element_size, |acc, &dim| acc.checked_mul(dim))
            .filter(|&len| len > 0)
            .ok_or_else(|| {
                ConfigError::InvalidShape(format!(
                    "{:?} x {} bytes is empty or overflows u32",
                    self.input_shape, self.element_size
                ))
            })
    }

    /// Number of channels (the C in NCHW).
    pub fn channels(&self) -> u32 {
        self.input_shape.get(1).copied().unwrap_or(0)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tensorlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid model input shape: {0}")]
    InvalidShape(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TensorlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TensorlinkConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TENSORLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TensorlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TENSORLINK_* overrides. `lookup` is the environment in production.
    /// Values that fail to parse are ignored.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TENSORLINK_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("TENSORLINK_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(p) = lookup("TENSORLINK_STREAM__ON_SIZE_MISMATCH").and_then(|v| v.parse().ok())
        {
            self.stream.on_size_mismatch = p;
        }
        if let Some(m) = lookup("TENSORLINK_STREAM__ACCEPT").and_then(|v| v.parse().ok()) {
            self.stream.accept = m;
        }
        if let Some(n) = lookup("TENSORLINK_DATAGRAM__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.datagram.chunk_size = n;
        }
        if let Some(v) = lookup("TENSORLINK_LABELS__PATH") {
            self.labels.path = Some(PathBuf::from(v));
        }
    }
}
