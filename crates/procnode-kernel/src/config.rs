//! Router configuration and RON loading.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default ceiling for one session's pending write buffer.
pub const DEFAULT_MAX_WRITE_BYTES: usize = 16 * 1024 * 1024;

/// Hard ceiling nodes enforce on a pending write buffer, whatever the
/// router's `max_write_bytes` says.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024 * 1024;

/// What the router does when more than one node claims a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Use the first-registered node and log a warning.
    #[default]
    Warn,
    /// Use the first-registered node silently.
    Ignore,
}

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcConfig {
    /// Writes that would grow a session's pending buffer past this fail
    /// with `TooLarge`. Values above [`MAX_PENDING_BYTES`] act as that.
    pub max_write_bytes: usize,
    /// Overlapping file claims.
    pub overlap: OverlapPolicy,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            max_write_bytes: DEFAULT_MAX_WRITE_BYTES,
            overlap: OverlapPolicy::default(),
        }
    }
}

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Parse a RON document into `T`.
pub fn from_ron_str<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    Ok(ron::from_str(text)?)
}

/// Read and parse a RON file into `T`.
pub fn load_ron<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let value = from_ron_str(&text)?;
    tracing::info!(path = %path.display(), "loaded config");
    Ok(value)
}
