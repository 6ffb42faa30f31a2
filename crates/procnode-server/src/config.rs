//! Server configuration.
//!
//! Loaded from a RON file; any field left out takes its default.
//!
//! ```ron
//! (
//!     listen: "127.0.0.1:7077",
//!     root: "/server",
//!     tick_interval_ms: 500,
//!     proc: (max_write_bytes: 1048576, overlap: Warn),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use procnode_kernel::config::{load_ron, ConfigError};
use procnode_kernel::ProcConfig;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_LISTEN, DEFAULT_ROOT, DEFAULT_TICK_INTERVAL_MS};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the line protocol listens on.
    pub listen: String,
    /// Directory the built-in nodes are published under.
    pub root: String,
    /// Heartbeat interval for `<root>/tick`. Zero disables the ticker.
    pub tick_interval_ms: u64,
    /// Router settings.
    pub proc: ProcConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            root: DEFAULT_ROOT.to_string(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            proc: ProcConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a RON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_ron(path)
    }

    /// Heartbeat interval, or `None` when disabled.
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }
}
