//! Shared defaults for the server and its tests.

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7077";

/// Directory the server publishes its own nodes under.
pub const DEFAULT_ROOT: &str = "/server";

/// Heartbeat interval for the `tick` file.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
