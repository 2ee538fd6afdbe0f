//! Fixed defaults shared by the server and client
//!
//! There is no configuration file and no application environment
//! variables. Binaries accept an optional address argument only.

use std::time::Duration;

/// Default listening / connecting port
pub const DEFAULT_PORT: u16 = 12345;

/// Default host the client dials and the server binds
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// A client read that waits longer than this yields "nothing arrived"
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between iterations of the client background loop
pub const CLIENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bounded wait for one incoming line
    pub read_timeout: Duration,
    /// Sleep between background loop iterations
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: CLIENT_READ_TIMEOUT,
            poll_interval: CLIENT_POLL_INTERVAL,
        }
    }
}

/// `host:port` string for the default server address
pub fn default_addr() -> String {
    format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)
}
