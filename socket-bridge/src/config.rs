//! Tunable parameters shared by every socket a [`crate::network::Network`]
//! creates.

use std::time::Duration;

/// Default send-credit capacity per socket.
pub const DEFAULT_MAX_SEND_CREDIT: usize = 65_536;

/// Default number of closed-socket call ids remembered at once.
pub const DEFAULT_MAX_RETIRED_CALLS: usize = 4096;

/// Adjustable socket-layer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Initial and maximum send credit, in bytes.
    pub max_send_credit: usize,
    /// Pushed to every new stream socket as `ConnectionTimeout` when set.
    /// Enforcement is up to the transport.
    pub connection_timeout: Option<Duration>,
    /// Pushed to every new stream socket as `ShutdownTimeout` when set.
    pub shutdown_timeout: Option<Duration>,
    /// How many call ids left outstanding by `close()` are remembered so
    /// their late completions can be dropped.  Beyond this the oldest are
    /// forgotten and a completion for one of them is reported as unknown.
    pub max_retired_calls: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_send_credit: DEFAULT_MAX_SEND_CREDIT,
            connection_timeout: None,
            shutdown_timeout: None,
            max_retired_calls: DEFAULT_MAX_RETIRED_CALLS,
        }
    }
}

impl SocketConfig {
    pub fn with_max_send_credit(mut self, max: usize) -> Self {
        self.max_send_credit = max;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn with_max_retired_calls(mut self, max: usize) -> Self {
        self.max_retired_calls = max;
        self
    }
}
