use core::time::Duration;
use hello_stream_core::types::DEFAULT_PORT;

/// Settings for a [`Session`](super::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// gRPC endpoint of the streaming server, e.g. `http://localhost:6565`.
    pub server_addr: String,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a batch to reach the transport, and on the
    /// graceful half-close during a connection reset.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("http://localhost:{DEFAULT_PORT}"),
            connect_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
        }
    }
}
