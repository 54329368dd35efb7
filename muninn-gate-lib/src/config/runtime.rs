use serde::Deserialize;

/// Runtime configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Number of session executors
    /// Each session is pinned to one executor for its lifetime; executors are
    /// handed out round-robin at handshake completion.
    /// Default: 4
    #[serde(default = "default_executors")]
    pub executors: usize,
    /// Pending-handshake backlog
    /// Half-open connections awaiting their first data datagram. When the
    /// backlog is full the oldest entry is evicted first.
    /// Default: 10
    #[serde(default = "default_handshake_backlog")]
    pub handshake_backlog: usize,
    /// Socket receive buffer size in bytes (optional)
    /// Applied with SO_RCVBUF before the socket enters the event loop.
    /// Default: None (kernel default)
    #[serde(default)]
    pub recv_buffer_bytes: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executors: default_executors(),
            handshake_backlog: default_handshake_backlog(),
            recv_buffer_bytes: None,
        }
    }
}

fn default_executors() -> usize {
    4
}

fn default_handshake_backlog() -> usize {
    10
}
