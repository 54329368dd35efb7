use serde::Deserialize;
use std::net::SocketAddr;

use super::runtime::RuntimeConfig;
use super::telemetry::LoggingConfig;
use super::transport::TransportConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port the UDP socket binds to
    /// Example: "0.0.0.0:22101" or "127.0.0.1:20041"
    pub listen: SocketAddr,
    /// Wire-level transport settings (header variant, FEC, PROXY stripping)
    #[serde(default)]
    pub transport: TransportConfig,
    /// Runtime settings (executor pool, handshake backlog, socket buffers)
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}
