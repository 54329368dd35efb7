use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::config::TransportConfig;
use crate::conv::User;
use crate::engine::{DatagramSink, EngineFactory, SessionEngine};
use crate::error::{GateError, Result};

/// A no-op reliability engine: every inbound datagram is one message, every
/// outbound message is one datagram sent immediately.
///
/// Useful for demos, loopback testing, and as the reference shape of an
/// engine implementation. There is no retransmission and no ordering beyond
/// what the network provides.
pub struct PlainEngine {
    conv: u64,
    interval: Duration,
    output: Arc<dyn DatagramSink>,
    user: Arc<User>,
    closed: bool,
}

impl SessionEngine for PlainEngine {
    fn set_conv(&mut self, conv: u64) {
        self.conv = conv;
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn input(&mut self, datagram: Bytes) -> Result<Vec<Bytes>> {
        if self.closed {
            return Err(GateError::Engine("input after close".to_string()));
        }
        Ok(vec![datagram])
    }

    fn send(&mut self, message: Bytes) -> Result<()> {
        if self.closed {
            return Err(GateError::Engine("send after close".to_string()));
        }
        self.output.send(message, self.user.response());
        Ok(())
    }

    fn update(&mut self, _now: Instant) -> Result<bool> {
        Ok(!self.closed)
    }

    fn close(&mut self, force: bool) {
        debug!(conv = self.conv, force, "plain engine closed");
        self.closed = true;
    }
}

/// Factory for [`PlainEngine`] sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFactory;

impl EngineFactory for PlainFactory {
    fn create(
        &self,
        config: &TransportConfig,
        output: Arc<dyn DatagramSink>,
        user: Arc<User>,
    ) -> Box<dyn SessionEngine> {
        Box::new(PlainEngine {
            conv: 0,
            interval: Duration::from_millis(config.update_interval_ms),
            output,
            user,
            closed: false,
        })
    }
}
