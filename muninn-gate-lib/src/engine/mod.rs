pub mod plain;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::warn;

use crate::config::TransportConfig;
use crate::conv::User;
use crate::error::{GateError, Result};
use crate::handshake;
use crate::session::Session;

/// Outbound datagram transmission, shared by every session on a socket.
pub trait DatagramSink: Send + Sync + 'static {
    fn send(&self, data: Bytes, to: SocketAddr);
}

/// The per-conversation reliability engine.
///
/// The gateway drives one engine per session from the session's executor, so
/// implementations never see concurrent calls. `input` takes ownership of
/// the clean datagram and returns the application messages it completed;
/// outbound segments and retransmissions leave through the sink given to the
/// factory at creation time.
pub trait SessionEngine: Send + 'static {
    /// Bind the allocated conversation id. Called once, before any input.
    fn set_conv(&mut self, conv: u64);

    /// Tick spacing for [`SessionEngine::update`].
    fn interval(&self) -> Duration;

    /// Feed one inbound datagram. Returns the reassembled messages ready
    /// for delivery, possibly none.
    fn input(&mut self, datagram: Bytes) -> Result<Vec<Bytes>>;

    /// Queue one application message for reliable delivery to the peer.
    fn send(&mut self, message: Bytes) -> Result<()>;

    /// Periodic tick: flush pending segments, retransmit, process timers.
    /// Returns `false` once the engine has terminated the conversation.
    fn update(&mut self, now: Instant) -> Result<bool>;

    /// Stop the conversation. A forceful close drops unsent data.
    fn close(&mut self, force: bool);
}

/// Builds engines for freshly promoted sessions and encodes the handshake
/// response sent on CONNECT.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(
        &self,
        config: &TransportConfig,
        output: Arc<dyn DatagramSink>,
        user: Arc<User>,
    ) -> Box<dyn SessionEngine>;

    /// Body of the handshake-response datagram for `conv`, echoing `enet`.
    fn handshake_response(&self, user: &User, enet: i32, conv: u64) -> Bytes {
        let _ = user;
        handshake::encode_response(conv, enet)
    }
}

/// Application callbacks, invoked from the session's executor.
pub trait Listener: Send + Sync + 'static {
    /// A session completed its handshake. Runs strictly before the first
    /// [`Listener::handle_receive`] for that session.
    fn on_connected(&self, session: &Arc<Session>) -> Result<()> {
        let _ = session;
        Ok(())
    }

    /// One reassembled application message.
    fn handle_receive(&self, session: &Arc<Session>, message: Bytes);

    /// An error surfaced on the session path; the session stays usable
    /// unless it is closed separately.
    fn handle_exception(&self, session: &Arc<Session>, error: &GateError) {
        warn!(conv = session.conv(), error = %error, "session exception");
    }

    /// The session left the registry and will receive no further callbacks.
    fn handle_close(&self, session: &Arc<Session>) {
        let _ = session;
    }
}
