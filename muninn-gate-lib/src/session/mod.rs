use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::conv::{ConvRegistry, User};
use crate::engine::{Listener, SessionEngine};
use crate::error::Result;
use crate::executor::Executor;

/// One active conversation.
///
/// A session owns its [`User`] and its engine, and is pinned to one executor
/// for its whole lifetime; every engine call and every listener callback
/// happens on that executor. The registry reaches the session through both
/// of its keys, the session reaches back through a weak handle only, so
/// teardown from either side stays cycle-free.
pub struct Session {
    conv: u64,
    user: Arc<User>,
    interval: Duration,
    executor: Executor,
    engine: Mutex<Box<dyn SessionEngine>>,
    closed: AtomicBool,
    listener: Arc<dyn Listener>,
    registry: Weak<ConvRegistry>,
}

impl Session {
    pub(crate) fn new(
        conv: u64,
        user: Arc<User>,
        executor: Executor,
        mut engine: Box<dyn SessionEngine>,
        listener: Arc<dyn Listener>,
        registry: Weak<ConvRegistry>,
    ) -> Arc<Self> {
        engine.set_conv(conv);
        let interval = engine.interval();
        Arc::new(Self {
            conv,
            user,
            interval,
            executor,
            engine: Mutex::new(engine),
            closed: AtomicBool::new(false),
            listener,
            registry,
        })
    }

    fn engine(&self) -> MutexGuard<'_, Box<dyn SessionEngine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn conv(&self) -> u64 {
        self.conv
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Executor-side entry point for one inbound datagram.
    ///
    /// For a freshly promoted session `on_connected` runs first; a failure
    /// there is reported but never swallows the datagram that completed the
    /// handshake. The response endpoint follows the socket sender of the
    /// latest datagram.
    pub(crate) fn deliver(self: &Arc<Self>, payload: Bytes, new_connection: bool, sender: SocketAddr) {
        if self.is_closed() {
            return;
        }
        if self.user.response() != sender {
            self.user.set_response(sender);
        }
        if new_connection {
            if let Err(e) = self.listener.on_connected(self) {
                self.listener.handle_exception(self, &e);
            }
        }
        if let Err(e) = self.ingest(payload) {
            self.listener.handle_exception(self, &e);
        }
    }

    fn ingest(self: &Arc<Self>, payload: Bytes) -> Result<()> {
        let messages = self.engine().input(payload)?;
        for message in messages {
            self.listener.handle_receive(self, message);
        }
        Ok(())
    }

    /// Queue one application message for reliable delivery.
    pub fn send(self: &Arc<Self>, message: Bytes) -> Result<()> {
        self.engine().send(message)
    }

    /// Periodic engine tick, scheduled on the timer wheel.
    pub(crate) fn update(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let result = self.engine().update(Instant::now());
        match result {
            Ok(true) => {}
            Ok(false) => self.close(false),
            Err(e) => self.listener.handle_exception(self, &e),
        }
    }

    /// Tear the session down: stop the engine, drop both registry entries,
    /// notify the listener. Subsequent calls are no-ops.
    pub fn close(self: &Arc<Self>, force: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(conv = self.conv, origin = %self.user.origin(), force, "closing session");
        self.engine().close(force);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
        self.listener.handle_close(self);
    }
}
