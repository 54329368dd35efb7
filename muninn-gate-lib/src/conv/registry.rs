use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::RandomState;
use rand::Rng;

use crate::handshake::{Waiter, WaiterTable};
use crate::session::Session;

/// The authoritative mapping of active conversations, indexed both by
/// conversation id and by origin endpoint.
///
/// The two indexes always agree: a session reachable through one key is
/// reachable through the other, and removal drops both entries atomically.
/// Conversation-id allocation is serialized under a dedicated lock so the
/// uniqueness check against the registry and the waiter table cannot race
/// with a concurrent handshake.
pub struct ConvRegistry {
    inner: RwLock<Indexes>,
    alloc: Mutex<()>,
}

struct Indexes {
    by_conv: HashMap<u64, Arc<Session>, RandomState>,
    by_endpoint: HashMap<SocketAddr, Arc<Session>, RandomState>,
}

impl ConvRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indexes {
                by_conv: HashMap::default(),
                by_endpoint: HashMap::default(),
            }),
            alloc: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<Session>> {
        self.read().by_endpoint.get(&endpoint).cloned()
    }

    pub fn get_by_conv(&self, conv: u64) -> Option<Arc<Session>> {
        self.read().by_conv.get(&conv).cloned()
    }

    pub fn contains_conv(&self, conv: u64) -> bool {
        self.read().by_conv.contains_key(&conv)
    }

    /// Draw a fresh conversation id and reserve it as a pending handshake
    /// for `origin`.
    ///
    /// The draw-check-insert sequence runs under the allocation lock, so an
    /// id can never be handed to two concurrent CONNECTs, and zero (the
    /// unassigned marker) is never produced.
    pub fn allocate(&self, waiters: &WaiterTable, origin: SocketAddr) -> u64 {
        let _serialized = self.alloc.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = rand::rng();
        loop {
            let conv: u64 = rng.random();
            if conv == 0 || self.contains_conv(conv) || waiters.contains_conv(conv) {
                continue;
            }
            waiters.append(Waiter { conv, origin });
            return conv;
        }
    }

    /// Consume the waiter for `conv` and install the session built from it,
    /// atomically with respect to allocation.
    ///
    /// Returns `None` when the waiter vanished in the meantime (evicted or
    /// promoted by an earlier datagram).
    pub(crate) fn promote(
        &self,
        waiters: &WaiterTable,
        conv: u64,
        make: impl FnOnce(Waiter) -> Arc<Session>,
    ) -> Option<Arc<Session>> {
        let _serialized = self.alloc.lock().unwrap_or_else(PoisonError::into_inner);
        let waiter = waiters.take_by_conv(conv)?;
        let session = make(waiter);
        self.insert(&session);
        Some(session)
    }

    /// Install both index entries for `session`.
    pub fn insert(&self, session: &Arc<Session>) {
        let mut indexes = self.write();
        indexes.by_conv.insert(session.conv(), session.clone());
        indexes
            .by_endpoint
            .insert(session.user().origin(), session.clone());
    }

    /// Drop both index entries for `session`. Entries that were already
    /// replaced by a newer session for the same key are left alone; removing
    /// an absent session is a no-op.
    pub fn remove(&self, session: &Arc<Session>) {
        let mut indexes = self.write();
        if indexes
            .by_conv
            .get(&session.conv())
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            indexes.by_conv.remove(&session.conv());
        }
        let origin = session.user().origin();
        if indexes
            .by_endpoint
            .get(&origin)
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            indexes.by_endpoint.remove(&origin);
        }
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.read().by_conv.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_conv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConvRegistry {
    fn default() -> Self {
        Self::new()
    }
}
