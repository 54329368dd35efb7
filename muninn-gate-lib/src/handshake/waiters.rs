use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ahash::RandomState;
use tracing::debug;

/// A half-open connection: a conversation id has been handed out on CONNECT
/// and the first data datagram has not arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub conv: u64,
    pub origin: SocketAddr,
}

/// Bounded FIFO of pending handshakes with O(1) lookup by conversation id
/// and by origin endpoint.
///
/// The table absorbs handshake retries without unbounded growth; once full,
/// the oldest entry is evicted to make room.
pub struct WaiterTable {
    inner: Mutex<Inner>,
    cap: usize,
}

struct Inner {
    fifo: VecDeque<Waiter>,
    by_conv: HashMap<u64, SocketAddr, RandomState>,
    by_origin: HashMap<SocketAddr, u64, RandomState>,
}

impl WaiterTable {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Mutex::new(Inner {
                fifo: VecDeque::with_capacity(cap),
                by_conv: HashMap::default(),
                by_origin: HashMap::default(),
            }),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn find_by_conv(&self, conv: u64) -> Option<Waiter> {
        let inner = self.lock();
        inner.by_conv.get(&conv).map(|&origin| Waiter { conv, origin })
    }

    pub fn find_by_origin(&self, origin: SocketAddr) -> Option<Waiter> {
        let inner = self.lock();
        inner.by_origin.get(&origin).map(|&conv| Waiter { conv, origin })
    }

    pub fn contains_conv(&self, conv: u64) -> bool {
        self.lock().by_conv.contains_key(&conv)
    }

    /// Insert a waiter, evicting the oldest entry first if the table is at
    /// capacity. An existing waiter for the same origin is replaced.
    pub fn append(&self, waiter: Waiter) {
        let mut inner = self.lock();
        if let Some(conv) = inner.by_origin.get(&waiter.origin).copied() {
            inner.unlink(Waiter { conv, origin: waiter.origin });
        }
        while inner.fifo.len() >= self.cap {
            if let Some(oldest) = inner.fifo.front().copied() {
                debug!(conv = oldest.conv, origin = %oldest.origin, "evicting oldest pending handshake");
                inner.unlink(oldest);
            }
        }
        inner.by_conv.insert(waiter.conv, waiter.origin);
        inner.by_origin.insert(waiter.origin, waiter.conv);
        inner.fifo.push_back(waiter);
    }

    /// Remove and return the waiter for `conv`, if pending.
    pub fn take_by_conv(&self, conv: u64) -> Option<Waiter> {
        let mut inner = self.lock();
        let origin = inner.by_conv.get(&conv).copied()?;
        let waiter = Waiter { conv, origin };
        inner.unlink(waiter);
        Some(waiter)
    }

    /// Remove a specific waiter. Removing an absent waiter is a no-op.
    pub fn remove(&self, waiter: Waiter) {
        let mut inner = self.lock();
        if inner.by_conv.get(&waiter.conv) == Some(&waiter.origin) {
            inner.unlink(waiter);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn unlink(&mut self, waiter: Waiter) {
        self.by_conv.remove(&waiter.conv);
        self.by_origin.remove(&waiter.origin);
        if let Some(pos) = self.fifo.iter().position(|w| *w == waiter) {
            self.fifo.remove(pos);
        }
    }
}
