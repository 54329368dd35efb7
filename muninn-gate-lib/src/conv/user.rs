use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use arc_swap::ArcSwap;

/// The peer identity of a session.
///
/// `origin` and `local` never change for the lifetime of the session. The
/// response endpoint tracks where outbound datagrams go: the socket-level
/// sender of the latest inbound datagram, which is the proxy when the
/// traffic is proxied. Only the session owner rewrites it.
pub struct User {
    response: ArcSwap<SocketAddr>,
    origin: SocketAddr,
    local: SocketAddr,
    attachment: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl User {
    pub fn new(response: SocketAddr, origin: SocketAddr, local: SocketAddr) -> Self {
        Self {
            response: ArcSwap::from_pointee(response),
            origin,
            local,
            attachment: RwLock::new(None),
        }
    }

    /// Where outbound datagrams are sent.
    pub fn response(&self) -> SocketAddr {
        **self.response.load()
    }

    pub(crate) fn set_response(&self, addr: SocketAddr) {
        self.response.store(Arc::new(addr));
    }

    /// The real client endpoint (from the PROXY header when proxied).
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    /// The server-side recipient address of the datagram.
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// Attach an opaque application value to this peer.
    pub fn set_attachment(&self, value: Arc<dyn Any + Send + Sync>) {
        let mut slot = self
            .attachment
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(value);
    }

    pub fn attachment(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attachment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("response", &self.response())
            .field("origin", &self.origin)
            .field("local", &self.local)
            .finish()
    }
}
