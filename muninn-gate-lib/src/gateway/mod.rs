mod ingress;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::conv::ConvRegistry;
use crate::engine::{DatagramSink, EngineFactory, Listener};
use crate::error::Result;
use crate::executor::ExecutorPool;
use crate::handshake::WaiterTable;
use crate::timer::TimerWheel;

/// Minimum spare capacity reserved ahead of every receive.
const MIN_RECV_CHUNK: usize = 2048;

/// The server-side packet-processing core for one UDP socket.
///
/// Datagrams are handed in serially; the gateway strips any PROXY-v2
/// prefix, classifies the clean payload, runs the three-step handshake, and
/// feeds established sessions through their executors. Constructing a
/// gateway spawns its executor pool and timer wheel on the current tokio
/// runtime.
pub struct Gateway {
    config: Arc<Config>,
    sink: Arc<dyn DatagramSink>,
    registry: Arc<ConvRegistry>,
    waiters: WaiterTable,
    pool: ExecutorPool,
    wheel: TimerWheel,
    listener: Arc<dyn Listener>,
    factory: Arc<dyn EngineFactory>,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        sink: Arc<dyn DatagramSink>,
        listener: Arc<dyn Listener>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let pool = ExecutorPool::new(config.runtime.executors);
        let waiters = WaiterTable::new(config.runtime.handshake_backlog);
        Self {
            config,
            sink,
            registry: Arc::new(ConvRegistry::new()),
            waiters,
            pool,
            wheel: TimerWheel::new(),
            listener,
            factory,
        }
    }

    /// Active conversations.
    pub fn registry(&self) -> &Arc<ConvRegistry> {
        &self.registry
    }

    /// Handshakes waiting for their first data datagram.
    pub fn pending_handshakes(&self) -> usize {
        self.waiters.len()
    }

    /// The executor pool sessions are pinned to.
    pub fn executor_pool(&self) -> &ExecutorPool {
        &self.pool
    }

    /// Close every session non-forcefully and stop the executors. In-flight
    /// datagrams may be dropped.
    pub fn shutdown(&self) {
        for session in self.registry.sessions() {
            session.close(false);
        }
        self.pool.shutdown();
    }
}

/// Outbound path bound to the gateway's UDP socket.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
}

impl DatagramSink for UdpSink {
    fn send(&self, data: Bytes, to: SocketAddr) {
        if let Err(e) = self.socket.try_send_to(&data, to) {
            warn!(%to, error = %e, "failed to send datagram");
        }
    }
}

fn bind(config: &Config) -> Result<UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(config.listen),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    if let Some(bytes) = config.runtime.recv_buffer_bytes {
        socket.set_recv_buffer_size(bytes)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&config.listen.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Bind the configured socket and run the receive loop until SIGTERM or
/// SIGINT, then drain all sessions.
pub async fn run(
    config: Arc<Config>,
    listener: Arc<dyn Listener>,
    factory: Arc<dyn EngineFactory>,
) -> Result<()> {
    let socket = Arc::new(bind(&config)?);
    let local = socket.local_addr()?;
    let sink = Arc::new(UdpSink { socket: socket.clone() });
    let gateway = Gateway::new(config.clone(), sink, listener, factory);

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    info!(%local, "udp gateway listening");

    let mut buf = BytesMut::with_capacity(64 * 1024);
    loop {
        buf.reserve(config.transport.mtu.max(MIN_RECV_CHUNK));
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                break;
            }
            result = socket.recv_buf_from(&mut buf) => {
                let (len, sender) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "recv error");
                        continue;
                    }
                };
                if len > config.transport.mtu {
                    warn!(%sender, len, mtu = config.transport.mtu, "dropping oversized datagram");
                    buf.clear();
                    continue;
                }
                let datagram = buf.split().freeze();
                gateway.handle_datagram(datagram, sender, local);
            }
        }
    }

    info!(sessions = gateway.registry().len(), "draining sessions");
    gateway.shutdown();
    info!("udp gateway stopped");
    Ok(())
}
