#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use muninn_gate_lib::config::LoggingConfig;
use muninn_gate_lib::handshake::{decode_response, CODE_CONNECT, CODE_DISCONNECT};
use muninn_gate_lib::proxy_protocol::SIGNATURE;
use muninn_gate_lib::{
    Config, DatagramSink, Gateway, GateError, Listener, PlainFactory, RuntimeConfig, Session,
    TransportConfig,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug)]
enum Event {
    Connected(u64, SocketAddr),
    Received(u64, Bytes),
    Closed(u64),
}

struct RecordingListener {
    tx: mpsc::UnboundedSender<Event>,
}

impl Listener for RecordingListener {
    fn on_connected(&self, session: &Arc<Session>) -> muninn_gate_lib::Result<()> {
        let _ = self
            .tx
            .send(Event::Connected(session.conv(), session.user().origin()));
        Ok(())
    }

    fn handle_receive(&self, session: &Arc<Session>, message: Bytes) {
        let _ = self.tx.send(Event::Received(session.conv(), message));
    }

    fn handle_exception(&self, _session: &Arc<Session>, _error: &GateError) {}

    fn handle_close(&self, session: &Arc<Session>) {
        let _ = self.tx.send(Event::Closed(session.conv()));
    }
}

struct RecordingSink {
    tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
}

impl DatagramSink for RecordingSink {
    fn send(&self, data: Bytes, to: SocketAddr) {
        let _ = self.tx.send((data, to));
    }
}

struct Harness {
    gateway: Gateway,
    outbound: mpsc::UnboundedReceiver<(Bytes, SocketAddr)>,
    events: mpsc::UnboundedReceiver<Event>,
}

fn make_config(transport: TransportConfig) -> Config {
    Config {
        listen: "127.0.0.1:0".parse().expect("addr"),
        transport,
        runtime: RuntimeConfig { executors: 2, ..RuntimeConfig::default() },
        logging: LoggingConfig::default(),
    }
}

fn harness(transport: TransportConfig) -> Harness {
    let (sink_tx, outbound) = mpsc::unbounded_channel();
    let (event_tx, events) = mpsc::unbounded_channel();
    let gateway = Gateway::new(
        Arc::new(make_config(transport)),
        Arc::new(RecordingSink { tx: sink_tx }),
        Arc::new(RecordingListener { tx: event_tx }),
        Arc::new(PlainFactory),
    );
    Harness { gateway, outbound, events }
}

fn local() -> SocketAddr {
    "127.0.0.1:22101".parse().expect("addr")
}

fn control(code: i32, enet: i32) -> Bytes {
    let mut b = BytesMut::with_capacity(20);
    b.put_i32(code);
    b.put_u32_le(0);
    b.put_u32_le(0);
    b.put_i32(enet);
    b.put_u32(0xFFFF_FFFF);
    b.freeze()
}

/// A base-variant data datagram: 28-byte KCP header plus `tail`.
fn data_datagram(conv: u64, sn: u32, tail: &[u8]) -> Bytes {
    let mut b = BytesMut::new();
    b.put_u64(conv);
    b.put_slice(&[0u8; 8]); // cmd, frg, wnd, ts
    b.put_u32_le(sn);
    b.put_slice(&[0u8; 8]); // una, len
    b.put_slice(tail);
    b.freeze()
}

/// Wrap `inner` in a PROXY-v2 INET4 header advertising `origin`.
fn proxied(origin: SocketAddr, inner: &[u8]) -> Bytes {
    let SocketAddr::V4(v4) = origin else {
        panic!("ipv4 test origin expected");
    };
    let mut b = BytesMut::new();
    b.put_slice(&SIGNATURE);
    b.put_u8(0x21); // version 2, command PROXY
    b.put_u8(0x12); // INET4, DGRAM
    b.put_u16(12);
    b.put_slice(&v4.ip().octets());
    b.put_slice(&[127, 0, 0, 1]);
    b.put_u16(v4.port());
    b.put_u16(22101);
    b.put_slice(inner);
    b.freeze()
}

async fn next_outbound(h: &mut Harness) -> (Bytes, SocketAddr) {
    timeout(Duration::from_secs(1), h.outbound.recv())
        .await
        .expect("outbound datagram in time")
        .expect("sink channel open")
}

async fn next_event(h: &mut Harness) -> Event {
    timeout(Duration::from_secs(1), h.events.recv())
        .await
        .expect("listener event in time")
        .expect("event channel open")
}

#[tokio::test]
async fn direct_handshake_allocates_a_conversation() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.1:40000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 7), client, local());

    let (rsp, to) = next_outbound(&mut h).await;
    assert_eq!(to, client);
    let (conv, enet) = decode_response(&rsp).ok_or("valid handshake response")?;
    assert_ne!(conv, 0);
    assert_eq!(enet, 7);
    assert_eq!(h.gateway.pending_handshakes(), 1);
    assert!(h.gateway.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_connect_reuses_the_pending_conversation() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.1:40001".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 1), client, local());
    h.gateway.handle_datagram(control(CODE_CONNECT, 1), client, local());

    let (first, _) = next_outbound(&mut h).await;
    let (second, _) = next_outbound(&mut h).await;
    let (conv_a, _) = decode_response(&first).ok_or("first response")?;
    let (conv_b, _) = decode_response(&second).ok_or("second response")?;
    assert_eq!(conv_a, conv_b);
    assert_eq!(h.gateway.pending_handshakes(), 1);
    Ok(())
}

#[tokio::test]
async fn proxied_handshake_routes_to_the_proxy() -> TestResult<()> {
    let mut h = harness(TransportConfig {
        proxy_protocol_v2: true,
        ..TransportConfig::default()
    });
    let proxy: SocketAddr = "203.0.113.100:37041".parse()?;
    let origin: SocketAddr = "198.51.100.161:58403".parse()?;

    let datagram = proxied(origin, &control(CODE_CONNECT, 9));
    assert_eq!(datagram.len(), 48);
    h.gateway.handle_datagram(datagram, proxy, local());

    let (rsp, to) = next_outbound(&mut h).await;
    assert_eq!(to, proxy);
    let (conv, enet) = decode_response(&rsp).ok_or("handshake response")?;
    assert_eq!(enet, 9);
    assert_eq!(h.gateway.pending_handshakes(), 1);

    // Completion: first data datagram with SN=0 promotes the waiter.
    let payload = data_datagram(conv, 0, b"hello");
    h.gateway
        .handle_datagram(proxied(origin, &payload), proxy, local());

    let session = h
        .gateway
        .registry()
        .get_by_endpoint(origin)
        .ok_or("session keyed by the real client endpoint")?;
    assert_eq!(session.conv(), conv);
    assert_eq!(session.user().origin(), origin);
    assert_eq!(session.user().response(), proxy);
    assert_eq!(h.gateway.pending_handshakes(), 0);

    match next_event(&mut h).await {
        Event::Connected(c, o) => {
            assert_eq!(c, conv);
            assert_eq!(o, origin);
        }
        other => panic!("expected Connected, got {other:?}"),
    }
    match next_event(&mut h).await {
        Event::Received(c, message) => {
            assert_eq!(c, conv);
            assert_eq!(message, payload);
        }
        other => panic!("expected Received, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn connected_fires_exactly_once() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.5:41000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 2), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;

    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"one"), client, local());
    h.gateway
        .handle_datagram(data_datagram(conv, 1, b"two"), client, local());

    assert!(matches!(next_event(&mut h).await, Event::Connected(..)));
    assert!(matches!(next_event(&mut h).await, Event::Received(..)));
    // Second datagram is data only, no second Connected.
    assert!(matches!(next_event(&mut h).await, Event::Received(..)));
    Ok(())
}

#[tokio::test]
async fn stale_data_changes_nothing() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.9:45000".parse()?;

    h.gateway.handle_datagram(
        data_datagram(0xDEAD_BEEF_CAFE_BABE, 0, b"stale"),
        client,
        local(),
    );

    assert!(h.gateway.registry().is_empty());
    assert_eq!(h.gateway.pending_handshakes(), 0);
    assert!(h.outbound.try_recv().is_err());
    assert!(h.events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn drop_paths_release_the_buffer() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.9:45002".parse()?;

    let stale = data_datagram(0xDEAD_BEEF_CAFE_BABE, 0, b"stale");
    h.gateway.handle_datagram(stale.clone(), client, local());
    assert!(stale.is_unique());

    let unknown = control(9999, 0);
    h.gateway.handle_datagram(unknown.clone(), client, local());
    assert!(unknown.is_unique());

    assert!(h.events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn truncated_datagram_without_session_is_dropped() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.9:45001".parse()?;

    h.gateway
        .handle_datagram(Bytes::from_static(b"\x01\x02\x03"), client, local());

    assert!(h.gateway.registry().is_empty());
    assert!(h.events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn nonzero_sequence_number_keeps_the_waiter() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.7:42000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 3), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;

    h.gateway
        .handle_datagram(data_datagram(conv, 1, b"early"), client, local());
    assert!(h.gateway.registry().is_empty());
    assert_eq!(h.gateway.pending_handshakes(), 1);

    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"first"), client, local());
    assert!(h.gateway.registry().get_by_endpoint(client).is_some());
    assert_eq!(h.gateway.pending_handshakes(), 0);
    Ok(())
}

#[tokio::test]
async fn fec_shifts_the_sequence_number_offset() -> TestResult<()> {
    let mut h = harness(TransportConfig {
        fec: Some(muninn_gate_lib::config::FecConfig::default()),
        ..TransportConfig::default()
    });
    let client: SocketAddr = "198.51.100.7:42001".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 3), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;

    // The default FEC prefix moves the SN read 8 bytes deeper, to offset 24.
    let mut wrong = BytesMut::new();
    wrong.put_u64(conv);
    wrong.put_slice(&[0u8; 8]);
    wrong.put_u32_le(0); // zero at the base offset 16
    wrong.put_u32_le(7);
    wrong.put_u32_le(7); // nonzero at the shifted offset 24
    h.gateway.handle_datagram(wrong.freeze(), client, local());
    assert!(h.gateway.registry().is_empty());
    assert_eq!(h.gateway.pending_handshakes(), 1);

    let mut right = BytesMut::new();
    right.put_u64(conv);
    right.put_slice(&[1u8; 16]);
    right.put_u32_le(0); // zero at the shifted offset 24
    h.gateway.handle_datagram(right.freeze(), client, local());
    assert!(h.gateway.registry().get_by_endpoint(client).is_some());
    Ok(())
}

#[tokio::test]
async fn disconnect_closes_the_session() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.3:43000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 5), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;
    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"hi"), client, local());
    assert!(h.gateway.registry().get_by_endpoint(client).is_some());

    h.gateway
        .handle_datagram(control(CODE_DISCONNECT, 0), client, local());
    assert!(h.gateway.registry().is_empty());

    loop {
        match next_event(&mut h).await {
            Event::Closed(c) => {
                assert_eq!(c, conv);
                break;
            }
            _ => continue,
        }
    }
    Ok(())
}

#[tokio::test]
async fn connect_while_connected_echoes_the_live_conversation() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.4:44000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 6), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;
    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"go"), client, local());

    h.gateway.handle_datagram(control(CODE_CONNECT, 6), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (echoed, _) = decode_response(&rsp).ok_or("response")?;
    assert_eq!(echoed, conv);
    assert_eq!(h.gateway.pending_handshakes(), 0);
    assert_eq!(h.gateway.registry().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_control_codes_are_ignored() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.4:44001".parse()?;

    h.gateway.handle_datagram(control(12345, 0), client, local());
    assert!(h.outbound.try_recv().is_err());
    assert_eq!(h.gateway.pending_handshakes(), 0);
    Ok(())
}

#[tokio::test]
async fn handshake_backlog_evicts_the_oldest() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());

    let mut convs = Vec::new();
    for i in 0..12u16 {
        let client = SocketAddr::from(([198, 51, 100, 10], 40000 + i));
        h.gateway.handle_datagram(control(CODE_CONNECT, 0), client, local());
        let (rsp, _) = next_outbound(&mut h).await;
        convs.push(decode_response(&rsp).ok_or("response")?.0);
        assert!(h.gateway.pending_handshakes() <= 10);
    }
    assert_eq!(h.gateway.pending_handshakes(), 10);

    // The first two handshakes were evicted; completing them now fails.
    let evicted_client = SocketAddr::from(([198, 51, 100, 10], 40000));
    h.gateway
        .handle_datagram(data_datagram(convs[0], 0, b"late"), evicted_client, local());
    assert!(h.gateway.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn conv_channel_follows_a_rebinding_peer() -> TestResult<()> {
    let mut h = harness(TransportConfig {
        conv_channel: true,
        ..TransportConfig::default()
    });
    let first: SocketAddr = "198.51.100.8:50000".parse()?;
    let rebound: SocketAddr = "198.51.100.8:50001".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 4), first, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;
    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"pre"), first, local());
    assert!(matches!(next_event(&mut h).await, Event::Connected(..)));
    assert!(matches!(next_event(&mut h).await, Event::Received(..)));

    // Same conversation id from a new source port.
    h.gateway
        .handle_datagram(data_datagram(conv, 5, b"post"), rebound, local());
    assert!(matches!(next_event(&mut h).await, Event::Received(..)));

    let session = h
        .gateway
        .registry()
        .get_by_conv(conv)
        .ok_or("session by conversation")?;
    assert_eq!(session.user().response(), rebound);
    assert_eq!(session.user().origin(), first);
    Ok(())
}

#[tokio::test]
async fn inactive_executor_closes_the_session_on_arrival() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());
    let client: SocketAddr = "198.51.100.6:46000".parse()?;

    h.gateway.handle_datagram(control(CODE_CONNECT, 8), client, local());
    let (rsp, _) = next_outbound(&mut h).await;
    let (conv, _) = decode_response(&rsp).ok_or("response")?;
    h.gateway
        .handle_datagram(data_datagram(conv, 0, b"up"), client, local());
    assert!(matches!(next_event(&mut h).await, Event::Connected(..)));
    assert!(matches!(next_event(&mut h).await, Event::Received(..)));

    h.gateway.executor_pool().shutdown();
    h.gateway
        .handle_datagram(data_datagram(conv, 9, b"in flight"), client, local());

    assert!(h.gateway.registry().is_empty());
    loop {
        match next_event(&mut h).await {
            Event::Closed(c) => {
                assert_eq!(c, conv);
                break;
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_every_session_once() -> TestResult<()> {
    let mut h = harness(TransportConfig::default());

    for i in 0..3u16 {
        let client = SocketAddr::from(([198, 51, 100, 20], 47000 + i));
        h.gateway.handle_datagram(control(CODE_CONNECT, 0), client, local());
        let (rsp, _) = next_outbound(&mut h).await;
        let (conv, _) = decode_response(&rsp).ok_or("response")?;
        h.gateway
            .handle_datagram(data_datagram(conv, 0, b"x"), client, local());
    }
    for _ in 0..3 {
        assert!(matches!(next_event(&mut h).await, Event::Connected(..)));
        assert!(matches!(next_event(&mut h).await, Event::Received(..)));
    }

    h.gateway.shutdown();
    assert!(h.gateway.registry().is_empty());

    let mut closed = 0;
    while closed < 3 {
        if let Event::Closed(_) = next_event(&mut h).await {
            closed += 1;
        }
    }
    // No duplicate close notifications.
    assert!(h.events.try_recv().is_err());
    Ok(())
}
