use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::conv::User;
use crate::gateway::Gateway;
use crate::handshake::{self, Control};
use crate::proxy_protocol::{self, Stripped};
use crate::session::Session;
use crate::timer::TimerWheel;

/// Length of the conversation-id prefix on every data datagram.
const CONV_ID_LEN: usize = 8;

enum Lookup {
    Existing(Arc<Session>),
    Promoted(Arc<Session>),
    Drop,
}

impl Gateway {
    /// Process one inbound datagram.
    ///
    /// Called serially from the socket task; never blocks on user code. Any
    /// drop decision is local to this datagram, the loop keeps consuming.
    pub fn handle_datagram(&self, datagram: Bytes, sender: SocketAddr, recipient: SocketAddr) {
        let Stripped { payload, origin, proxied } = if self.config.transport.proxy_protocol_v2 {
            proxy_protocol::strip(&datagram, sender)
        } else {
            Stripped { payload: datagram, origin: sender, proxied: false }
        };
        trace!(%sender, %origin, proxied, len = payload.len(), "datagram received");

        let by_endpoint = self.registry.get_by_endpoint(origin);

        if payload.len() == handshake::CONTROL_LEN {
            if let Some(control) = handshake::decode(&payload) {
                self.handle_control(control, sender, origin, recipient, by_endpoint);
            }
            return;
        }

        if payload.len() < CONV_ID_LEN && by_endpoint.is_none() {
            warn!(%origin, len = payload.len(), "dropping truncated datagram without a session");
            return;
        }

        let (session, new_connection) =
            match self.lookup_data_session(&payload, origin, sender, recipient, by_endpoint) {
                Lookup::Existing(s) => (s, false),
                Lookup::Promoted(s) => (s, true),
                Lookup::Drop => return,
            };

        let executor = session.executor().clone();
        if !executor.is_active() {
            warn!(conv = session.conv(), "executor no longer active, closing session");
            session.close(false);
            return;
        }

        let job_session = session.clone();
        let submitted =
            executor.submit(move || job_session.deliver(payload, new_connection, sender));
        if let Err(e) = submitted {
            // The executor shut down between the active check and the
            // submit; the rejected task dropped its payload on the way out.
            error!(conv = session.conv(), error = %e, "executor rejected datagram, closing session");
            session.close(false);
        }
    }

    fn handle_control(
        &self,
        control: Control,
        sender: SocketAddr,
        origin: SocketAddr,
        recipient: SocketAddr,
        existing: Option<Arc<Session>>,
    ) {
        match control.code {
            handshake::CODE_CONNECT => {
                let conv = if let Some(waiter) = self.waiters.find_by_origin(origin) {
                    debug!(conv = waiter.conv, %origin, "handshake retry, reusing pending conversation");
                    waiter.conv
                } else if let Some(session) = &existing {
                    // A live session answers with its own conversation id;
                    // it is neither replaced nor torn down.
                    debug!(conv = session.conv(), %origin, "CONNECT while connected, echoing live conversation");
                    session.conv()
                } else {
                    let conv = self.registry.allocate(&self.waiters, origin);
                    debug!(conv, %origin, "pending handshake registered");
                    conv
                };
                let user = User::new(sender, origin, recipient);
                let response = self.factory.handshake_response(&user, control.enet, conv);
                self.sink.send(response, sender);
            }
            handshake::CODE_DISCONNECT => {
                if let Some(session) = existing {
                    info!(conv = session.conv(), %origin, "disconnect requested by peer");
                    session.close(false);
                }
            }
            code => trace!(code, %origin, "ignoring unrecognized control datagram"),
        }
    }

    fn lookup_data_session(
        &self,
        payload: &Bytes,
        origin: SocketAddr,
        sender: SocketAddr,
        recipient: SocketAddr,
        by_endpoint: Option<Arc<Session>>,
    ) -> Lookup {
        let session = if self.config.transport.conv_channel && payload.len() >= CONV_ID_LEN {
            self.registry.get_by_conv(read_conv(payload)).or(by_endpoint)
        } else {
            by_endpoint
        };
        match session {
            Some(session) => Lookup::Existing(session),
            None => self.promote(payload, origin, sender, recipient),
        }
    }

    /// Turn the first data datagram of a conversation into a live session.
    ///
    /// The datagram must carry a pending conversation id and a KCP sequence
    /// number of zero; anything else is dropped and, on a sequence-number
    /// mismatch, the waiter is kept for the retry.
    fn promote(
        &self,
        payload: &Bytes,
        origin: SocketAddr,
        sender: SocketAddr,
        recipient: SocketAddr,
    ) -> Lookup {
        let conv = read_conv(payload);
        if self.waiters.find_by_conv(conv).is_none() {
            warn!(conv, %origin, "dropping datagram for unknown conversation");
            return Lookup::Drop;
        }

        let sn_offset = self.config.transport.sn_offset();
        let Some(sn) = read_sn(payload, sn_offset) else {
            warn!(conv, %origin, len = payload.len(), "handshake datagram too short for its sequence number");
            return Lookup::Drop;
        };
        if sn != 0 {
            warn!(conv, sn, %origin, "first datagram must carry sequence number 0, keeping handshake pending");
            return Lookup::Drop;
        }

        let promoted = self.registry.promote(&self.waiters, conv, |_waiter| {
            let user = Arc::new(User::new(sender, origin, recipient));
            let engine = self
                .factory
                .create(&self.config.transport, self.sink.clone(), user.clone());
            Session::new(
                conv,
                user,
                self.pool.acquire(),
                engine,
                self.listener.clone(),
                Arc::downgrade(&self.registry),
            )
        });
        match promoted {
            Some(session) => {
                info!(conv, %origin, "conversation established");
                schedule_session_update(self.wheel.clone(), session.clone());
                Lookup::Promoted(session)
            }
            None => Lookup::Drop,
        }
    }
}

/// Re-arm the engine tick for `session` until it closes or its executor
/// goes away.
fn schedule_session_update(wheel: TimerWheel, session: Arc<Session>) {
    let delay = session.interval();
    let rearm = wheel.clone();
    wheel.schedule(delay, move || {
        if session.is_closed() {
            return;
        }
        let tick = session.clone();
        match session.executor().submit(move || tick.update()) {
            Ok(()) => schedule_session_update(rearm, session),
            Err(_) => session.close(false),
        }
    });
}

fn read_conv(payload: &Bytes) -> u64 {
    let mut conv = [0u8; CONV_ID_LEN];
    conv.copy_from_slice(&payload[..CONV_ID_LEN]);
    u64::from_be_bytes(conv)
}

fn read_sn(payload: &Bytes, offset: usize) -> Option<u32> {
    let bytes = payload.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
