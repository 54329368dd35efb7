mod waiters;

pub use waiters::{Waiter, WaiterTable};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Control datagrams are exactly this long; anything else is data.
pub const CONTROL_LEN: usize = 20;

/// Client requests a conversation id.
pub const CODE_CONNECT: i32 = 0xFF;
/// Client tears its session down.
pub const CODE_DISCONNECT: i32 = 404;
/// Server answer to CONNECT, carrying the allocated conversation id.
pub const CODE_HANDSHAKE_RSP: i32 = 0x145;

const RSP_TRAILER: u32 = 0x1451_4545;

/// A decoded 20-byte control datagram.
///
/// Wire layout: code (i32 BE), two reserved words (u32 LE, discarded),
/// enet token (i32 BE), one reserved word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub code: i32,
    pub enet: i32,
}

/// Decode a control datagram. Returns `None` unless `buf` is exactly
/// [`CONTROL_LEN`] bytes.
pub fn decode(buf: &[u8]) -> Option<Control> {
    if buf.len() != CONTROL_LEN {
        return None;
    }
    let mut b = buf;
    let code = b.get_i32();
    let _ = b.get_u32_le();
    let _ = b.get_u32_le();
    let enet = b.get_i32();
    Some(Control { code, enet })
}

/// Encode the handshake response sent on CONNECT: the conversation id split
/// into its two big-endian words, the echoed enet token, and the fixed
/// trailer.
pub fn encode_response(conv: u64, enet: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(CONTROL_LEN);
    buf.put_i32(CODE_HANDSHAKE_RSP);
    buf.put_u32((conv >> 32) as u32);
    buf.put_u32(conv as u32);
    buf.put_i32(enet);
    buf.put_u32(RSP_TRAILER);
    buf.freeze()
}

/// Decode a handshake response into `(conv, enet)`. Counterpart of
/// [`encode_response`], used by clients and tests.
pub fn decode_response(buf: &[u8]) -> Option<(u64, i32)> {
    if buf.len() != CONTROL_LEN {
        return None;
    }
    let mut b = buf;
    if b.get_i32() != CODE_HANDSHAKE_RSP {
        return None;
    }
    let high = b.get_u32() as u64;
    let low = b.get_u32() as u64;
    let enet = b.get_i32();
    Some(((high << 32) | low, enet))
}
