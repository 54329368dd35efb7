use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

// https://github.com/haproxy/haproxy/blob/master/doc/proxy-protocol.txt

/// Fixed 12-byte PROXY protocol v2 signature.
pub const SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

const VERSION: u8 = 0x2;
const CMD_LOCAL: u8 = 0x0;
const CMD_PROXY: u8 = 0x1;
const FAMILY_INET4: u8 = 0x1;
const FAMILY_INET6: u8 = 0x2;

#[derive(Debug, Error)]
enum HeaderError {
    #[error("truncated header ({len} bytes)")]
    Truncated { len: usize },
    #[error("unsupported version {0:#x}")]
    Version(u8),
    #[error("unsupported command {0:#x}")]
    Command(u8),
}

/// Outcome of stripping a datagram.
///
/// `payload` is a slice over the same backing memory as the input; holding it
/// keeps the original allocation alive. The input itself is never modified.
#[derive(Debug, Clone)]
pub struct Stripped {
    pub payload: Bytes,
    pub origin: SocketAddr,
    pub proxied: bool,
}

impl Stripped {
    fn passthrough(buf: &Bytes, fallback: SocketAddr) -> Self {
        Self { payload: buf.clone(), origin: fallback, proxied: false }
    }
}

/// Strip a PROXY-v2 prefix from `buf`, if one is present.
///
/// Datagrams that do not start with the v2 signature pass through untouched
/// with `fallback` as the origin. A signature match followed by a malformed
/// header is logged and also passes through; nothing in this path fails the
/// caller.
pub fn strip(buf: &Bytes, fallback: SocketAddr) -> Stripped {
    if buf.len() < SIGNATURE.len() || buf[..SIGNATURE.len()] != SIGNATURE {
        return Stripped::passthrough(buf, fallback);
    }

    match parse(buf, fallback) {
        Ok(stripped) => stripped,
        Err(e) => {
            warn!(%fallback, error = %e, "malformed PROXY v2 header, treating as unproxied");
            Stripped::passthrough(buf, fallback)
        }
    }
}

fn parse(buf: &Bytes, fallback: SocketAddr) -> Result<Stripped, HeaderError> {
    if buf.len() < 16 {
        return Err(HeaderError::Truncated { len: buf.len() });
    }

    let ver_cmd = buf[12];
    let version = ver_cmd >> 4;
    let command = ver_cmd & 0x0F;
    if version != VERSION {
        return Err(HeaderError::Version(version));
    }
    if command != CMD_LOCAL && command != CMD_PROXY {
        return Err(HeaderError::Command(command));
    }

    let family = buf[13] >> 4;
    let addr_len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let header_len = 16 + addr_len;
    if buf.len() < header_len {
        return Err(HeaderError::Truncated { len: buf.len() });
    }

    let payload = buf.slice(header_len..);

    if command == CMD_LOCAL {
        return Ok(Stripped { payload, origin: fallback, proxied: false });
    }

    let addr = &buf[16..header_len];
    let origin = match family {
        FAMILY_INET4 if addr_len >= 12 => Some(parse_inet4(addr)),
        FAMILY_INET6 if addr_len >= 36 => Some(parse_inet6(addr)),
        // UNSPEC, UNIX, or an address block too short for the family: the
        // header is still consumed but the sender stays the fallback.
        _ => None,
    };

    match origin {
        Some(origin) => Ok(Stripped { payload, origin, proxied: true }),
        None => Ok(Stripped { payload, origin: fallback, proxied: false }),
    }
}

fn parse_inet4(addr: &[u8]) -> SocketAddr {
    let src = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
    let port = u16::from_be_bytes([addr[8], addr[9]]);
    SocketAddr::new(IpAddr::V4(src), port)
}

fn parse_inet6(addr: &[u8]) -> SocketAddr {
    let mut src = [0u8; 16];
    src.copy_from_slice(&addr[..16]);
    let port = u16::from_be_bytes([addr[32], addr[33]]);
    SocketAddr::new(IpAddr::V6(Ipv6Addr::from(src)), port)
}
