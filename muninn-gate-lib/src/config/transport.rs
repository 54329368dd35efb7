use serde::Deserialize;

/// Wire-level transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Strip a PROXY-protocol-v2 prefix from inbound datagrams
    /// Enable when the gateway sits behind a UDP-capable proxy that prepends
    /// the real client endpoint. Responses are always routed to the socket
    /// sender (the proxy), never to the advertised origin.
    /// Default: false
    #[serde(default)]
    pub proxy_protocol_v2: bool,
    /// Prefer conversation-id lookup over endpoint lookup on the data path
    /// Lets a session survive a NAT rebind: the datagram is matched by the
    /// conversation id it carries and the response endpoint follows the new
    /// socket sender. Control datagrams always match by endpoint.
    /// Default: false
    #[serde(default)]
    pub conv_channel: bool,
    /// Verify the CRC32 integrity prefix on data datagrams
    /// Consumed by the session engine; does not move the sequence-number
    /// offset used during handshake promotion.
    /// Default: false
    #[serde(default)]
    pub crc32_check: bool,
    /// On-the-wire KCP header variant: "base" (28 bytes) or "hoyo" (32 bytes)
    /// Default: base
    #[serde(default)]
    pub header: HeaderVariant,
    /// Forward error correction (optional)
    /// When present, every data datagram carries an FEC prefix of
    /// `header_size + 2` bytes ahead of the KCP header.
    /// Default: None (FEC disabled)
    #[serde(default)]
    pub fec: Option<FecConfig>,
    /// Engine update tick in milliseconds
    /// Default: 40
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Maximum datagram size accepted from the socket
    /// Default: 1400
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy_protocol_v2: false,
            conv_channel: false,
            crc32_check: false,
            header: HeaderVariant::default(),
            fec: None,
            update_interval_ms: default_update_interval_ms(),
            mtu: default_mtu(),
        }
    }
}

impl TransportConfig {
    /// Byte offset of the little-endian KCP sequence number inside a clean
    /// data datagram, accounting for the configured FEC prefix.
    pub fn sn_offset(&self) -> usize {
        let fec = self.fec.as_ref().map(FecConfig::overhead).unwrap_or(0);
        self.header.sn_offset() + fec
    }
}

/// KCP header layout carried on the wire
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderVariant {
    /// 28-byte header: 64-bit conversation id followed by the standard
    /// KCP segment fields
    #[default]
    Base,
    /// 32-byte extended header with the extra 4-byte token word
    Hoyo,
}

impl HeaderVariant {
    pub fn size(self) -> usize {
        match self {
            HeaderVariant::Base => 28,
            HeaderVariant::Hoyo => 32,
        }
    }

    /// Offset of the segment sequence number within the header.
    pub fn sn_offset(self) -> usize {
        match self {
            HeaderVariant::Base => 16,
            HeaderVariant::Hoyo => 20,
        }
    }
}

/// Forward error correction configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FecConfig {
    /// Data shards per FEC group
    /// Default: 10
    #[serde(default = "default_data_shards")]
    pub data_shards: usize,
    /// Parity shards per FEC group
    /// Default: 3
    #[serde(default = "default_parity_shards")]
    pub parity_shards: usize,
    /// FEC header size in bytes (sequence id + flag word)
    /// Default: 6
    #[serde(default = "default_fec_header_size")]
    pub header_size: usize,
}

impl FecConfig {
    /// Bytes the FEC layer prepends to every datagram: its header plus the
    /// 2-byte payload size word.
    pub fn overhead(&self) -> usize {
        self.header_size + 2
    }
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            data_shards: default_data_shards(),
            parity_shards: default_parity_shards(),
            header_size: default_fec_header_size(),
        }
    }
}

fn default_update_interval_ms() -> u64 {
    40
}

fn default_mtu() -> usize {
    1400
}

fn default_data_shards() -> usize {
    10
}

fn default_parity_shards() -> usize {
    3
}

fn default_fec_header_size() -> usize {
    6
}
