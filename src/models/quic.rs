/*!
QUIC wire-format constants and the per-flow connection-id model
([RFC 9000]/[RFC 9001] plus the drafts still seen in captures).

[RFC 9000]: https://datatracker.ietf.org/doc/html/rfc9000
[RFC 9001]: https://datatracker.ietf.org/doc/html/rfc9001
*/
use bitflags::bitflags;

/// UDP ports over which QUIC runs.
pub const QUIC_PORT_1: u16 = 443;
pub const QUIC_PORT_2: u16 = 4433;

/// Unix timestamp for 2015-01-01, when QUIC was introduced; older flows are
/// never classified as QUIC.
pub const QUIC_TSTAMP_2015: u64 = 1_420_070_400;

/// A first Initial packet must fit in a single UDP packet.
pub const QUIC_MAX_INITIAL_PKT_LEN: usize = 1500;

pub const QUIC_V1: u32 = 0x0000_0001;
pub const QUIC_V2: u32 = 0x6b33_43cf;
pub const QUIC_VERSION_DRAFT_20: u32 = 0xff00_0014;
pub const QUIC_VERSION_DRAFT_34: u32 = 0xff00_0022;

/// Flag-byte accessors shared by the long and short header forms.
#[inline]
pub const fn quic_has_long_header(flags: u8) -> bool {
    flags & 0x80 != 0
}

#[inline]
pub const fn quic_fixed_bit(flags: u8) -> bool {
    flags & 0x40 != 0
}

/// Long-header packet type (2 bits).
#[inline]
pub const fn quic_pkt_type(flags: u8) -> u8 {
    (flags & 0x30) >> 4
}

/// Encrypted-then-unmasked packet number length minus one (2 bits).
#[inline]
pub const fn quic_pkt_num_len(flags: u8) -> u8 {
    flags & 0x03
}

/// Long-header packet types.
pub const QUIC_PKT_TYPE_INITIAL: u8 = 0;
pub const QUIC_PKT_TYPE_0RTT: u8 = 1;
pub const QUIC_PKT_TYPE_HANDSHAKE: u8 = 2;
pub const QUIC_PKT_TYPE_RETRY: u8 = 3;
pub const QUIC_NUM_PKT_TYPE: usize = 4;

pub const QUIC_PKT_TYPE_STR: [&str; QUIC_NUM_PKT_TYPE] =
    ["Initial", "0-RTT", "Handshake", "Retry"];

/// Frame types appearing in Initial payloads.
pub const QUIC_FT_PADDING: u8 = 0x00;
pub const QUIC_FT_PING: u8 = 0x01;
pub const QUIC_FT_ACK: u8 = 0x02;
pub const QUIC_FT_ACK_ECN: u8 = 0x03;
pub const QUIC_FT_RESET_STREAM: u8 = 0x04;
pub const QUIC_FT_STOP_SENDING: u8 = 0x05;
pub const QUIC_FT_CRYPTO: u8 = 0x06;
pub const QUIC_FT_NEW_TOKEN: u8 = 0x07;
pub const QUIC_FT_STREAM_8: u8 = 0x08;
pub const QUIC_FT_STREAM_F: u8 = 0x0f;
pub const QUIC_FT_MAX_DATA: u8 = 0x10;
pub const QUIC_FT_MAX_STREAM_DATA: u8 = 0x11;
pub const QUIC_FT_MAX_STREAMS_BI: u8 = 0x12;
pub const QUIC_FT_MAX_STREAMS_UNI: u8 = 0x13;
pub const QUIC_FT_DATA_BLOCKED: u8 = 0x14;
pub const QUIC_FT_STREAM_DATA_BLOCKED: u8 = 0x15;
pub const QUIC_FT_STREAMS_BLOCKED_BI: u8 = 0x16;
pub const QUIC_FT_STREAMS_BLOCKED_UNI: u8 = 0x17;
pub const QUIC_FT_NEW_CONNECTION_ID: u8 = 0x18;
pub const QUIC_FT_RETIRE_CONNECTION_ID: u8 = 0x19;
pub const QUIC_FT_PATH_CHALLENGE: u8 = 0x1a;
pub const QUIC_FT_PATH_RESPONSE: u8 = 0x1b;
pub const QUIC_FT_CONNECTION_CLOSE_TPT: u8 = 0x1c;
pub const QUIC_FT_CONNECTION_CLOSE_APP: u8 = 0x1d;

#[inline]
pub const fn quic_frame_is_stream(frame_type: u8) -> bool {
    frame_type >= QUIC_FT_STREAM_8 && frame_type <= QUIC_FT_STREAM_F
}

/// Offset field present in a STREAM frame.
#[inline]
pub const fn quic_stream_has_off(frame_type: u8) -> bool {
    frame_type & 0x04 != 0
}

/// Length field present in a STREAM frame.
#[inline]
pub const fn quic_stream_has_len(frame_type: u8) -> bool {
    frame_type & 0x02 != 0
}

bitflags! {
    /// Per-flow status bitset (`quicStat` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QuicStat: u8 {
        /// Flow is QUIC.
        const QUIC           = 0x01;
        /// Handshake packet type seen.
        const HANDSHAKE      = 0x02;
        /// Version negotiation (version is 0).
        const VERSION_NEGO   = 0x04;
        /// Version changed mid-flow.
        const VERSION_CHANGE = 0x08;
        /// Destination connection id changed.
        const DCID_CHANGE    = 0x10;
        /// Source connection id changed.
        const SCID_CHANGE    = 0x20;
        /// Original destination connection id changed.
        const ODCID_CHANGE   = 0x40;
        /// Snapped (bounded read failed).
        const SNAPPED        = 0x80;
    }
}

pub const QUIC_CID_BYTES_MAX: usize = 20;

/// A connection id, at most [`QUIC_CID_BYTES_MAX`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuicCid {
    bytes: [u8; QUIC_CID_BYTES_MAX],
    len: u8,
}

impl QuicCid {
    pub fn new(cid: &[u8]) -> QuicCid {
        let len = cid.len().min(QUIC_CID_BYTES_MAX);
        let mut bytes = [0u8; QUIC_CID_BYTES_MAX];
        bytes[..len].copy_from_slice(&cid[..len]);
        QuicCid { bytes, len: len as u8 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}
