/*!
Flow and packet views handed to the analyzers by the capture runtime.
*/
use std::net::IpAddr;

use num_enum::{FromPrimitive, IntoPrimitive};

/// Dense nonnegative index assigned by the capture runtime; stable for the
/// lifetime of the flow. Analyzers key their per-flow state arrays on it.
pub type FlowIndex = usize;

/// L4 protocol numbers the analyzers care about.
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum L4Proto {
    Tcp = 6,
    Udp = 17,
    Sctp = 132,
    #[num_enum(catch_all)]
    Other(u8),
}

/// Which side of the bidirectional flow this unidirectional flow is.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum FlowDir {
    /// Initiator side (client).
    #[default]
    A,
    /// Responder side (server).
    B,
}

/// Read-only per-packet handle. Valid for one `on_layer4` call only.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    /// Captured L7 payload (possibly shorter than the on-wire payload).
    pub l7: &'a [u8],
    /// On-wire L7 length.
    pub l7_len: u16,
    /// Capture timestamp, seconds part.
    pub ts_secs: u64,
    /// Capture timestamp, microseconds part.
    pub ts_usecs: u32,
    pub l4_proto: L4Proto,
    /// False for non-first IP fragments; analyzers only process the first.
    pub first_fragment: bool,
    /// Running packet number assigned by the capture runtime.
    pub pkt_num: u64,
}

impl PacketView<'_> {
    /// Captured L7 length (snap length applied).
    #[inline]
    pub fn snap_l7_len(&self) -> u16 {
        self.l7.len() as u16
    }

    /// Capture timestamp as fractional seconds.
    #[inline]
    pub fn ts(&self) -> f64 {
        self.ts_secs as f64 + self.ts_usecs as f64 / 1e6
    }
}

/// Read-only flow handle: the five-tuple plus bookkeeping shared by every
/// analyzer.
#[derive(Debug, Clone)]
pub struct FlowView {
    pub findex: u64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub vlan: u16,
    pub l4_proto: L4Proto,
    /// First-seen timestamp, seconds part.
    pub first_seen_secs: u64,
    pub direction: FlowDir,
    /// Index of the reverse flow when the bidirectional peer exists.
    pub opposite: Option<FlowIndex>,
}

impl FlowView {
    #[inline]
    pub fn is_a(&self) -> bool {
        self.direction == FlowDir::A
    }

    #[inline]
    pub fn is_b(&self) -> bool {
        self.direction == FlowDir::B
    }
}
