/*!
BGP-4 protocol constants and per-flow data model ([RFC 4271]).

[RFC 4271]: https://datatracker.ietf.org/doc/html/rfc4271
*/
use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};

pub const BGP_PORT: u16 = 179;
/// AS_TRANS, the 16-bit placeholder for a 4-octet AS number (RFC 6793).
pub const BGP_AS_TRANS: u32 = 23456;
/// Fixed header length: 16-byte marker + 2-byte length + 1-byte type.
pub const BGP_HDR_LEN: usize = 19;
pub const BGP_MAX_LEN: u16 = 4096;
pub const BGP_MARKER: [u8; 16] = [0xff; 16];

/// Capacity of the per-update workspace arrays (withdrawn, NLRI, AS path,
/// cluster list, communities). Overflow sets `BgpStat::AFULL`.
pub const BGP_ASIZE: usize = 512;

/// BGP message types.
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[repr(u8)]
pub enum BgpMessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    KeepAlive = 4,
    /// RFC 2918
    RouteRefresh = 5,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl BgpMessageType {
    /// Index into the per-type counter arrays.
    pub const fn index(self) -> usize {
        match self {
            BgpMessageType::Open => 1,
            BgpMessageType::Update => 2,
            BgpMessageType::Notification => 3,
            BgpMessageType::KeepAlive => 4,
            BgpMessageType::RouteRefresh => 5,
            BgpMessageType::Unknown(t) => t as usize,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            BgpMessageType::Open => "OPEN",
            BgpMessageType::Update => "UPDATE",
            BgpMessageType::Notification => "NOTIFICATION",
            BgpMessageType::KeepAlive => "KEEPALIVE",
            BgpMessageType::RouteRefresh => "ROUTE-REFRESH",
            BgpMessageType::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Path attribute type codes.
#[allow(non_camel_case_types)]
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[repr(u8)]
pub enum BgpAttrType {
    ORIGIN = 1,
    AS_PATH = 2,
    NEXT_HOP = 3,
    MULTI_EXIT_DISC = 4,
    LOCAL_PREF = 5,
    ATOMIC_AGGREGATE = 6,
    AGGREGATOR = 7,
    /// RFC 1997
    COMMUNITIES = 8,
    /// RFC 4456
    ORIGINATOR_ID = 9,
    /// RFC 4456
    CLUSTER_LIST = 10,
    MP_REACH_NLRI = 14,
    MP_UNREACH_NLRI = 15,
    /// RFC 4360
    EXT_COMMUNITIES = 16,
    /// RFC 6793
    AS4_PATH = 17,
    /// RFC 6793
    AS4_AGGREGATOR = 18,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// AS_PATH segment types.
pub const BGP_AS_SET: u8 = 1;
pub const BGP_AS_SEQUENCE: u8 = 2;
pub const BGP_AS_CONFED_SET: u8 = 3;
pub const BGP_AS_CONFED_SEQUENCE: u8 = 4;

/// ORIGIN attribute values.
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
#[repr(u8)]
pub enum BgpOrigin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Default for BgpOrigin {
    fn default() -> Self {
        BgpOrigin::Igp
    }
}

impl BgpOrigin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BgpOrigin::Igp => "IGP",
            BgpOrigin::Egp => "EGP",
            BgpOrigin::Incomplete => "INCOMPLETE",
            BgpOrigin::Unknown(_) => "UNKNOWN",
        }
    }
}

bitflags! {
    /// Per-flow status bitset (`bgpStat` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BgpStat: u16 {
        /// Flow is BGP (TCP and port 179 on either side).
        const BGP         = 0x0001;
        /// Connection not synchronized (marker not found).
        const CONN_SYNC   = 0x0002;
        /// Bad message length.
        const BAD_LEN     = 0x0004;
        /// Bad message type.
        const BAD_TYPE    = 0x0008;
        /// Unsupported version number (!= 4).
        const VERSION     = 0x0010;
        /// Unacceptable hold time (1 or 2).
        const HTIME       = 0x0040;
        /// Invalid network mask (> 32).
        const INVMASK     = 0x0080;
        /// Inter-arrival time for update or keep-alive < 0.
        const IAT         = 0x0100;
        /// 16-bit AS does not match the 4-octet-AS capability value.
        const AS_MISMATCH = 0x0200;
        /// ATOMIC_AGGREGATE attribute seen.
        const ATOMIC_AGGR = 0x0400;
        /// One of the workspace arrays was full.
        const AFULL       = 0x4000;
        /// Malformed packet (snaplen).
        const SNAPLEN     = 0x8000;
    }
}

bitflags! {
    /// Per-flow anomaly bitset (`bgpAFlgs` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BgpAnomaly: u16 {
        /// Bogon prefix advertisement.
        const BOGON      = 0x0001;
        /// Prefix more specific than /24 advertised.
        const SPEC_PREF  = 0x0002;
        /// Prefix less specific than /8 advertised.
        const LSPEC_PREF = 0x0004;
        /// Community with tag 666 or the well-known BLACKHOLE community.
        const BLACKHOLE  = 0x0008;
        /// Own AS appears in the AS path.
        const LOOP       = 0x0010;
        /// Same prefix announced by more than one origin AS.
        const MOAS       = 0x0020;
        /// AS prepended more than 10 times.
        const NPREPAS    = 0x0040;
        /// AS number reserved for private use.
        const RESRVD_AS  = 0x0080;
        /// Route for a more specific prefix advertised.
        const MSPEC_PREF = 0x0100;
    }
}

bitflags! {
    /// Capability bitset (`bgpCaps` output column). Bits 0-4 mirror the
    /// capability codes 1-5; higher codes get dedicated bits; anything else
    /// maps to `OTHER`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BgpCaps: u16 {
        /// Multiprotocol Extensions for BGP-4 (RFC 2858).
        const MULTI_PROTO  = 0x0001;
        /// Route Refresh (RFC 2918).
        const ROUTE_REFRESH = 0x0002;
        /// Outbound Route Filtering (RFC 5291).
        const ROUTE_FILTER = 0x0004;
        /// Multiple routes to a destination (RFC 3107).
        const MULT_ROUTE   = 0x0008;
        /// Extended Next Hop Encoding (RFC 5549).
        const EXT_NEXTHOP  = 0x0010;
        /// Graceful Restart (RFC 4724).
        const GRACE_RESTART = 0x0020;
        /// 4-octet AS numbers (RFC 6793).
        const AS4          = 0x0040;
        /// Dynamic capability.
        const DYNAMIC      = 0x0080;
        /// Multisession BGP.
        const MULTISESSION = 0x0100;
        /// ADD-PATH.
        const ADD_PATH     = 0x0200;
        /// Enhanced Route Refresh (RFC 7313).
        const ENH_REFRESH  = 0x0400;
        /// Long-Lived Graceful Restart.
        const LLGR         = 0x0800;
        /// FQDN capability.
        const FQDN         = 0x1000;
        /// Any unrecognized capability code.
        const OTHER        = 0x8000;
    }
}

/// Capability codes from the OPEN optional parameter list.
pub const BGP_C_GRACE_RESTART: u8 = 64;
pub const BGP_C_AS4: u8 = 65;
pub const BGP_C_DYNAMIC: u8 = 67;
pub const BGP_C_MULTISESSION: u8 = 68;
pub const BGP_C_ADD_PATH: u8 = 69;
pub const BGP_C_ENH_REFRESH: u8 = 70;
pub const BGP_C_LLGR: u8 = 71;
pub const BGP_C_FQDN: u8 = 73;

/// Well-known BLACKHOLE community (0xFFFF029A, RFC 7999).
pub const BGP_COM_BLACKHOLE: u32 = 0xffff_029a;
/// Community tag conventionally used for blackholing.
pub const BGP_COM_TAG_BLACKHOLE: u16 = 666;

/// Reserved private AS ranges.
pub const BGP_PRIVATE_AS16: std::ops::RangeInclusive<u32> = 64512..=65534;
pub const BGP_PRIVATE_AS32: std::ops::RangeInclusive<u32> = 4_200_000_000..=4_294_967_294;

/// An IPv4 NLRI entry: prefix length in bits plus the significant prefix
/// bytes, zero padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BgpNlri {
    pub mask: u8,
    pub prefix: [u8; 4],
}

impl std::fmt::Display for BgpNlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}/{}",
            self.prefix[0], self.prefix[1], self.prefix[2], self.prefix[3], self.mask
        )
    }
}

/// One AS_PATH segment.
#[derive(Debug, Clone, Default)]
pub struct AsPathSegment {
    pub stype: u8,
    pub asns: Vec<u32>,
}

/// Best-path relevant state of one routing-table entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct BgpRtEntry {
    /// Router id of the announcing peer (host order).
    pub rid: u32,
    /// NEXT_HOP (host order).
    pub nexthop: u32,
    pub med: u32,
    pub locpref: u32,
    /// Origin AS: last AS in the path.
    pub orig_as: u32,
    /// AS-path length (SET segments count as one).
    pub nas: u32,
    pub orig: BgpOrigin,
    pub mask: u8,
}
