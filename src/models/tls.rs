/*!
TLS/SSL wire-format constants and the per-flow bitset model, covering
SSLv2 through TLS 1.3 and DTLS 1.0 through 1.3.
*/
use bitflags::bitflags;

// Protocol versions (record/handshake version fields)
pub const SSLV1: u16 = 0x0001;
pub const SSLV2: u16 = 0x0002;
pub const SSLV3: u16 = 0x0300;
pub const TLS10: u16 = 0x0301;
pub const TLS11: u16 = 0x0302;
pub const TLS12: u16 = 0x0303;
pub const TLS13: u16 = 0x0304;
/// TLS 1.3 drafts 14..28.
pub const TLS13_D14: u16 = 0x7f0e;
pub const TLS13_D28: u16 = 0x7f1c;
/// TLS 1.3 Facebook drafts 23 and 26.
pub const TLS13_FBD23: u16 = 0xfb17;
pub const TLS13_FBD26: u16 = 0xfb1a;
pub const DTLS10_OPENSSL: u16 = 0x0100; // OpenSSL pre 0.9.8f
pub const DTLS10: u16 = 0xfeff;
pub const DTLS12: u16 = 0xfefd;
pub const DTLS13: u16 = 0xfefc;

#[inline]
pub const fn tls_v_is_ssl(v: u16) -> bool {
    // SSL 3.0 and TLS 1.0-1.3 share the 0x03xx major
    v >= SSLV3 && v <= TLS13
}

#[inline]
pub const fn tls_v_is_dtls(v: u16) -> bool {
    v == DTLS10 || v == DTLS12 || v == DTLS13 || v == DTLS10_OPENSSL
}

#[inline]
pub const fn tls_v_is_tls13_draft(v: u16) -> bool {
    v >= TLS13_D14 && v <= TLS13_D28
}

#[inline]
pub const fn tls_v_is_tls13_fb_draft(v: u16) -> bool {
    v == TLS13_FBD23 || v == TLS13_FBD26
}

#[inline]
pub const fn tls_v_is_tls13(v: u16) -> bool {
    v == TLS13 || tls_v_is_tls13_draft(v) || tls_v_is_tls13_fb_draft(v)
}

#[inline]
pub const fn tls_v_is_valid(v: u16) -> bool {
    tls_v_is_ssl(v) || v == SSLV2 || tls_v_is_dtls(v) || tls_v_is_tls13(v)
}

/// GREASE values (RFC 8701): 0x?A?A with both nibble-pairs equal.
#[inline]
pub const fn tls_is_grease(v: u16) -> bool {
    (v & 0x0f0f) == 0x0a0a && (v >> 8) == (v & 0x00ff)
}

// Record types
pub const TLS_RT_CHANGE_CIPHER_SPEC: u8 = 20;
pub const TLS_RT_ALERT: u8 = 21;
pub const TLS_RT_HANDSHAKE: u8 = 22;
pub const TLS_RT_APPLICATION_DATA: u8 = 23;
pub const TLS_RT_HEARTBEAT: u8 = 24;

#[inline]
pub const fn tls_rt_is_valid(t: u8) -> bool {
    t >= TLS_RT_CHANGE_CIPHER_SPEC && t <= TLS_RT_HEARTBEAT
}

/// Record header: type(1) + version(2) + length(2).
pub const TLS_RT_HDR_LEN: usize = 5;
/// Maximum record length: 2^14 plus the TLSCiphertext expansion allowance.
pub const TLS_RT_MAX_LEN: u16 = (1 << 14) + (1 << 10);

// Handshake types
pub const TLS_HT_HELLO_REQUEST: u8 = 0;
pub const TLS_HT_CLIENT_HELLO: u8 = 1;
pub const TLS_HT_SERVER_HELLO: u8 = 2;
pub const TLS_HT_HELLO_VERIFY_REQUEST: u8 = 3;
pub const TLS_HT_NEW_SESSION_TICKET: u8 = 4;
pub const TLS_HT_CERTIFICATE: u8 = 11;
pub const TLS_HT_SERVER_KEY_EXCHANGE: u8 = 12;
pub const TLS_HT_CERTIFICATE_REQUEST: u8 = 13;
pub const TLS_HT_SERVER_HELLO_DONE: u8 = 14;
pub const TLS_HT_CERTIFICATE_VERIFY: u8 = 15;
pub const TLS_HT_CLIENT_KEY_EXCHANGE: u8 = 16;
pub const TLS_HT_FINISHED: u8 = 20;

// Hello extension types
pub const TLS_EXT_SERVER_NAME: u16 = 0;
pub const TLS_EXT_ELLIPTIC_CURVES: u16 = 10;
pub const TLS_EXT_EC_POINT_FORMATS: u16 = 11;
pub const TLS_EXT_SIG_ALGS: u16 = 13;
pub const TLS_EXT_USE_SRTP: u16 = 14;
pub const TLS_EXT_HEARTBEAT: u16 = 15;
pub const TLS_EXT_ALPN: u16 = 16;
pub const TLS_EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const TLS_EXT_NPN: u16 = 0x3374;
pub const TLS_EXT_ALPS: u16 = 0x4469;
pub const TLS_EXT_RENEG_INFO: u16 = 0xff01;

// Alert levels
pub const TLS_AL_WARN: u8 = 1;
pub const TLS_AL_FATAL: u8 = 2;

// Heartbeat
pub const TLS_HB_REQUEST: u8 = 1;
pub const TLS_HB_RESPONSE: u8 = 2;
/// type(1) + length(2)
pub const TLS_HB_HDR_LEN: u16 = 3;
pub const TLS_HB_MIN_PAD_LEN: u16 = 16;
pub const TLS_HB_EXT_ALLOWED: u8 = 1;
pub const TLS_HB_EXT_NOT_ALLOWED: u8 = 2;

/// Empty renegotiation info SCSV (RFC 5746).
pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: u16 = 0x00ff;

pub const TLS_COMPRESSION_DEFLATE: u8 = 1;

pub const TLS_HELLO_RANDOM_LEN: usize = 32;

/// gmt_unix_time plausibility bounds: one year after the epoch, five years
/// past the capture time.
pub const TLS_TS_1YEAR: u32 = 31_536_000;
pub const TLS_TS_5YEARS: u32 = 157_680_000;

// Bounds of the per-flow lists; overflow sets the matching *_TRUNC bit.
pub const TLS_MAX_REC_VER: usize = 8;
pub const TLS_MAX_HAND_VER: usize = 8;
pub const TLS_MAX_CIPHER: usize = 64;
pub const TLS_MAX_EXT: usize = 32;
pub const TLS_MAX_SUPP_VER: usize = 16;
pub const TLS_MAX_SIG_ALG: usize = 32;
pub const TLS_MAX_EC: usize = 32;
pub const TLS_MAX_EC_FORMATS: usize = 8;
pub const TLS_MAX_PROTO: usize = 8;
/// Stored length cap of one ALPN/ALPS/NPN protocol name.
pub const TLS_PROTO_LEN: usize = 16;
pub const TLS_SNI_MAX_LEN: usize = 128;
pub const TLS_CERT_NAME_MAX_LEN: usize = 64;

bitflags! {
    /// Per-flow status bitset (`sslStat` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TlsStat: u32 {
        /// Malformed length or value field; record skipped.
        const MALFORMED        = 0x0000_0001;
        /// Bounded read failed; packet aborted.
        const SNAP             = 0x0000_0002;
        /// Record length exceeds the protocol maximum.
        const REC_TOO_LONG     = 0x0000_0004;
        /// Record version differs from the flow version.
        const VERSION_MISMATCH = 0x0000_0008;
        /// Renegotiation requested (session id or renegotiation_info).
        const RENEGOTIATION    = 0x0000_0010;
        /// SSLv2/SSLv3 observed.
        const WEAK_PROTO       = 0x0000_0020;
        /// NULL/EXPORT/DES/RC4 class cipher offered or selected.
        const WEAK_CIPHER      = 0x0000_0040;
        /// Certificate public key shorter than 1024 bits.
        const WEAK_KEY         = 0x0000_0080;
        /// Fatal alert seen.
        const AL_FATAL         = 0x0000_0100;
        /// Peer does not allow heartbeats.
        const NO_HEARTBEAT     = 0x0000_0200;
        /// Certificate fingerprint found in the blacklist.
        const BLIST            = 0x0000_0400;
        const REC_VER_TRUNC    = 0x0000_0800;
        const HAND_VER_TRUNC   = 0x0000_1000;
        const CIPHERL_TRUNC    = 0x0000_2000;
        const EXTL_TRUNC       = 0x0000_4000;
        const SUPP_VER_TRUNC   = 0x0000_8000;
        const SIG_ALG_TRUNC    = 0x0001_0000;
        const EC_TRUNC         = 0x0002_0000;
        /// ALPN/ALPS/NPN list full.
        const PROTOL_TRUNC     = 0x0004_0000;
        /// A protocol name was cut to [`TLS_PROTO_LEN`].
        const PROTON_TRUNC     = 0x0008_0000;
        const JA3_FAIL         = 0x0010_0000;
        const JA4_FAIL         = 0x0020_0000;
        const JA4_TRUNC        = 0x0040_0000;
        const JA4_A_OK         = 0x0080_0000;
        const JA4_B_OK         = 0x0100_0000;
        const JA4_C_OK         = 0x0200_0000;
    }
}

bitflags! {
    /// Small per-flow flag byte (`sslFlags` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TlsFlags: u8 {
        /// SSLv2 compatible record seen.
        const V2    = 0x01;
        /// Version mismatch between records.
        const VER   = 0x02;
        /// gmt_unix_time implausibly small.
        const STIME = 0x04;
        /// gmt_unix_time in the (far) future.
        const RTIME = 0x08;
        /// Hello random is all zeros or all ones.
        const RAND  = 0x10;
        /// Deflate compression offered.
        const COMPR = 0x20;
    }
}

bitflags! {
    /// Known vulnerability patterns (`sslVuln` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TlsVuln: u8 {
        const BEAST  = 0x01;
        const POODLE = 0x02;
        const BREACH = 0x04;
        const CRIME  = 0x08;
        /// Heartbeat length larger than the record (Heartbleed pattern).
        const HEART  = 0x10;
    }
}

bitflags! {
    /// Application protocols seen in ALPN/ALPS/NPN plus side detections
    /// (`sslProto` output column).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TlsProto: u32 {
        const OVPN     = 0x0000_0001;
        const GREASE   = 0x0000_0002;
        const UNKNOWN  = 0x0000_0004;
        const HTTP     = 0x0000_0008;
        const HTTP2    = 0x0000_0010;
        const HTTP3    = 0x0000_0020;
        const ACME     = 0x0000_0040;
        const APNS     = 0x0000_0080;
        const COAP     = 0x0000_0100;
        const DOT      = 0x0000_0200;
        const DOQ      = 0x0000_0400;
        const FTP      = 0x0000_0800;
        const IMAP     = 0x0000_1000;
        const IRC      = 0x0000_2000;
        const MQTT     = 0x0000_4000;
        const NNTP     = 0x0000_8000;
        const POP3     = 0x0001_0000;
        const SIP      = 0x0002_0000;
        const SMB      = 0x0004_0000;
        const SPDY     = 0x0008_0000;
        const STUN     = 0x0010_0000;
        const TDS8     = 0x0020_0000;
        const XMPP     = 0x0040_0000;
        const NTSKE    = 0x0080_0000;
        const SUNRPC   = 0x0100_0000;
        const WEBRTC   = 0x0200_0000;
        const MANSIEVE = 0x0400_0000;
        const RTP      = 0x0800_0000;
        const DICO     = 0x1000_0000;
    }
}

/// Map an ALPN/ALPS/NPN protocol identifier to its [`TlsProto`] bit.
pub fn tls_proto_from_id(id: &[u8]) -> TlsProto {
    match id {
        b"h2" | b"h2c" => TlsProto::HTTP2,
        b"h3" => TlsProto::HTTP3,
        _ if id.starts_with(b"h3-") || id.starts_with(b"hq-") => TlsProto::HTTP3,
        b"quic" => TlsProto::HTTP3,
        b"http/0.9" | b"http/1.0" | b"http/1.1" => TlsProto::HTTP,
        b"acme-tls/1" => TlsProto::ACME,
        b"apns-security-v3" | b"apns-pack-v1" => TlsProto::APNS,
        b"coap" | b"co" => TlsProto::COAP,
        b"dot" => TlsProto::DOT,
        b"doq" => TlsProto::DOQ,
        _ if id.starts_with(b"doq-") => TlsProto::DOQ,
        b"ftp" => TlsProto::FTP,
        b"imap" => TlsProto::IMAP,
        b"irc" => TlsProto::IRC,
        b"mqtt" => TlsProto::MQTT,
        b"nntp" | b"nnsp" => TlsProto::NNTP,
        b"pop3" => TlsProto::POP3,
        b"sip/2" => TlsProto::SIP,
        b"smb" => TlsProto::SMB,
        _ if id.starts_with(b"spdy/") => TlsProto::SPDY,
        b"stun.turn" | b"stun.nat-discovery" => TlsProto::STUN,
        b"tds/8.0" => TlsProto::TDS8,
        b"xmpp-client" | b"xmpp-server" => TlsProto::XMPP,
        b"ntske/1" => TlsProto::NTSKE,
        b"sunrpc" => TlsProto::SUNRPC,
        b"webrtc" | b"c-webrtc" => TlsProto::WEBRTC,
        b"managesieve" => TlsProto::MANSIEVE,
        b"dicom" => TlsProto::DICO,
        _ => TlsProto::UNKNOWN,
    }
}

/// NULL, anonymous, EXPORT, DES and RC4 suites from the classic registry
/// ranges; offering or selecting one flags the flow.
pub fn tls_cipher_is_weak(cipher: u16) -> bool {
    matches!(
        cipher,
        // NULL encryption
        0x0000..=0x0002 | 0x003b | 0xc001 | 0xc006 | 0xc00b | 0xc010 | 0xc015
        // EXPORT40 / EXPORT56
        | 0x0003 | 0x0006 | 0x0008 | 0x000b | 0x000e | 0x0011 | 0x0014 | 0x0017
        | 0x0019 | 0x0026..=0x0029 | 0x0060..=0x0065
        // single DES
        | 0x0009 | 0x000c | 0x000f | 0x0012 | 0x0015 | 0x001a
        // RC4
        | 0x0004 | 0x0005 | 0x0018 | 0x0020 | 0x0024 | 0x0028 | 0x002b
        | 0x008a | 0x008e | 0x0092 | 0xc002 | 0xc007 | 0xc00c | 0xc011 | 0xc016
    )
}

/// OpenVPN control-channel opcodes (high 5 bits of the byte after the
/// packet length).
pub const OVPN_CONTROL_HARD_RESET_CLIENT_V1: u8 = 1;
pub const OVPN_CONTROL_HARD_RESET_SERVER_V1: u8 = 2;
pub const OVPN_CONTROL_SOFT_RESET_V1: u8 = 3;
pub const OVPN_CONTROL_V1: u8 = 4;
pub const OVPN_ACK_V1: u8 = 5;
pub const OVPN_DATA_V1: u8 = 6;
pub const OVPN_CONTROL_HARD_RESET_CLIENT_V2: u8 = 7;
pub const OVPN_CONTROL_HARD_RESET_SERVER_V2: u8 = 8;
pub const OVPN_DATA_V2: u8 = 9;
pub const OVPN_CONTROL_HARD_RESET_CLIENT_V3: u8 = 10;

#[inline]
pub const fn ovpn_opcode_is_valid(op: u8) -> bool {
    op >= OVPN_CONTROL_HARD_RESET_CLIENT_V1 && op <= OVPN_CONTROL_HARD_RESET_CLIENT_V3
}
