/*!
TLS/SSL flow analyzer.

Parses the record and handshake layers of SSLv2 through TLS 1.3 and DTLS
1.0 through 1.3 on TCP, UDP and SCTP flows, and on the decrypted QUIC
Initial payload published by the QUIC analyzer. Mines certificates,
extension lists and the JA3/JA4 fingerprint family; detects the OpenVPN
control channel and Tor-style flows on the side.
*/
use std::io::{self, Write};

use smallvec::SmallVec;

use crate::buffer::ByteCursor;
use crate::error::ParserError;
use crate::fplist::FingerprintList;
use crate::models::tls::*;
use crate::models::{FlowIndex, FlowView, L4Proto, PacketView, Schema};
use crate::output::OutputBuffer;

use super::quic::QuicBufExt;
use super::{FlowAnalyzer, PacketContext};

/// Bounded read inside a record decoder: a short buffer flags the flow as
/// snapped and aborts the packet.
macro_rules! tls_read {
    ($f:expr, $buf:expr, $m:ident) => {
        match $buf.$m() {
            Some(v) => v,
            None => {
                $f.stat |= TlsStat::SNAP;
                return false;
            }
        }
    };
}
pub(crate) use tls_read;

/// Variant of [`tls_read!`] for use directly inside functions returning
/// `()`.
macro_rules! tls_read_ret {
    ($f:expr, $buf:expr, $m:ident) => {
        match $buf.$m() {
            Some(v) => v,
            None => {
                $f.stat |= TlsStat::SNAP;
                return;
            }
        }
    };
}

mod cert;
mod extensions;
mod fingerprint;
mod openvpn;
mod tor;

pub use cert::{CertInfo, NameInfo, PkeyType};
pub use tor::TorDetector;

/// Runtime settings; the defaults match the shipped feature matrix.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Also output the raw JA3 string next to its hash.
    pub ja3_str: bool,
    /// JA4 original-order variant.
    pub ja4_o: bool,
    /// JA4 raw (unhashed) variant.
    pub ja4_r: bool,
    /// JA4 raw original-order variant.
    pub ja4_ro: bool,
    /// Render the certificate subject/issuer as a single line instead of
    /// split name fields.
    pub cert_subject_oneline: bool,
    pub detect_tor: bool,
    pub analyze_ovpn: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            ja3_str: false,
            ja4_o: false,
            ja4_r: false,
            ja4_ro: false,
            cert_subject_oneline: false,
            detect_tor: true,
            analyze_ovpn: true,
        }
    }
}

/// Optional fingerprint lookup lists.
#[derive(Default)]
pub struct TlsLists {
    pub ja3: Option<FingerprintList>,
    pub ja4: Option<FingerprintList>,
    pub ja4s: Option<FingerprintList>,
    /// Certificate-fingerprint blacklist.
    pub blist: Option<FingerprintList>,
}

/// TLS record header.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RecordHeader {
    pub typ: u8,
    pub version: u16,
    pub len: u16,
}

/// Per-flow state, reset on flow creation.
#[derive(Debug, Clone, Default)]
pub struct TlsFlow {
    pub stat: TlsStat,
    pub proto: TlsProto,
    pub flags: TlsFlags,
    pub vuln: TlsVuln,
    pub version: u16,

    pub rec_ver: SmallVec<[u16; TLS_MAX_REC_VER]>,
    pub num_rec_ver: u16,
    pub hand_ver: SmallVec<[u16; TLS_MAX_HAND_VER]>,
    pub num_hand_ver: u16,

    /// 64-bit alert-description bag.
    pub alert: u64,
    /// Preferred (client) / negotiated (server) cipher.
    pub cipher: u16,
    pub cipher_list: SmallVec<[u16; 16]>,
    pub num_cipher: u16,
    pub ext_list: SmallVec<[u16; 16]>,
    pub num_ext: u16,
    pub supp_ver: SmallVec<[u16; TLS_MAX_SUPP_VER]>,
    pub num_supp_ver: u16,
    pub sig_alg: SmallVec<[u16; 16]>,
    pub num_sig_alg: u16,
    pub ec: SmallVec<[u16; 16]>,
    pub num_ec: u16,
    pub ec_formats: SmallVec<[u8; TLS_MAX_EC_FORMATS]>,
    pub num_ec_formats: u8,

    pub alpn_list: Vec<String>,
    pub num_alpn: u16,
    pub alps_list: Vec<String>,
    pub num_alps: u16,
    pub npn_list: Vec<String>,
    pub num_npn: u16,

    pub server_name: String,
    pub session_len: u8,
    pub gmt_time: u32,

    pub num_change_cipher: u16,
    pub num_alert: u16,
    pub num_handshake: u16,
    pub num_hello_req: u16,
    pub num_server_hello_done: u16,
    pub num_app_data: u64,
    pub num_heartbeat: u64,

    pub ovpn_type: u16,
    pub ovpn_sess_id: u64,

    pub cert: CertInfo,
    pub blist_cat: String,

    pub ja3_hash: String,
    pub ja3_desc: String,
    pub ja3_str: String,
    pub ja4: String,
    pub ja4_desc: String,
    pub ja4_o: String,
    pub ja4_r: String,
    pub ja4_ro: String,

    pub is_tor: bool,
}

/// Append to a bounded per-flow list; a full list sets `trunc` once. The
/// matching `num_*` counter keeps counting past the cap.
pub(crate) fn push_bounded<A: smallvec::Array>(
    list: &mut SmallVec<A>,
    v: A::Item,
    max: usize,
    f_stat: &mut TlsStat,
    trunc: TlsStat,
) {
    if list.len() < max {
        list.push(v);
    } else {
        *f_stat |= trunc;
    }
}

pub struct TlsAnalyzer {
    cfg: TlsConfig,
    lists: TlsLists,
    tor: Option<TorDetector>,
    flows: Vec<TlsFlow>,

    agg_stat: TlsStat,
    agg_proto: TlsProto,
    num_ovpn: u32,
    num_tor: u32,
    num_sslv2: u32,
    /// SSL 3.0 and TLS 1.0-1.3 flows, indexed by minor version.
    num_sslv3: [u32; 5],
    num_tls13_draft: [u32; 15],
    num_tls13_fb: [u32; 2],
    num_dtls: [u32; 4],
}

impl TlsAnalyzer {
    pub fn new(cfg: TlsConfig, lists: TlsLists) -> TlsAnalyzer {
        let tor = if cfg.detect_tor {
            Some(TorDetector::new(cfg.cert_subject_oneline))
        } else {
            None
        };
        TlsAnalyzer {
            cfg,
            lists,
            tor,
            flows: Vec::new(),
            agg_stat: TlsStat::empty(),
            agg_proto: TlsProto::empty(),
            num_ovpn: 0,
            num_tor: 0,
            num_sslv2: 0,
            num_sslv3: [0; 5],
            num_tls13_draft: [0; 15],
            num_tls13_fb: [0; 2],
            num_dtls: [0; 4],
        }
    }

    pub fn flow(&self, idx: FlowIndex) -> &TlsFlow {
        &self.flows[idx]
    }

    /// Record header from a decrypted QUIC Initial: skip to the first
    /// CRYPTO frame and synthesize a TLS 1.3 handshake record around it.
    fn quic_record_header(buf: &mut ByteCursor, rec: &mut RecordHeader) -> bool {
        let Some(mut frame_type) = buf.peek_u8() else {
            return false;
        };
        while frame_type != 0x06 {
            if !buf.skip_quic_frame() {
                return false;
            }
            match buf.peek_u8() {
                Some(t) => frame_type = t,
                None => return false,
            }
        }
        buf.skip_u8(); // frame type

        let (Some(_offset), Some(length)) = (buf.read_quic_varint(), buf.read_quic_varint())
        else {
            return false;
        };
        if length > buf.left() as u64 {
            return false;
        }

        rec.typ = TLS_RT_HANDSHAKE;
        rec.version = TLS13;
        rec.len = length as u16;
        true
    }

    /// Record header from a TCP/UDP/SCTP payload. A failed validity check
    /// means the stream is probably not TLS (an SSLv2 fallback is
    /// attempted); a short read sets SNAP. Both abort the packet.
    fn read_record_header(f: &mut TlsFlow, buf: &mut ByteCursor, rec: &mut RecordHeader) -> bool {
        let Some(typ) = buf.read_u8() else {
            f.stat |= TlsStat::SNAP;
            return false;
        };
        rec.typ = typ;

        if !tls_rt_is_valid(rec.typ) {
            // could still be SSLv2
            buf.seek(io::SeekFrom::Current(-1));
            process_sslv2(f, buf);
            return false;
        }

        let Some(version) = buf.read_u16() else {
            f.stat |= TlsStat::SNAP;
            return false;
        };
        rec.version = version;

        if rec.version == SSLV3 {
            f.vuln |= TlsVuln::BEAST | TlsVuln::POODLE;
            f.stat |= TlsStat::WEAK_PROTO;
        } else if tls_v_is_dtls(rec.version) {
            buf.skip_u16(); // epoch
            buf.skip_u48(); // sequence number
        } else if !tls_v_is_ssl(rec.version) {
            // invalid version, probably not ssl
            return false;
        }

        if f.version != 0 && f.version != rec.version {
            f.flags |= TlsFlags::VER;
            f.stat |= TlsStat::VERSION_MISMATCH;
        }

        let Some(len) = buf.read_u16() else {
            f.stat |= TlsStat::SNAP;
            return false;
        };
        rec.len = len;

        true
    }

    #[allow(clippy::too_many_lines)]
    fn process_handshake_record(
        &mut self,
        buf: &mut ByteCursor,
        rec: &RecordHeader,
        rec_start: usize,
        idx: FlowIndex,
        flow: &FlowView,
        packet: &PacketView,
    ) -> bool {
        self.flows[idx].num_handshake += 1;
        if rec.len == 0 {
            return true;
        }

        // a record may carry several handshake messages
        while !buf.is_empty() && (rec.len as usize) > buf.tell() - rec_start {
            let hs_start = buf.tell();

            let f = &mut self.flows[idx];
            let ht = tls_read!(f, buf, read_u8);
            let hs_len = tls_read!(f, buf, read_u24) as usize;

            if tls_v_is_dtls(f.version) {
                buf.skip_u16(); // message_seq
                buf.skip_u24(); // fragment_offset
                buf.skip_u24(); // fragment_length
            }

            let mut empty_reneg_scsv = false;
            let mut non_tor_ext = false;
            let mut single_cert = false;

            match ht {
                TLS_HT_HELLO_REQUEST => {
                    self.flows[idx].num_hello_req += 1;
                }

                TLS_HT_CLIENT_HELLO | TLS_HT_SERVER_HELLO => {
                    if !self.process_hello(
                        buf,
                        rec,
                        rec_start,
                        hs_start,
                        hs_len,
                        ht,
                        idx,
                        flow,
                        packet,
                        &mut empty_reneg_scsv,
                        &mut non_tor_ext,
                    ) {
                        return false;
                    }
                }

                TLS_HT_HELLO_VERIFY_REQUEST => {
                    let f = &mut self.flows[idx];
                    let ver = tls_read!(f, buf, read_u16);
                    if tls_v_is_valid(ver) {
                        f.version = ver;
                        buf.skip_u32(); // cookie
                    } else {
                        // probably encrypted
                        buf.skip_n(hs_len);
                    }
                }

                TLS_HT_CERTIFICATE => {
                    if self.flows[idx].cert.version != 0 {
                        // only the first certificate chain is analyzed
                        let consumed = buf.tell() - rec_start;
                        buf.skip_n((rec.len as usize).saturating_sub(consumed));
                    } else {
                        if !cert::process_certificate(self, buf, idx, &mut single_cert) {
                            return false;
                        }
                        // a Tor server certificate tags both directions
                        if self.flows[idx].is_tor {
                            if let Some(o) = flow.opposite {
                                self.flows[o].is_tor = true;
                            }
                        }
                    }
                }

                TLS_HT_SERVER_HELLO_DONE => {
                    self.flows[idx].num_server_hello_done += 1;
                }

                TLS_HT_CLIENT_KEY_EXCHANGE
                | TLS_HT_SERVER_KEY_EXCHANGE
                | TLS_HT_CERTIFICATE_REQUEST
                | TLS_HT_CERTIFICATE_VERIFY
                | TLS_HT_FINISHED => {
                    if hs_len <= rec.len as usize {
                        buf.skip_n(hs_len);
                    }
                }

                _ => {
                    // unknown handshake type: encrypted or not ssl
                    let consumed = buf.tell() - rec_start;
                    buf.skip_n((rec.len as usize).saturating_sub(consumed));
                }
            }

            // Tor client heuristic: only used when there is no reverse flow,
            // the certificate path is far more reliable
            if let Some(tor) = &self.tor {
                let f = &mut self.flows[idx];
                if flow.opposite.is_none()
                    && empty_reneg_scsv
                    && !non_tor_ext
                    && tor.matches_client_sni(&f.server_name)
                {
                    f.is_tor = true;
                }
            }

            if rec.len as usize == buf.tell() - rec_start {
                break; // end of record
            }

            let consumed = buf.tell() - hs_start;
            let want = hs_len + 4;
            if want > consumed && !buf.skip_n(want - consumed) {
                break;
            }
        }

        true
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn process_hello(
        &mut self,
        buf: &mut ByteCursor,
        rec: &RecordHeader,
        rec_start: usize,
        hs_start: usize,
        hs_len: usize,
        ht: u8,
        idx: FlowIndex,
        flow: &FlowView,
        packet: &PacketView,
        empty_reneg_scsv: &mut bool,
        non_tor_ext: &mut bool,
    ) -> bool {
        let f = &mut self.flows[idx];

        let hand_ver = tls_read!(f, buf, read_u16);
        if !tls_v_is_valid(hand_ver) {
            // invalid version: the message is probably encrypted
            buf.skip_n(hs_len);
            return true;
        }
        f.version = hand_ver;

        if !f.hand_ver.contains(&hand_ver) {
            push_bounded(
                &mut f.hand_ver,
                hand_ver,
                TLS_MAX_HAND_VER,
                &mut f.stat,
                TlsStat::HAND_VER_TRUNC,
            );
            f.num_hand_ver += 1;
        }

        // gmt_unix_time is the head of Random
        let gmt = tls_read!(f, buf, peek_u32);
        f.gmt_time = gmt;
        if gmt < TLS_TS_1YEAR {
            f.flags |= TlsFlags::STIME;
        } else if gmt as u64 > packet.ts_secs + TLS_TS_5YEARS as u64 {
            f.flags |= TlsFlags::RTIME;
        }

        // make sure Random is random
        let Some(random) = buf.peek_bytes(TLS_HELLO_RANDOM_LEN) else {
            f.stat |= TlsStat::SNAP;
            return false;
        };
        if random.iter().all(|&b| b == 0) || random.iter().all(|&b| b == 0xff) {
            f.flags |= TlsFlags::RAND;
        }
        buf.skip_n(TLS_HELLO_RANDOM_LEN);

        f.session_len = tls_read!(f, buf, read_u8);
        buf.skip_n(f.session_len as usize);

        if ht == TLS_HT_CLIENT_HELLO {
            // a non-empty session id asks to resume (renegotiate)
            if f.session_len != 0 {
                f.stat |= TlsStat::RENEGOTIATION;
            }
            if tls_v_is_dtls(f.version) {
                let cookie_len = tls_read!(f, buf, read_u8);
                buf.skip_n(cookie_len as usize);
            }
        }

        let num_cipher = if ht == TLS_HT_SERVER_HELLO {
            1
        } else {
            let cipher_len = tls_read!(f, buf, read_u16);
            if cipher_len & 1 != 0 {
                f.stat |= TlsStat::MALFORMED;
            }
            cipher_len / 2
        };

        f.num_cipher = num_cipher;
        for i in 0..num_cipher {
            let cipher = tls_read!(f, buf, read_u16);
            if tls_cipher_is_weak(cipher) {
                f.stat |= TlsStat::WEAK_CIPHER;
            }
            if i == 0 {
                // preferred/selected cipher
                f.cipher = cipher;
            }
            push_bounded(
                &mut f.cipher_list,
                cipher,
                TLS_MAX_CIPHER,
                &mut f.stat,
                TlsStat::CIPHERL_TRUNC,
            );
            if cipher == TLS_EMPTY_RENEGOTIATION_INFO_SCSV {
                *empty_reneg_scsv = true;
            }
        }

        let comp_len = if ht == TLS_HT_SERVER_HELLO {
            1
        } else {
            tls_read!(f, buf, read_u8)
        };
        for _ in 0..comp_len {
            let compr = tls_read!(f, buf, read_u8);
            if compr == TLS_COMPRESSION_DEFLATE {
                f.flags |= TlsFlags::COMPR;
                f.vuln |= TlsVuln::BREACH | TlsVuln::CRIME;
            }
        }

        // hello extensions (optional below TLS 1.3)
        let pos = buf.tell();
        if rec.len as usize > pos - rec_start && hs_len > pos - hs_start {
            buf.skip_u16(); // size of all extensions

            while hs_len > buf.tell() - hs_start {
                if !extensions::process_hello_extension(self, buf, idx, ht, non_tor_ext) {
                    fingerprint::compute_ja4(self, ht, idx, flow);
                    return false;
                }
            }
        }

        fingerprint::compute_ja3(self, ht, idx);
        fingerprint::compute_ja4(self, ht, idx, flow);
        true
    }
}

impl FlowAnalyzer for TlsAnalyzer {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn dependencies(&self) -> &'static str {
        "quic"
    }

    fn init(&mut self, flow_capacity: usize) -> Result<(), ParserError> {
        self.flows = vec![TlsFlow::default(); flow_capacity];
        Ok(())
    }

    fn print_header(&self) -> Schema {
        let mut bv = Schema::new();
        bv.append_h32("sslStat", "SSL status");
        bv.append_h32("sslProto", "SSL proto");
        if self.cfg.analyze_ovpn {
            bv.append_h16("ovpnType", "OpenVPN message types");
            bv.append_u64("ovpnSessionID", "OpenVPN session ID");
        }
        bv.append_h8("sslFlags", "SSL flags");
        bv.append_h16("sslVersion", "SSL version");
        bv.append_u16("sslNumRecVer", "SSL number of record versions");
        bv.append_h16_r("sslRecVer", "SSL record version");
        bv.append_u16("sslNumHandVer", "SSL number of handshake versions");
        bv.append_h16_r("sslHandVer", "SSL handshake version");
        bv.append_h8("sslVuln", "SSL vulnerabilities");
        bv.append_h64("sslAlert", "SSL alert");
        bv.append_h16("sslCipher", "SSL preferred (Client) / negotiated (Server) cipher");
        bv.append_u16("sslNumExt", "SSL number of extensions");
        bv.append_h16_r("sslExtList", "SSL list of extensions");
        bv.append_u16("sslNumSuppVer", "SSL number of supported versions");
        bv.append_h16_r(
            "sslSuppVer",
            "SSL list of supported versions (client), negotiated version (server)",
        );
        bv.append_u16("sslNumSigAlg", "SSL number of signature algorithms");
        bv.append_h16_r("sslSigAlg", "SSL list of signature algorithms");
        bv.append_u16("sslNumECPt", "SSL number of EC points");
        bv.append_h16_r("sslECPt", "SSL list of EC points");
        bv.append_u8("sslNumECFormats", "SSL number of EC point formats");
        bv.append_h8_r("sslECFormats", "SSL list of EC point formats");
        bv.append_u16("sslNumALPN", "SSL number of protocols (ALPN)");
        bv.append_str_r("sslALPNList", "SSL list of protocols (ALPN)");
        bv.append_u16("sslNumALPS", "SSL number of protocols (ALPS)");
        bv.append_str_r("sslALPSList", "SSL list of protocols (ALPS)");
        bv.append_u16("sslNumNPN", "SSL number of protocols (NPN)");
        bv.append_str_r("sslNPNList", "SSL list of protocols (NPN)");
        bv.append_u16("sslNumCipher", "SSL number of supported ciphers");
        bv.append_h16_r("sslCipherList", "SSL list of supported cipher");
        bv.append_tuple(
            "sslNumCC_A_H_AD_HB",
            "SSL number of change_cipher, alert, handshake, application data, heartbeat records",
            &[
                crate::models::LeafType::UInt16,
                crate::models::LeafType::UInt16,
                crate::models::LeafType::UInt16,
                crate::models::LeafType::UInt64,
                crate::models::LeafType::UInt64,
            ],
        );
        bv.append_u8("sslSessIdLen", "SSL Session ID length");
        bv.append_timestamp_r("sslGMTTime", "SSL GMT Unix Time");
        bv.append_str_r("sslServerName", "SSL server name");
        cert::append_cert_columns(&mut bv, &self.cfg);
        if self.lists.blist.is_some() {
            bv.append_str_r("sslBlistCat", "SSL blacklisted certificate category");
        }
        bv.append_strc_r("sslJA3Hash", "SSL JA3 fingerprint");
        bv.append_str_r("sslJA3Desc", "SSL JA3 description");
        if self.cfg.ja3_str {
            bv.append_str_r("sslJA3Str", "SSL JA3 string");
        }
        bv.append_strc_r("sslJA4", "SSL JA4/JA4S fingerprint");
        bv.append_str_r("sslJA4Desc", "SSL JA4/JA4S description");
        if self.cfg.ja4_o {
            bv.append_strc_r("sslJA4O", "SSL JA4_o fingerprint (original order)");
        }
        if self.cfg.ja4_r {
            bv.append_strc_r("sslJA4R", "SSL JA4_r fingerprint (raw)");
        }
        if self.cfg.ja4_ro {
            bv.append_strc_r("sslJA4RO", "SSL JA4_o fingerprint (raw, original order)");
        }
        if self.cfg.detect_tor {
            bv.append_u8("sslTorFlow", "SSL Tor flow");
        }
        bv
    }

    fn on_new_flow(&mut self, _packet: &PacketView, _flow: &FlowView, idx: FlowIndex) {
        self.flows[idx] = TlsFlow::default();
    }

    fn on_layer4(
        &mut self,
        packet: &PacketView,
        flow: &FlowView,
        idx: FlowIndex,
        ctx: &mut PacketContext,
    ) {
        if packet.l7.is_empty() {
            return;
        }
        if !matches!(packet.l4_proto, L4Proto::Tcp | L4Proto::Udp | L4Proto::Sctp) {
            return;
        }
        if !packet.first_fragment {
            return;
        }

        let quic = ctx.quic;
        let data: &[u8] = if quic {
            match ctx.decrypted_initial.as_deref() {
                Some(d) => d,
                // a QUIC flow whose payload was not decryptable
                None => return,
            }
        } else {
            packet.l7
        };

        let mut buf = ByteCursor::new(data);

        if self.cfg.analyze_ovpn && !quic {
            let f = &mut self.flows[idx];
            if openvpn::is_openvpn(&mut buf, packet, f) {
                let was_ovpn = f.proto.contains(TlsProto::OVPN);
                let cont = openvpn::process_openvpn(&mut buf, f);
                if f.proto.contains(TlsProto::OVPN) && !was_ovpn {
                    self.num_ovpn += 1;
                }
                if !cont {
                    return;
                }
            }
        }

        while buf.left() >= TLS_RT_HDR_LEN {
            let mut rec = RecordHeader::default();
            let ok = if quic {
                Self::quic_record_header(&mut buf, &mut rec)
            } else {
                Self::read_record_header(&mut self.flows[idx], &mut buf, &mut rec)
            };
            if !ok {
                return;
            }

            if rec.len > TLS_RT_MAX_LEN {
                self.flows[idx].stat |= TlsStat::REC_TOO_LONG;
                return;
            }

            self.flows[idx].version = rec.version;

            if !self.flows[idx].rec_ver.contains(&rec.version) {
                let f = &mut self.flows[idx];
                push_bounded(
                    &mut f.rec_ver,
                    rec.version,
                    TLS_MAX_REC_VER,
                    &mut f.stat,
                    TlsStat::REC_VER_TRUNC,
                );
                f.num_rec_ver += 1;
            }

            let rec_start = buf.tell();

            match rec.typ {
                TLS_RT_APPLICATION_DATA => {
                    // encrypted
                    self.flows[idx].num_app_data += 1;
                }

                TLS_RT_CHANGE_CIPHER_SPEC => {
                    let f = &mut self.flows[idx];
                    let one = tls_read_ret!(f, buf, read_u8);
                    if one != 1 {
                        f.stat |= TlsStat::MALFORMED;
                    }
                    f.num_change_cipher += 1;
                }

                TLS_RT_ALERT => {
                    let f = &mut self.flows[idx];
                    f.num_alert += 1;

                    let level = tls_read_ret!(f, buf, read_u8);
                    let descr = tls_read_ret!(f, buf, read_u8);

                    if level == TLS_AL_WARN || level == TLS_AL_FATAL {
                        if level == TLS_AL_FATAL {
                            f.stat |= TlsStat::AL_FATAL;
                        }
                        if descr < 64 {
                            f.alert |= 1u64 << descr;
                        }
                    }
                    // other levels: encrypted or malformed
                }

                TLS_RT_HANDSHAKE => {
                    if !self.process_handshake_record(&mut buf, &rec, rec_start, idx, flow, packet)
                    {
                        return;
                    }
                }

                TLS_RT_HEARTBEAT => {
                    let f = &mut self.flows[idx];
                    f.num_heartbeat += 1;

                    let typ = tls_read_ret!(f, buf, read_u8);
                    let len = tls_read_ret!(f, buf, read_u16);

                    if typ != TLS_HB_REQUEST && typ != TLS_HB_RESPONSE {
                        f.stat |= TlsStat::MALFORMED;
                    }

                    if len > rec.len {
                        // claims more payload than the record: Heartbleed
                        f.vuln |= TlsVuln::HEART;
                        return;
                    }

                    buf.skip_n(len as usize);

                    let padding = rec.len.saturating_sub(len).saturating_sub(TLS_HB_HDR_LEN);
                    if padding < TLS_HB_MIN_PAD_LEN {
                        f.stat |= TlsStat::MALFORMED;
                    }
                    buf.skip_n(padding as usize);
                }

                _ => {
                    // encrypted or not ssl
                }
            }

            // skip to the next record
            let consumed = buf.tell() - rec_start;
            let shift = (rec.len as usize).saturating_sub(consumed);
            if shift > 0 && !buf.skip_n(shift) {
                return;
            }
        }
    }

    fn on_flow_terminate(&mut self, idx: FlowIndex, flow: &FlowView, out: &mut OutputBuffer) {
        let valid = self.flows[idx].version != 0;

        if valid {
            // resolve the negotiated version: the reverse flow's first
            // non-GREASE supported version wins, then our own
            let mut updated = false;
            if flow.is_a() {
                if let Some(o) = flow.opposite {
                    if let Some(&v) = self.flows[o].supp_ver.iter().find(|v| !tls_is_grease(**v))
                    {
                        self.flows[idx].version = v;
                        updated = true;
                    }
                }
            }
            if !updated {
                if let Some(&v) = self.flows[idx].supp_ver.iter().find(|v| !tls_is_grease(**v)) {
                    self.flows[idx].version = v;
                }
            }

            let version = self.flows[idx].version;
            if tls_v_is_tls13_fb_draft(version) {
                self.num_tls13_fb[(version == TLS13_FBD26) as usize] += 1;
            } else if tls_v_is_tls13_draft(version) {
                self.num_tls13_draft[(version - TLS13_D14) as usize] += 1;
            } else if version == SSLV2 {
                self.num_sslv2 += 1;
            } else if tls_v_is_ssl(version) {
                self.num_sslv3[(version & 0xff) as usize] += 1;
            } else if tls_v_is_dtls(version) {
                let i = match version {
                    DTLS10 => 0,
                    DTLS12 => 1,
                    DTLS13 => 2,
                    _ => 3,
                };
                self.num_dtls[i] += 1;
            }
        } else {
            // fix erroneous early detection
            let f = &mut self.flows[idx];
            if f.proto.is_empty() {
                f.stat = TlsStat::empty();
            }
            f.vuln = TlsVuln::empty();
            f.num_change_cipher = 0;
            f.num_alert = 0;
            f.num_handshake = 0;
            f.num_app_data = 0;
            f.num_heartbeat = 0;
        }

        let f = &self.flows[idx];
        self.agg_stat |= f.stat;
        self.agg_proto |= f.proto;
        if f.is_tor {
            self.num_tor += 1;
        }

        out.append_u32(f.stat.bits());
        out.append_u32(f.proto.bits());
        if self.cfg.analyze_ovpn {
            out.append_u16(f.ovpn_type);
            out.append_u64(f.ovpn_sess_id);
        }
        out.append_u8(f.flags.bits());
        out.append_u16(f.version);

        out.append_u16(f.num_rec_ver);
        append_list_u16(out, &f.rec_ver);
        out.append_u16(f.num_hand_ver);
        append_list_u16(out, &f.hand_ver);

        out.append_u8(f.vuln.bits());
        out.append_u64(f.alert);
        out.append_u16(f.cipher);

        out.append_u16(f.num_ext);
        append_list_u16(out, &f.ext_list);
        out.append_u16(f.num_supp_ver);
        append_list_u16(out, &f.supp_ver);
        out.append_u16(f.num_sig_alg);
        append_list_u16(out, &f.sig_alg);
        out.append_u16(f.num_ec);
        append_list_u16(out, &f.ec);
        out.append_u8(f.num_ec_formats);
        out.append_count(f.ec_formats.len() as u32);
        for &v in &f.ec_formats {
            out.append_u8(v);
        }
        out.append_u16(f.num_alpn);
        append_list_str(out, &f.alpn_list);
        out.append_u16(f.num_alps);
        append_list_str(out, &f.alps_list);
        out.append_u16(f.num_npn);
        append_list_str(out, &f.npn_list);
        out.append_u16(f.num_cipher);
        append_list_u16(out, &f.cipher_list);

        out.append_u16(f.num_change_cipher);
        out.append_u16(f.num_alert);
        out.append_u16(f.num_handshake);
        out.append_u64(f.num_app_data);
        out.append_u64(f.num_heartbeat);

        out.append_u8(f.session_len);

        if !valid {
            out.append_count(0); // sslGMTTime
            out.append_count(0); // sslServerName
            cert::append_cert_empty(out, &self.cfg);
        } else {
            if f.gmt_time == 0 {
                out.append_count(0);
            } else {
                out.append_count(1);
                out.append_timestamp(f.gmt_time as u64, 0);
            }

            // borrow the server name from the reverse flow when absent
            let sni = if f.server_name.is_empty() {
                flow.opposite
                    .map(|o| self.flows[o].server_name.as_str())
                    .unwrap_or("")
            } else {
                f.server_name.as_str()
            };
            out.append_opt_str(sni);

            cert::append_cert_values(out, &f.cert, &self.cfg);
        }

        if self.lists.blist.is_some() {
            out.append_opt_str(&f.blist_cat);
        }

        out.append_opt_str(&f.ja3_hash);
        out.append_opt_str(&f.ja3_desc);
        if self.cfg.ja3_str {
            out.append_opt_str(&f.ja3_str);
        }
        out.append_opt_str(&f.ja4);
        out.append_opt_str(&f.ja4_desc);
        if self.cfg.ja4_o {
            out.append_opt_str(&f.ja4_o);
        }
        if self.cfg.ja4_r {
            out.append_opt_str(&f.ja4_r);
        }
        if self.cfg.ja4_ro {
            out.append_opt_str(&f.ja4_ro);
        }
        if self.cfg.detect_tor {
            out.append_u8(f.is_tor as u8);
        }
    }

    fn plugin_report(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "tls: aggregated sslStat=0x{:08x}", self.agg_stat.bits())?;
        writeln!(w, "tls: aggregated sslProto=0x{:08x}", self.agg_proto.bits())?;
        if self.cfg.analyze_ovpn {
            writeln!(w, "tls: number of OpenVPN flows: {}", self.num_ovpn)?;
        }
        if self.cfg.detect_tor {
            writeln!(w, "tls: number of Tor flows: {}", self.num_tor)?;
        }
        writeln!(w, "tls: number of SSL 2.0 flows: {}", self.num_sslv2)?;
        let names = ["SSL 3.0", "TLS 1.0", "TLS 1.1", "TLS 1.2", "TLS 1.3"];
        for (i, name) in names.iter().enumerate() {
            writeln!(w, "tls: number of {name} flows: {}", self.num_sslv3[i])?;
        }
        for (i, n) in self.num_tls13_draft.iter().enumerate() {
            if *n > 0 {
                writeln!(w, "tls: number of TLS 1.3 (draft {}) flows: {n}", i + 14)?;
            }
        }
        for (i, n) in self.num_tls13_fb.iter().enumerate() {
            if *n > 0 {
                let d = if i == 0 { 23 } else { 26 };
                writeln!(w, "tls: number of TLS 1.3 (Facebook draft {d}) flows: {n}")?;
            }
        }
        let dtls = ["DTLS 1.0", "DTLS 1.2", "DTLS 1.3", "DTLS 1.0 (OpenSSL pre 0.9.8f)"];
        for (i, name) in dtls.iter().enumerate() {
            if self.num_dtls[i] > 0 {
                writeln!(w, "tls: number of {name} flows: {}", self.num_dtls[i])?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.flows.clear();
    }
}

/// SSLv2 fallback when the first byte is not a valid record type.
fn process_sslv2(f: &mut TlsFlow, buf: &mut ByteCursor) {
    const SIZEOF_SSLV2: usize = 5;

    if buf.left() < SIZEOF_SSLV2 {
        return;
    }

    let (Some(len), Some(typ), Some(v_major), Some(v_minor)) =
        (buf.read_u16(), buf.read_u8(), buf.read_u8(), buf.read_u8())
    else {
        f.stat |= TlsStat::SNAP;
        return;
    };

    // SSLv2 message types: 1..=8
    if typ == 0 || typ > 8 {
        return; // probably not SSL
    }

    let len = if len & 0x8000 != 0 {
        // no padding, 2-byte record header
        (len & 0x7fff) + 2
    } else {
        // padding, 3-byte record header
        (len & 0x3fff) + 3
    };

    if (len as usize).saturating_sub(SIZEOF_SSLV2) > buf.left() {
        return; // snapped or not SSL
    }

    let version = (v_major as u16) << 8 | v_minor as u16;
    if f.version != SSLV2 && (version == SSLV2 || !tls_v_is_ssl(version)) {
        return; // probably not SSL
    }

    f.version = version; // can be SSLv3 or TLS 1.x
    if version == SSLV2 {
        f.stat |= TlsStat::WEAK_PROTO;
        f.flags |= TlsFlags::V2;
    }
}

fn append_list_u16(out: &mut OutputBuffer, list: &[u16]) {
    out.append_count(list.len() as u32);
    for &v in list {
        out.append_u16(v);
    }
}

fn append_list_str(out: &mut OutputBuffer, list: &[String]) {
    out.append_count(list.len() as u32);
    for v in list {
        out.append_str(v);
    }
}

#[cfg(test)]
mod tests;
