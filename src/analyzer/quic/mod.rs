/*!
QUIC flow analyzer.

A flow is marked QUIC when it is UDP on port 443/4433, first seen after
2015 and the first payload byte carries the fixed bit. Long and short
headers are parsed across the draft versions, v1 and v2; for Initial
packets the payload is unprotected and decrypted with the version salts so
the carried TLS ClientHello/ServerHello becomes visible to the TLS
analyzer. Any decryption failure only suppresses that hand-off.
*/
pub mod crypto;
pub mod frames;

pub use frames::QuicBufExt;

use std::io::{self, Write};

use log::{debug, warn};

use crate::buffer::ByteCursor;
use crate::error::ParserError;
use crate::models::quic::*;
use crate::models::{FlowIndex, FlowView, L4Proto, PacketView, Schema};
use crate::output::OutputBuffer;

use super::{FlowAnalyzer, PacketContext};

/// Per-flow state, reset on flow creation.
#[derive(Debug, Clone, Default)]
pub struct QuicFlow {
    pub stat: QuicStat,
    pub flags: u8,
    /// Bitset of long-header packet types seen.
    pub pkt_types: u8,
    pub version: u32,
    pub dst_cid: QuicCid,
    pub src_cid: QuicCid,
    /// Original destination connection id (Retry).
    pub orig_cid: QuicCid,
    /// First client DCID; key material for Initial packets of both
    /// directions, copied from the opposite flow on the server side.
    pub first_dst_cid: QuicCid,
}

#[derive(Default)]
pub struct QuicAnalyzer {
    flows: Vec<QuicFlow>,
    agg_stat: QuicStat,
    num_pkts: u64,
    num_type: [u64; QUIC_NUM_PKT_TYPE],
}

impl QuicAnalyzer {
    pub fn new() -> QuicAnalyzer {
        QuicAnalyzer::default()
    }

    pub fn flow(&self, idx: FlowIndex) -> &QuicFlow {
        &self.flows[idx]
    }

    fn dissect_short(&mut self, buf: &mut ByteCursor, idx: FlowIndex) -> bool {
        let f = &mut self.flows[idx];

        if f.dst_cid.is_empty() {
            debug!("first QUIC packet has a short header, cannot guess DCID length");
            return false;
        }

        let mut dcid = [0u8; QUIC_CID_BYTES_MAX];
        let len = f.dst_cid.len();
        if !buf.read_n(&mut dcid[..len]) {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }

        if dcid[..len] != *f.dst_cid.as_bytes() {
            f.stat |= QuicStat::DCID_CHANGE;
        }
        f.dst_cid = QuicCid::new(&dcid[..len]);

        true
    }

    #[allow(clippy::too_many_lines)]
    fn dissect_long(
        &mut self,
        buf: &mut ByteCursor,
        packet: &PacketView,
        idx: FlowIndex,
        flags: u8,
        client: bool,
        ctx: &mut PacketContext,
    ) -> bool {
        let pkt_type = quic_pkt_type(flags);
        self.num_type[pkt_type as usize] += 1;

        let f = &mut self.flows[idx];
        if pkt_type == QUIC_PKT_TYPE_HANDSHAKE {
            f.stat |= QuicStat::HANDSHAKE;
        }
        f.pkt_types |= 1 << pkt_type;

        let Some(version) = buf.read_u32() else {
            f.stat |= QuicStat::SNAPPED;
            return false;
        };
        if version == 0 {
            f.stat |= QuicStat::VERSION_NEGO;
        } else if f.version != 0 && f.version != version {
            f.stat |= QuicStat::VERSION_CHANGE;
        }
        f.version = version;

        let Some(len_byte) = buf.read_u8() else {
            f.stat |= QuicStat::SNAPPED;
            return false;
        };

        if version == 0 || version == QUIC_V1 || version == QUIC_V2 {
            // explicit one-byte connection-id lengths
            let dcid_len = (len_byte as usize).min(QUIC_CID_BYTES_MAX);
            let mut cid = [0u8; QUIC_CID_BYTES_MAX];
            if !buf.read_n(&mut cid[..dcid_len]) {
                f.stat |= QuicStat::SNAPPED;
                return false;
            }
            if !f.dst_cid.is_empty() && f.dst_cid.as_bytes() != &cid[..dcid_len] {
                f.stat |= QuicStat::DCID_CHANGE;
            }
            f.dst_cid = QuicCid::new(&cid[..dcid_len]);

            let Some(scid_len) = buf.read_u8() else {
                f.stat |= QuicStat::SNAPPED;
                return false;
            };
            let scid_len = (scid_len as usize).min(QUIC_CID_BYTES_MAX);
            if !buf.read_n(&mut cid[..scid_len]) {
                f.stat |= QuicStat::SNAPPED;
                return false;
            }
            if !f.src_cid.is_empty() && f.src_cid.as_bytes() != &cid[..scid_len] {
                f.stat |= QuicStat::SCID_CHANGE;
            }
            f.src_cid = QuicCid::new(&cid[..scid_len]);
        } else {
            // draft versions: high/low nibbles plus three
            let dcid_len = 3 + (len_byte >> 4) as usize;
            let scid_len = 3 + (len_byte & 0x0f) as usize;

            if dcid_len > 3 {
                let mut cid = [0u8; QUIC_CID_BYTES_MAX];
                if !buf.read_n(&mut cid[..dcid_len]) {
                    f.stat |= QuicStat::SNAPPED;
                    return false;
                }
                if !f.dst_cid.is_empty() && f.dst_cid.as_bytes() != &cid[..dcid_len] {
                    f.stat |= QuicStat::DCID_CHANGE;
                }
                f.dst_cid = QuicCid::new(&cid[..dcid_len]);
            }

            if scid_len > 3 {
                let mut cid = [0u8; QUIC_CID_BYTES_MAX];
                if !buf.read_n(&mut cid[..scid_len]) {
                    f.stat |= QuicStat::SNAPPED;
                    return false;
                }
                if !f.src_cid.is_empty() && f.src_cid.as_bytes() != &cid[..scid_len] {
                    f.stat |= QuicStat::SCID_CHANGE;
                }
                f.src_cid = QuicCid::new(&cid[..scid_len]);
            }
        }

        // key material for Initial decryption, shared with the B side
        if client && f.first_dst_cid.is_empty() && !f.dst_cid.is_empty() {
            f.first_dst_cid = f.dst_cid;
        }

        if version == 0 {
            // version negotiation: list of supported versions
            let Some(supported) = buf.read_u32() else {
                f.stat |= QuicStat::SNAPPED;
                return false;
            };
            debug!("supported version: 0x{supported:08x}");
            return true;
        }

        if pkt_type == QUIC_PKT_TYPE_RETRY {
            return self.dissect_retry(buf, idx);
        }

        if pkt_type != QUIC_PKT_TYPE_INITIAL {
            return true;
        }

        /* Initial packet: token, length, protected packet number, payload */

        let Some(toklen) = buf.read_quic_varint() else {
            f.stat |= QuicStat::SNAPPED;
            return false;
        };
        if !buf.skip_n(toklen as usize) {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }

        let Some(len) = buf.read_quic_varint() else {
            f.stat |= QuicStat::SNAPPED;
            return false;
        };

        // the packet number and payload can only be decrypted in Initial
        // packets; everything later needs the session keys
        if f.first_dst_cid.is_empty() {
            debug!("missing first destination connection id: cannot decrypt");
            return false;
        }
        let Some(secret) = crypto::initial_secret(f.first_dst_cid.as_bytes(), client, version)
        else {
            debug!("failed to compute the Initial secret");
            return false;
        };

        let hdr_size = buf.tell();
        let left = buf.left();
        if left == 0 || len > left as u64 {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }
        let len = len as usize;
        if len < crypto::AES_BLOCK_LEN + 4 {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }
        if len > QUIC_MAX_INITIAL_PKT_LEN {
            warn!("Initial packet too large for decryption: {len}");
            return false;
        }
        let payload = buf.read_bytes(len).unwrap();

        // unprotect the flag bits and the packet number
        let sample: [u8; crypto::HP_SAMPLE_LEN] = payload[4..4 + crypto::HP_SAMPLE_LEN]
            .try_into()
            .unwrap();
        let Some(mask) = crypto::header_protection_mask(&sample, &secret) else {
            debug!("failed to compute the header-protection mask");
            return false;
        };

        let clear_flags = flags ^ (mask[0] & 0x0f);
        let pn_len = (quic_pkt_num_len(clear_flags) + 1) as usize;

        let mut aad = Vec::with_capacity(hdr_size + pn_len);
        aad.extend_from_slice(&packet.l7[..hdr_size]);
        aad[0] ^= mask[0] & 0x0f;

        let mut pktnum = 0u64;
        for i in 0..pn_len {
            let b = payload[i] ^ mask[i + 1];
            pktnum = (pktnum << 8) | b as u64;
            aad.push(b);
        }

        match crypto::decrypt_payload(&secret, &payload[pn_len..], pktnum, &aad) {
            Some(plain) => {
                ctx.decrypted_initial = Some(plain);
                true
            }
            None => {
                debug!("failed to decrypt the Initial packet payload");
                false
            }
        }
    }

    fn dissect_retry(&mut self, buf: &mut ByteCursor, idx: FlowIndex) -> bool {
        let f = &mut self.flows[idx];

        let Some(len_byte) = buf.read_u8() else {
            f.stat |= QuicStat::SNAPPED;
            return false;
        };
        let ocid_len = 3 + (len_byte & 0x0f) as usize;

        let mut cid = [0u8; QUIC_CID_BYTES_MAX];
        if !buf.read_n(&mut cid[..ocid_len]) {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }
        if !f.orig_cid.is_empty() && f.orig_cid.as_bytes() != &cid[..ocid_len] {
            f.stat |= QuicStat::ODCID_CHANGE;
        }
        f.orig_cid = QuicCid::new(&cid[..ocid_len]);

        // retry token
        let mut tok = [0u8; 20];
        if !buf.read_n(&mut tok) {
            f.stat |= QuicStat::SNAPPED;
            return false;
        }

        true
    }
}

impl FlowAnalyzer for QuicAnalyzer {
    fn name(&self) -> &'static str {
        "quic"
    }

    fn init(&mut self, flow_capacity: usize) -> Result<(), ParserError> {
        self.flows = vec![QuicFlow::default(); flow_capacity];
        Ok(())
    }

    fn print_header(&self) -> Schema {
        let mut bv = Schema::new();
        bv.append_h8("quicStat", "QUIC status");
        bv.append_h32("quicVersion", "QUIC version");
        bv.append_h8("quicFlags", "QUIC flags");
        bv.append_h8("quicPktTypes", "QUIC packet types");
        bv.append_strc("quicDCID", "QUIC destination connection ID");
        bv.append_strc("quicSCID", "QUIC source connection ID");
        bv.append_strc("quicODCID", "QUIC original destination connection ID (Retry)");
        bv
    }

    fn on_new_flow(&mut self, packet: &PacketView, flow: &FlowView, idx: FlowIndex) {
        let f = &mut self.flows[idx];
        *f = QuicFlow::default();

        if flow.l4_proto != L4Proto::Udp {
            return;
        }
        if flow.first_seen_secs < QUIC_TSTAMP_2015 {
            return;
        }
        let ports = [flow.src_port, flow.dst_port];
        if !ports.contains(&QUIC_PORT_1) && !ports.contains(&QUIC_PORT_2) {
            return;
        }
        // QUIC packets always carry the fixed bit
        match packet.l7.first() {
            Some(&b) if quic_fixed_bit(b) => f.stat |= QuicStat::QUIC,
            _ => {}
        }
    }

    fn on_layer4(
        &mut self,
        packet: &PacketView,
        flow: &FlowView,
        idx: FlowIndex,
        ctx: &mut PacketContext,
    ) {
        if !packet.first_fragment {
            return;
        }
        if !self.flows[idx].stat.contains(QuicStat::QUIC) {
            return;
        }
        ctx.quic = true;

        self.num_pkts += 1;

        let client = flow.is_a();

        // server flows derive Initial keys from the client's first DCID
        if !client && self.flows[idx].first_dst_cid.is_empty() {
            if let Some(o) = flow.opposite {
                self.flows[idx].first_dst_cid = self.flows[o].first_dst_cid;
            } else {
                debug!("server flow without an opposite flow");
            }
        }

        let mut buf = ByteCursor::new(packet.l7);

        let Some(flags) = buf.read_u8() else {
            self.flows[idx].stat |= QuicStat::SNAPPED;
            return;
        };
        self.flows[idx].flags |= flags;

        // one record per datagram; coalesced packets are not handled
        if quic_has_long_header(flags) {
            self.dissect_long(&mut buf, packet, idx, flags, client, ctx);
        } else {
            self.dissect_short(&mut buf, idx);
        }
    }

    fn on_flow_terminate(&mut self, idx: FlowIndex, _flow: &FlowView, out: &mut OutputBuffer) {
        let f = &self.flows[idx];

        self.agg_stat |= f.stat;

        out.append_u8(f.stat.bits());
        out.append_u32(f.version);
        out.append_u8(f.flags);
        out.append_u8(f.pkt_types);
        out.append_str(&f.dst_cid.to_hex());
        out.append_str(&f.src_cid.to_hex());
        out.append_str(&f.orig_cid.to_hex());
    }

    fn plugin_report(&self, w: &mut dyn Write) -> io::Result<()> {
        if self.num_pkts == 0 {
            return Ok(());
        }
        writeln!(w, "quic: aggregated quicStat=0x{:02x}", self.agg_stat.bits())?;
        writeln!(w, "quic: number of QUIC packets: {}", self.num_pkts)?;
        let percent = 100.0 / self.num_pkts as f64;
        for (i, n) in self.num_type.iter().enumerate() {
            if *n > 0 {
                writeln!(
                    w,
                    "quic: number of QUIC {} packets: {} [{:.2}%]",
                    QUIC_PKT_TYPE_STR[i],
                    n,
                    *n as f64 * percent
                )?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.flows.clear();
    }
}
