/*!
BGP-4 flow analyzer.

A flow is marked BGP when it is TCP and one side uses port 179. Every
packet on a marked flow is treated as a stream of BGP records: 16-byte
all-ones marker (resynchronized by searching forward when missing), 16-bit
length, 8-bit type, then the per-type body. The analyzer keeps aggregated
statistics per flow, feeds a process-wide routing table with best-path
replacement and MOAS detection, and logs anomalies out of band.
*/
mod anomaly;
mod routing;

pub use routing::{AdvertiseOutcome, RouteCandidate, RoutingTable};

use std::io::{self, SeekFrom, Write};

use log::{debug, warn};

use crate::buffer::ByteCursor;
use crate::error::ParserError;
use crate::models::*;
use crate::output::OutputBuffer;

use self::anomaly::{AnomalyLog, MoasLog};
use super::{FlowAnalyzer, PacketContext};

/// Runtime settings; the defaults match the shipped feature matrix.
#[derive(Debug, Clone, Copy)]
pub struct BgpConfig {
    /// Emit one routing-table text row per UPDATE.
    pub output_rt: bool,
    /// Flag prefixes from the traditional reserved IPv4 ranges.
    pub trad_bogons: bool,
    /// Key the routing table on (prefix, mask) instead of prefix alone.
    pub rt_mask_in_key: bool,
    /// Collapse AS-path prepend repetitions in the routing text output.
    pub as_path_aggr: bool,
}

impl Default for BgpConfig {
    fn default() -> Self {
        BgpConfig {
            output_rt: true,
            trad_bogons: true,
            rt_mask_in_key: false,
            as_path_aggr: false,
        }
    }
}

/// Per-flow state, reset on flow creation.
#[derive(Debug, Clone, Default)]
pub struct BgpFlow {
    pub num_t: [u32; 6],
    pub hdrlen: u16,
    pub stat: BgpStat,
    pub aflgs: BgpAnomaly,

    pub notif: [u8; 2],

    last_ka: f64,
    pub min_iat_ka: f64,
    pub max_iat_ka: f64,
    pub avg_iat_ka: f64,

    pub msg_t: u8,

    pub version: u8,
    pub caps: BgpCaps,
    pub htime: u16,
    pub src_as: u32,
    pub dst_as: u32,
    pub src_id: u32,
    pub dst_id: u32,
    pub attr: u32,

    pub nadver: u32,
    pub nwdrwn: u32,
    pub maxadver: u32,
    pub maxwdrwn: u32,
    pub advpref: u32,
    pub wdrnpref: u32,
    pub origin: [u32; 3],
    nasp: u32,
    pub maxnprepas: u32,
    pub minasplen: u8,
    pub maxasplen: u8,
    pub avgasplen: f64,
    pub avgadver: f64,
    pub avgwdrwn: f64,
    lastup: f64,
    pub min_iat_up: f64,
    pub max_iat_up: f64,
    pub avg_iat_up: f64,

    now: f64,
}

/// Workspace for the UPDATE record currently being parsed.
#[derive(Debug, Default)]
struct BgpUpdate {
    withdrawn: Vec<BgpNlri>,
    orig: u8,
    /// Index into `aspath` where the AS4_PATH starts, if present.
    nas4: usize,
    aspath: Vec<AsPathSegment>,
    nexthop: u32,
    med: u32,
    locpref: u32,
    nlri: Vec<BgpNlri>,
    orig_id: u32,
    aggr: [u32; 2],
    cluster: Vec<u32>,
    comm: Vec<(u16, u16)>,
}

impl BgpUpdate {
    fn reset(&mut self) {
        self.withdrawn.clear();
        self.orig = 0;
        self.nas4 = 0;
        self.aspath.clear();
        self.nexthop = 0;
        self.med = 0;
        self.locpref = 0;
        self.nlri.clear();
        self.orig_id = 0;
        self.aggr = [0; 2];
        self.cluster.clear();
        self.comm.clear();
    }
}

pub struct BgpAnalyzer {
    cfg: BgpConfig,
    flows: Vec<BgpFlow>,
    update: BgpUpdate,
    rt: RoutingTable,
    anom: AnomalyLog,
    moas: MoasLog,
    rt_out: Option<Box<dyn Write>>,

    agg_stat: BgpStat,
    agg_aflgs: BgpAnomaly,
    agg_caps: BgpCaps,
    agg_attr: u32,
    num_bgp: [u64; 6],
    /// Record counter within the packet being parsed.
    rec: u32,
}

/// Bounded read in record-decoder context: a short buffer flags the flow
/// as snapped and aborts the packet.
macro_rules! bgp_read {
    ($flow:expr, $buf:expr, $m:ident) => {
        match $buf.$m() {
            Some(v) => v,
            None => {
                $flow.stat |= BgpStat::SNAPLEN;
                return false;
            }
        }
    };
}

macro_rules! bgp_skip {
    ($flow:expr, $buf:expr, $n:expr) => {
        if !$buf.skip_n($n) {
            $flow.stat |= BgpStat::SNAPLEN;
            return false;
        }
    };
}

impl BgpAnalyzer {
    pub fn new(
        cfg: BgpConfig,
        anom_writer: Box<dyn Write>,
        moas_writer: Box<dyn Write>,
        rt_writer: Option<Box<dyn Write>>,
    ) -> io::Result<BgpAnalyzer> {
        let anom = AnomalyLog::new(anom_writer)?;
        let moas = MoasLog::new(moas_writer)?;
        let mut rt_out = rt_writer;
        if let Some(w) = &mut rt_out {
            writeln!(
                w,
                "%NLRI\tAS\tNextHop\tMED\tLocPref\tOrigin\tOriginAS\tUpstreamAS\tDestAS\
                 \tASPath\tASPathLen\tMaxNPrepAS\tWithdrawnRoutes\tflowInd\tpktNo\tRecNum\ttime"
            )?;
        }
        Ok(BgpAnalyzer {
            rt: RoutingTable::new(cfg.rt_mask_in_key),
            cfg,
            flows: Vec::new(),
            update: BgpUpdate::default(),
            anom,
            moas,
            rt_out,
            agg_stat: BgpStat::empty(),
            agg_aflgs: BgpAnomaly::empty(),
            agg_caps: BgpCaps::empty(),
            agg_attr: 0,
            num_bgp: [0; 6],
            rec: 0,
        })
    }

    /// Flow state accessor for tests and cross-analyzer consumers.
    pub fn flow(&self, idx: FlowIndex) -> &BgpFlow {
        &self.flows[idx]
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.rt
    }

    fn decode_open(&mut self, buf: &mut ByteCursor, idx: FlowIndex, flow: &FlowView) -> bool {
        let f = &mut self.flows[idx];

        f.version = bgp_read!(f, buf, read_u8);
        if f.version != 4 {
            f.stat |= BgpStat::VERSION;
        }

        let my_as = bgp_read!(f, buf, read_u16);
        f.src_as = my_as as u32;

        f.htime = bgp_read!(f, buf, read_u16);
        if f.htime == 1 || f.htime == 2 {
            f.stat |= BgpStat::HTIME;
        }

        f.src_id = bgp_read!(f, buf, read_u32);

        if let Some(o) = flow.opposite {
            let (src_as, src_id) = (self.flows[idx].src_as, self.flows[idx].src_id);
            self.flows[o].dst_as = src_as;
            self.flows[o].dst_id = src_id;
            let (oas, oid) = (self.flows[o].src_as, self.flows[o].src_id);
            self.flows[idx].dst_as = oas;
            self.flows[idx].dst_id = oid;
        }

        let f = &mut self.flows[idx];
        let mut optlen = bgp_read!(f, buf, read_u8) as i32;

        while buf.left() >= 2 && optlen >= 2 {
            let ptype = bgp_read!(f, buf, read_u8);
            if ptype != 2 {
                // only capability parameters are understood
                return true;
            }

            let mut caplen = bgp_read!(f, buf, read_u8) as i32;
            optlen = (optlen - caplen - 2).max(0);

            while buf.left() >= 2 && caplen >= 2 {
                let ctype = bgp_read!(f, buf, read_u8);
                let len = bgp_read!(f, buf, read_u8);
                caplen = (caplen - len as i32 - 2).max(0);

                match ctype {
                    BGP_C_GRACE_RESTART => f.caps |= BgpCaps::GRACE_RESTART,
                    BGP_C_AS4 => {
                        f.caps |= BgpCaps::AS4;
                        let asn = bgp_read!(f, buf, read_u32);
                        if asn != f.src_as && f.src_as != BGP_AS_TRANS {
                            f.stat |= BgpStat::AS_MISMATCH;
                        }
                        f.src_as = asn;
                        buf.seek(SeekFrom::Current(-4));
                    }
                    BGP_C_DYNAMIC => f.caps |= BgpCaps::DYNAMIC,
                    BGP_C_MULTISESSION => f.caps |= BgpCaps::MULTISESSION,
                    BGP_C_ADD_PATH => f.caps |= BgpCaps::ADD_PATH,
                    BGP_C_ENH_REFRESH => f.caps |= BgpCaps::ENH_REFRESH,
                    BGP_C_LLGR => f.caps |= BgpCaps::LLGR,
                    BGP_C_FQDN => f.caps |= BgpCaps::FQDN,
                    1..=5 => {
                        f.caps |= BgpCaps::from_bits_retain(1 << (ctype - 1));
                    }
                    _ => {
                        debug!("unhandled capability type {ctype}");
                        f.caps |= BgpCaps::OTHER;
                    }
                }

                bgp_skip!(f, buf, len as usize);
            }
        }

        true
    }

    #[allow(clippy::too_many_lines)]
    fn decode_update(
        &mut self,
        buf: &mut ByteCursor,
        idx: FlowIndex,
        flow: &FlowView,
        pkt_num: u64,
    ) -> bool {
        let rec = self.rec;
        let Self { flows, update, rt, anom, moas, cfg, rt_out, .. } = self;
        let f = &mut flows[idx];

        update.reset();

        // inter-arrival statistics; no IAT for the first update
        if f.num_t[BgpMessageType::Update.index()] > 1 {
            let iat = f.now - f.lastup;
            if iat > 0.0 {
                if f.num_t[BgpMessageType::Update.index()] == 2 {
                    f.min_iat_up = iat;
                    f.max_iat_up = iat;
                    f.avg_iat_up = iat;
                } else {
                    f.min_iat_up = f.min_iat_up.min(iat);
                    f.max_iat_up = f.max_iat_up.max(iat);
                    f.avg_iat_up +=
                        (iat - f.avg_iat_up) / (f.num_t[BgpMessageType::Update.index()] - 1) as f64;
                }
            } else if !f.stat.contains(BgpStat::IAT) {
                debug!("pkt {pkt_num}: IAT < 0");
                f.stat |= BgpStat::IAT;
            }
        }
        f.lastup = f.now;

        let num_updates = f.num_t[BgpMessageType::Update.index()];
        let finalize_wdrwn = |f: &mut BgpFlow, nwdrwn: u32| {
            f.maxwdrwn = f.maxwdrwn.max(nwdrwn);
            if num_updates == 1 {
                f.avgwdrwn = nwdrwn as f64;
            } else {
                f.avgwdrwn += (nwdrwn as f64 - f.avgwdrwn) / num_updates as f64;
            }
        };
        let finalize_adver = |f: &mut BgpFlow, nadver: u32| {
            f.maxadver = f.maxadver.max(nadver);
            if num_updates == 1 {
                f.avgadver = nadver as f64;
            } else {
                f.avgadver += (nadver as f64 - f.avgadver) / num_updates as f64;
            }
        };

        /* Withdrawn Routes */
        let wr_len = bgp_read!(f, buf, read_u16);
        let mut wr = wr_len as i32;
        let mut nwdrwn = 0u32;
        while wr > 1 {
            let mut nlri = BgpNlri::default();
            nlri.mask = bgp_read!(f, buf, read_u8);
            if nlri.mask > 32 {
                f.stat |= BgpStat::INVMASK;
                return false;
            }
            if nlri.mask > 0 {
                f.wdrnpref |= 1 << (nlri.mask - 1);
            }

            f.nwdrwn += 1;
            nwdrwn += 1;

            let s = (nlri.mask as usize + 7) / 8;
            if buf.left() < s {
                // record is snapped: settle statistics and give up
                f.stat |= BgpStat::SNAPLEN;
                finalize_wdrwn(f, nwdrwn);
                return false;
            }
            buf.read_n(&mut nlri.prefix[..s]);

            if update.withdrawn.len() < BGP_ASIZE {
                update.withdrawn.push(nlri);
            } else if !f.stat.contains(BgpStat::AFULL) {
                warn!("pkt {pkt_num}: array for withdrawn routes is full");
                f.stat |= BgpStat::AFULL;
            }

            wr -= 1 + s as i32;

            rt.withdraw(&nlri);
        }
        finalize_wdrwn(f, nwdrwn);

        /* Path Attributes */
        let tpa_len = bgp_read!(f, buf, read_u16);
        let mut tpa = tpa_len as i32;
        let mut nlri_len = f.hdrlen as i32 - 23 - tpa_len as i32 - wr_len as i32;

        while tpa >= 3 {
            let attr_flags = bgp_read!(f, buf, read_u8);
            let type_code = bgp_read!(f, buf, read_u8);
            if (1..=32).contains(&type_code) {
                f.attr |= 1u32 << (type_code - 1);
            }

            // extended-length attributes carry a 16-bit length
            let extended = attr_flags & 0x10 != 0;
            let len = if extended {
                bgp_read!(f, buf, read_u16) as usize
            } else {
                bgp_read!(f, buf, read_u8) as usize
            };
            let hdr: usize = if extended { 4 } else { 3 };
            let attr_end = buf.tell() + len;

            match BgpAttrType::from(type_code) {
                BgpAttrType::ORIGIN => {
                    update.orig = bgp_read!(f, buf, read_u8);
                    if update.orig < 3 {
                        f.origin[update.orig as usize] += 1;
                    }
                }

                t @ (BgpAttrType::AS_PATH | BgpAttrType::AS4_PATH) => {
                    let mut as4 = t == BgpAttrType::AS4_PATH;
                    if as4 {
                        update.nas4 = update.aspath.len();
                    } else {
                        // dry-run the segment list with 16-bit ASes; any
                        // mismatch means the path uses 32-bit ASes
                        let mut probe = buf.clone();
                        let mut consumed = 0usize;
                        let mut ok16 = true;
                        while consumed < len {
                            let (stype, nasn) = match (probe.read_u8(), probe.read_u8()) {
                                (Some(s), Some(n)) => (s, n),
                                _ => {
                                    ok16 = false;
                                    break;
                                }
                            };
                            if stype == 0 || stype > 4 || !probe.skip_n(2 * nasn as usize) {
                                ok16 = false;
                                break;
                            }
                            consumed += 2 + 2 * nasn as usize;
                        }
                        as4 = !ok16 || consumed != len;
                    }

                    if len == 0 {
                        // AS path is empty
                        tpa -= hdr as i32;
                        continue;
                    }

                    while buf.tell() + 2 <= attr_end {
                        let stype = bgp_read!(f, buf, read_u8);
                        let nasn = bgp_read!(f, buf, read_u8);

                        // AS-path length statistics
                        f.nasp += 1;
                        if f.nasp == 1 {
                            f.minasplen = nasn;
                            f.maxasplen = nasn;
                            f.avgasplen = nasn as f64;
                        } else {
                            f.minasplen = f.minasplen.min(nasn);
                            f.maxasplen = f.maxasplen.max(nasn);
                            f.avgasplen += (nasn as f64 - f.avgasplen) / f.nasp as f64;
                        }

                        let seg_stored = update.aspath.len() < BGP_ASIZE;
                        if seg_stored {
                            update.aspath.push(AsPathSegment {
                                stype,
                                asns: Vec::with_capacity(nasn as usize),
                            });
                        } else if !f.stat.contains(BgpStat::AFULL) {
                            warn!("pkt {pkt_num}: array for AS path is full");
                            f.stat |= BgpStat::AFULL;
                        }

                        let mut maxprepas = 0u32;
                        let mut nprepas = 0u32;
                        let mut prevas = 0u32;

                        for _ in 0..nasn {
                            let width = if as4 { 4 } else { 2 };
                            if buf.tell() + width > attr_end || buf.left() < width {
                                break;
                            }
                            let asn = if as4 {
                                bgp_read!(f, buf, read_u32)
                            } else {
                                bgp_read!(f, buf, read_u16) as u32
                            };

                            if seg_stored {
                                let seg = update.aspath.last_mut().unwrap();
                                if seg.asns.len() < BGP_ASIZE {
                                    seg.asns.push(asn);
                                } else if !f.stat.contains(BgpStat::AFULL) {
                                    warn!("pkt {pkt_num}: array for AS numbers is full");
                                    f.stat |= BgpStat::AFULL;
                                }
                            }

                            let private = if as4 {
                                BGP_PRIVATE_AS32.contains(&asn)
                            } else {
                                BGP_PRIVATE_AS16.contains(&asn)
                            };
                            if private {
                                f.aflgs |= BgpAnomaly::RESRVD_AS;
                                anom.private_as(flow.findex, pkt_num, rec, asn);
                            }

                            // loop detection: own AS shows up in the path
                            let das = if flow.is_b() { f.src_as } else { f.dst_as };
                            if asn == das && das != 0 {
                                f.aflgs |= BgpAnomaly::LOOP;
                                anom.as_loop(flow.findex, pkt_num, rec, asn);
                            }

                            // prepended-AS run length
                            if prevas == asn {
                                nprepas += 1;
                            } else {
                                nprepas = 0;
                            }
                            if nprepas > f.maxnprepas {
                                f.maxnprepas = nprepas;
                                maxprepas = asn;
                            }
                            prevas = asn;
                        }

                        if f.maxnprepas > 10 && maxprepas != 0 {
                            f.aflgs |= BgpAnomaly::NPREPAS;
                            anom.prepended_as(flow.findex, pkt_num, rec, maxprepas, f.maxnprepas);
                        }
                    }
                }

                BgpAttrType::NEXT_HOP => {
                    if len > 0 {
                        if len != 4 {
                            debug!("pkt {pkt_num}: NEXT_HOP is not an IPv4 address");
                        } else {
                            update.nexthop = bgp_read!(f, buf, read_u32);
                        }
                    }
                }

                BgpAttrType::MULTI_EXIT_DISC => {
                    update.med = bgp_read!(f, buf, read_u32);
                }

                BgpAttrType::LOCAL_PREF => {
                    update.locpref = bgp_read!(f, buf, read_u32);
                }

                BgpAttrType::ORIGINATOR_ID => {
                    update.orig_id = bgp_read!(f, buf, read_u32);
                }

                BgpAttrType::ATOMIC_AGGREGATE => {
                    f.stat |= BgpStat::ATOMIC_AGGR;
                }

                BgpAttrType::AGGREGATOR | BgpAttrType::AS4_AGGREGATOR => {
                    if len == 6 {
                        update.aggr[0] = bgp_read!(f, buf, read_u16) as u32;
                    } else {
                        update.aggr[0] = bgp_read!(f, buf, read_u32);
                    }
                    update.aggr[1] = bgp_read!(f, buf, read_u32);
                }

                BgpAttrType::CLUSTER_LIST => {
                    let mut i = 0usize;
                    while i < len {
                        let id = bgp_read!(f, buf, read_u32);
                        if update.cluster.len() < BGP_ASIZE {
                            update.cluster.push(id);
                        } else if !f.stat.contains(BgpStat::AFULL) {
                            warn!("pkt {pkt_num}: array for cluster list is full");
                            f.stat |= BgpStat::AFULL;
                        }
                        i += 4;
                    }
                }

                BgpAttrType::COMMUNITIES => {
                    let mut i = 0usize;
                    while i < len {
                        let cas = bgp_read!(f, buf, read_u16);
                        let tag = bgp_read!(f, buf, read_u16);
                        if update.comm.len() < BGP_ASIZE {
                            update.comm.push((cas, tag));
                        } else if !f.stat.contains(BgpStat::AFULL) {
                            warn!("pkt {pkt_num}: array for communities is full");
                            f.stat |= BgpStat::AFULL;
                        }
                        if tag == BGP_COM_TAG_BLACKHOLE
                            || ((cas as u32) << 16 | tag as u32) == BGP_COM_BLACKHOLE
                        {
                            f.aflgs |= BgpAnomaly::BLACKHOLE;
                            anom.blackhole(flow.findex, pkt_num, rec, cas, tag);
                        }
                        i += 4;
                    }
                }

                _ => {
                    bgp_skip!(f, buf, len);
                }
            }

            // realign to the end of the attribute
            if buf.tell() < attr_end {
                bgp_skip!(f, buf, attr_end - buf.tell());
            }

            tpa -= (hdr + len) as i32;
        }

        /* Network Layer Reachability Information */
        let mut nadver = 0u32;
        while nlri_len > 1 {
            if f.caps.contains(BgpCaps::ADD_PATH) {
                bgp_skip!(f, buf, 4); // path identifier
                nlri_len = (nlri_len - 4).max(0);
            }

            let mut nlri = BgpNlri::default();
            nlri.mask = bgp_read!(f, buf, read_u8);
            if nlri.mask > 32 {
                f.stat |= BgpStat::INVMASK;
                return false;
            }
            if nlri.mask > 0 {
                f.advpref |= 1 << (nlri.mask - 1);
            }

            f.nadver += 1;
            nadver += 1;

            let s = (nlri.mask as usize + 7) / 8;
            if buf.left() < s {
                f.stat |= BgpStat::SNAPLEN;
                finalize_adver(f, nadver);
                return false;
            }
            buf.read_n(&mut nlri.prefix[..s]);

            if nlri.mask > 24 {
                f.aflgs |= BgpAnomaly::SPEC_PREF;
                anom.spec24(flow.findex, pkt_num, rec, &nlri);
            } else if nlri.mask < 8 {
                f.aflgs |= BgpAnomaly::LSPEC_PREF;
                anom.spec8(flow.findex, pkt_num, rec, &nlri);
            }

            if cfg.trad_bogons && is_traditional_bogon(&nlri) {
                f.aflgs |= BgpAnomaly::BOGON;
                anom.bogon(flow.findex, pkt_num, rec, &nlri);
            }

            // routing table upkeep
            if let Some(last) = update.aspath.last() {
                if let Some(&orig_as) = last.asns.last() {
                    let asplen: u32 = update
                        .aspath
                        .iter()
                        .map(|seg| {
                            if seg.stype == BGP_AS_SEQUENCE {
                                seg.asns.len() as u32
                            } else {
                                1
                            }
                        })
                        .sum();

                    let rid = if f.src_id != 0 {
                        f.src_id
                    } else {
                        match flow.src_ip {
                            std::net::IpAddr::V4(v4) => u32::from(v4),
                            std::net::IpAddr::V6(_) => f.src_id,
                        }
                    };

                    let outcome = rt.advertise(
                        &nlri,
                        RouteCandidate {
                            rid,
                            nexthop: update.nexthop,
                            med: update.med,
                            locpref: update.locpref,
                            orig: BgpOrigin::from(update.orig),
                            orig_as,
                            asplen,
                            last_stype: last.stype,
                        },
                    );

                    if let Some((old_as, new_as)) = outcome.moas {
                        moas.record(&nlri, nlri.mask, old_as, new_as, flow.findex, pkt_num, rec);
                        f.aflgs |= BgpAnomaly::MOAS;
                    }
                    if let Some((old_mask, new_mask)) = outcome.more_specific {
                        f.aflgs |= BgpAnomaly::MSPEC_PREF;
                        anom.more_specific(flow.findex, pkt_num, rec, &nlri, old_mask, new_mask);
                    }
                }
            }

            if update.nlri.len() < BGP_ASIZE {
                update.nlri.push(nlri);
            } else if !f.stat.contains(BgpStat::AFULL) {
                warn!("pkt {pkt_num}: array for NLRI is full");
                f.stat |= BgpStat::AFULL;
            }

            nlri_len -= (1 + s) as i32;
        }
        finalize_adver(f, nadver);

        if cfg.output_rt {
            if let Some(w) = rt_out {
                print_update_row(w, cfg.as_path_aggr, update, f, flow, pkt_num, rec);
            }
        }

        true
    }

    fn decode_notification(&mut self, buf: &mut ByteCursor, idx: FlowIndex) -> bool {
        let f = &mut self.flows[idx];
        f.notif[0] = bgp_read!(f, buf, read_u8);
        f.notif[1] = bgp_read!(f, buf, read_u8);
        true
    }

    fn decode_keep_alive(&mut self, idx: FlowIndex, pkt_num: u64) -> bool {
        let f = &mut self.flows[idx];

        if f.hdrlen as usize != BGP_HDR_LEN {
            f.stat |= BgpStat::BAD_LEN;
        }

        // inter-arrival statistics; no IAT for the first keep-alive
        let n = f.num_t[BgpMessageType::KeepAlive.index()];
        if n > 1 {
            let iat = f.now - f.last_ka;
            if iat >= 0.0 {
                if n == 2 {
                    f.min_iat_ka = iat;
                    f.max_iat_ka = iat;
                    f.avg_iat_ka = iat;
                } else {
                    f.min_iat_ka = f.min_iat_ka.min(iat);
                    f.max_iat_ka = f.max_iat_ka.max(iat);
                    f.avg_iat_ka += (iat - f.avg_iat_ka) / (n - 1) as f64;
                }
            } else if !f.stat.contains(BgpStat::IAT) {
                debug!("pkt {pkt_num}: IAT < 0");
                f.stat |= BgpStat::IAT;
            }
        }
        f.last_ka = f.now;
        true
    }

    fn decode_route_refresh(&mut self, buf: &mut ByteCursor, idx: FlowIndex, pkt_num: u64) -> bool {
        let f = &mut self.flows[idx];

        let afi = bgp_read!(f, buf, read_u16);
        let subtype = bgp_read!(f, buf, read_u8);
        let safi = bgp_read!(f, buf, read_u8);
        debug!("ROUTE-REFRESH: AFI: {afi}, SUBTYPE: {subtype}, SAFI: {safi}");

        if buf.left() > 4 {
            // message carries ORF entries
            bgp_skip!(f, buf, 1); // flag
            bgp_skip!(f, buf, 1); // type
            let len = bgp_read!(f, buf, read_u16);
            if buf.left() < len as usize {
                debug!("pkt {pkt_num}: malformed ORF entries (snaplen)");
                f.stat |= BgpStat::SNAPLEN;
                return false;
            }
            bgp_skip!(f, buf, len as usize);
        }

        true
    }
}

impl FlowAnalyzer for BgpAnalyzer {
    fn name(&self) -> &'static str {
        "bgp"
    }

    fn init(&mut self, flow_capacity: usize) -> Result<(), ParserError> {
        self.flows = vec![BgpFlow::default(); flow_capacity];
        Ok(())
    }

    fn print_header(&self) -> Schema {
        let mut bv = Schema::new();
        bv.append_h16("bgpStat", "BGP status");
        bv.append_h16("bgpAFlgs", "BGP anomaly flags");
        bv.append_h8("bgpMsgT", "BGP message types");
        bv.append_tuple(
            "bgpNOpen_Upd_Notif_KeepAl_RteRefr",
            "Number of BGP messages: OPEN, UPDATE, NOTIFICATION, KEEPALIVE and ROUTE-REFRESH",
            &[LeafType::UInt32; 5],
        );
        // OPEN message
        bv.append_u8("bgpVersion", "BGP version");
        bv.append_tuple(
            "bgpSrcAS_dstAS",
            "BGP source and destination Autonomous System (AS)",
            &[LeafType::UInt32, LeafType::UInt32],
        );
        bv.append_tuple(
            "bgpSrcId_dstId",
            "BGP source and destination ID",
            &[LeafType::Ip4Addr, LeafType::Ip4Addr],
        );
        bv.append_u16("bgpHTime", "BGP hold time (sec)");
        bv.append_h16("bgpCaps", "BGP capabilities");
        // UPDATE messages
        bv.append_h32("bgpPAttr", "BGP path attributes");
        bv.append_u32("bgpNAdver", "BGP total number of advertised routes");
        bv.append_u32("bgpNWdrwn", "BGP total number of withdrawn routes");
        bv.append_u32("bgpMaxAdver", "BGP maximum number of advertised routes per record");
        bv.append_dbl("bgpAvgAdver", "BGP average number of advertised routes per record");
        bv.append_u32("bgpMaxWdrwn", "BGP maximum number of withdrawn routes per record");
        bv.append_dbl("bgpAvgWdrwn", "BGP average number of withdrawn routes per record");
        bv.append_h32("bgpAdvPref", "BGP advertised prefixes");
        bv.append_h32("bgpWdrnPref", "BGP withdrawn prefixes");
        bv.append_tuple(
            "bgpNIGP_EGP_INC",
            "BGP number of routes from origin IGP, EGP, INCOMPLETE",
            &[LeafType::UInt32; 3],
        );
        bv.append_u8("bgpMinASPLen", "BGP minimum AS path length");
        bv.append_u8("bgpMaxASPLen", "BGP maximum AS path length");
        bv.append_dbl("bgpAvgASPLen", "BGP average AS path length");
        bv.append_u32("bgpMaxNPrepAS", "BGP maximum number of prepended AS");
        bv.append_dbl("bgpMinIatUp", "BGP minimum inter-arrival time for update messages");
        bv.append_dbl("bgpMaxIatUp", "BGP maximum inter-arrival time for update messages");
        bv.append_dbl("bgpAvgIatUp", "BGP average inter-arrival time for update messages");
        // KEEPALIVE messages
        bv.append_dbl("bgpMinIatKA", "BGP minimum inter-arrival time for keep-alive messages");
        bv.append_dbl("bgpMaxIatKA", "BGP maximum inter-arrival time for keep-alive messages");
        bv.append_dbl("bgpAvgIatKA", "BGP average inter-arrival time for keep-alive messages");
        // NOTIFICATION message
        bv.append_tuple(
            "bgpNotifCode_Subcode",
            "BGP notification (fatal error) code and subcode",
            &[LeafType::UInt8, LeafType::UInt8],
        );
        bv
    }

    fn on_new_flow(&mut self, packet: &PacketView, flow: &FlowView, idx: FlowIndex) {
        let f = &mut self.flows[idx];
        *f = BgpFlow::default();

        if packet.l4_proto == L4Proto::Tcp
            && (flow.src_port == BGP_PORT || flow.dst_port == BGP_PORT)
        {
            f.stat |= BgpStat::BGP;
        }
    }

    fn on_layer4(
        &mut self,
        packet: &PacketView,
        flow: &FlowView,
        idx: FlowIndex,
        _ctx: &mut PacketContext,
    ) {
        let snaplen = packet.snap_l7_len() as usize;
        if self.flows[idx].stat.is_empty() || snaplen < BGP_HDR_LEN {
            return; // not a BGP flow
        }

        // only the first fragment is processed
        if !packet.first_fragment {
            return;
        }

        let mut buf = ByteCursor::new(packet.l7);

        self.num_bgp[0] += 1;
        self.flows[idx].now = packet.ts();
        self.rec = 0;

        while buf.left() >= BGP_HDR_LEN {
            self.rec += 1;

            let marker = [buf.read_u64().unwrap(), buf.read_u64().unwrap()];
            if marker != [u64::MAX, u64::MAX] {
                buf.seek(SeekFrom::Current(-16));
                // search for the next marker
                if !buf.memmem(&BGP_MARKER) {
                    self.flows[idx].stat |= BgpStat::CONN_SYNC;
                    return;
                }
                debug!("pkt {}: found a new marker at offset {}", packet.pkt_num, buf.tell());
                if !buf.skip_n(16) || buf.left() < 3 {
                    self.flows[idx].stat |= BgpStat::SNAPLEN;
                    return;
                }
            }

            /* record length */
            let Some(hdrlen) = buf.read_u16() else {
                self.flows[idx].stat |= BgpStat::SNAPLEN;
                return;
            };
            self.flows[idx].hdrlen = hdrlen;
            if (hdrlen as usize) < BGP_HDR_LEN || hdrlen > BGP_MAX_LEN {
                debug!("pkt {}: bad message length {hdrlen}", packet.pkt_num);
                self.flows[idx].stat |= BgpStat::BAD_LEN;
                return;
            }

            /* record type */
            let Some(typ) = buf.read_u8() else {
                self.flows[idx].stat |= BgpStat::SNAPLEN;
                return;
            };
            if typ == 0 || typ > BgpMessageType::RouteRefresh.index() as u8 {
                debug!("pkt {}: bad message type {typ}", packet.pkt_num);
                self.flows[idx].stat |= BgpStat::BAD_TYPE;
                if !buf.skip_n(hdrlen as usize - BGP_HDR_LEN) {
                    self.flows[idx].stat |= BgpStat::SNAPLEN;
                    return;
                }
                continue;
            }

            self.flows[idx].msg_t |= 1 << typ;
            self.flows[idx].num_t[typ as usize] += 1;
            self.num_bgp[typ as usize] += 1;

            let ok = match BgpMessageType::from(typ) {
                BgpMessageType::Open => self.decode_open(&mut buf, idx, flow),
                BgpMessageType::Update => self.decode_update(&mut buf, idx, flow, packet.pkt_num),
                BgpMessageType::Notification => self.decode_notification(&mut buf, idx),
                BgpMessageType::KeepAlive => self.decode_keep_alive(idx, packet.pkt_num),
                BgpMessageType::RouteRefresh => {
                    self.decode_route_refresh(&mut buf, idx, packet.pkt_num)
                }
                BgpMessageType::Unknown(_) => unreachable!(),
            };
            if !ok {
                return;
            }
        }
    }

    fn on_flow_terminate(&mut self, idx: FlowIndex, _flow: &FlowView, out: &mut OutputBuffer) {
        let f = &self.flows[idx];

        self.agg_stat |= f.stat;
        self.agg_aflgs |= f.aflgs;
        self.agg_caps |= f.caps;
        self.agg_attr |= f.attr;

        out.append_u16(f.stat.bits());
        out.append_u16(f.aflgs.bits());
        out.append_u8(f.msg_t);

        for i in 1..=BgpMessageType::RouteRefresh.index() {
            out.append_u32(f.num_t[i]);
        }

        // OPEN message
        out.append_u8(f.version);
        out.append_u32(f.src_as);
        out.append_u32(f.dst_as);
        out.append_ip4(std::net::Ipv4Addr::from(f.src_id));
        out.append_ip4(std::net::Ipv4Addr::from(f.dst_id));
        out.append_u16(f.htime);
        out.append_u16(f.caps.bits());

        // UPDATE messages
        out.append_u32(f.attr);
        out.append_u32(f.nadver);
        out.append_u32(f.nwdrwn);
        out.append_u32(f.maxadver);
        out.append_f64(f.avgadver);
        out.append_u32(f.maxwdrwn);
        out.append_f64(f.avgwdrwn);
        out.append_u32(f.advpref);
        out.append_u32(f.wdrnpref);
        for n in f.origin {
            out.append_u32(n);
        }
        out.append_u8(f.minasplen);
        out.append_u8(f.maxasplen);
        out.append_f64(f.avgasplen);
        out.append_u32(f.maxnprepas);
        out.append_f64(f.min_iat_up);
        out.append_f64(f.max_iat_up);
        out.append_f64(f.avg_iat_up);

        // KEEPALIVE messages
        out.append_f64(f.min_iat_ka);
        out.append_f64(f.max_iat_ka);
        out.append_f64(f.avg_iat_ka);

        // NOTIFICATION message
        out.append_u8(f.notif[0]);
        out.append_u8(f.notif[1]);
    }

    fn plugin_report(&self, w: &mut dyn io::Write) -> io::Result<()> {
        if self.num_bgp[0] == 0 {
            return Ok(());
        }
        writeln!(w, "bgp: aggregated bgpStat=0x{:04x}", self.agg_stat.bits())?;
        writeln!(w, "bgp: aggregated bgpAFlgs=0x{:04x}", self.agg_aflgs.bits())?;
        writeln!(w, "bgp: aggregated bgpCaps=0x{:04x}", self.agg_caps.bits())?;
        writeln!(w, "bgp: aggregated bgpPAttr=0x{:08x}", self.agg_attr)?;
        writeln!(w, "bgp: number of BGP packets: {}", self.num_bgp[0])?;
        for t in 1..=BgpMessageType::RouteRefresh.index() {
            if self.num_bgp[t] > 0 {
                writeln!(
                    w,
                    "bgp: number of BGP {} messages: {} [{:.2}%]",
                    BgpMessageType::from(t as u8).as_str(),
                    self.num_bgp[t],
                    100.0 * self.num_bgp[t] as f64 / self.num_bgp[0] as f64
                )?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.anom.flush();
        self.moas.flush();
        if let Some(w) = &mut self.rt_out {
            let _ = w.flush();
        }
        self.flows.clear();
    }
}

/// Traditional reserved IPv4 ranges that must not show up in the global
/// routing table.
fn is_traditional_bogon(nlri: &BgpNlri) -> bool {
    let p = &nlri.prefix;
    let m = nlri.mask;
    /* 0.0.0.0/8       */ (m >= 8 && p[0] == 0)
    /* 10.0.0.0/8      */ || (m >= 8 && p[0] == 10)
    /* 100.64.0.0/10   */ || (m >= 10 && p[0] == 100 && (p[1] & 0xc0) == 64)
    /* 127.0.0.0/8     */ || (m >= 8 && p[0] == 127)
    /* 169.254.0.0/16  */ || (m >= 16 && p[0] == 169 && p[1] == 254)
    /* 172.16.0.0/12   */ || (m >= 12 && p[0] == 172 && (p[1] & 0xf0) == 16)
    /* 192.0.[02].0/24 */ || (m >= 24 && p[0] == 192 && p[1] == 0 && (p[2] == 0 || p[2] == 2))
    /* 192.168.0.0/16  */ || (m >= 16 && p[0] == 192 && p[1] == 168)
    /* 198.18.0.0/15   */ || (m >= 15 && p[0] == 198 && (p[1] & 0xfe) == 18)
    /* 198.51.100.0/24 */ || (m >= 24 && p[0] == 198 && p[1] == 51 && p[2] == 100)
    /* 203.0.113.0/24  */ || (m >= 24 && p[0] == 203 && p[1] == 0 && p[2] == 113)
    /* 224.0.0.0/3     */ || (m >= 3 && (p[0] & 0xe0) == 224)
}

/// One routing text row per UPDATE: NLRI list, ASes, path, withdrawn list.
fn print_update_row(
    w: &mut Box<dyn Write>,
    as_path_aggr: bool,
    update: &BgpUpdate,
    f: &BgpFlow,
    flow: &FlowView,
    pkt_num: u64,
    rec: u32,
) {
    use itertools::Itertools;

    let nlri_col = update.nlri.iter().map(BgpNlri::to_string).join(";");

    let src_as = if flow.is_b() { f.dst_as } else { f.src_as };

    let nexthop = std::net::Ipv4Addr::from(update.nexthop);

    // origin / upstream / destination AS from the path, skipping prepends
    let (orig_col, upstream_col, dest_as) = as_path_endpoints(&update.aspath);

    let mut path_col = String::new();
    let mut alen = 0u32;
    let mut prevas = 0u32;
    let mut nprepas = 0u32;
    let mut maxnprepas = 0u32;
    for (i, seg) in update.aspath.iter().enumerate().skip(update.nas4) {
        if i > update.nas4 {
            path_col.push(';');
        }
        let set = seg.stype == BGP_AS_SET;
        if set {
            alen += 1;
            path_col.push('{');
        } else {
            alen += seg.asns.len() as u32;
        }
        let mut first = true;
        for (j, &asn) in seg.asns.iter().enumerate() {
            if prevas == asn {
                nprepas += 1;
            } else {
                nprepas = 0;
            }
            maxnprepas = maxnprepas.max(nprepas);
            prevas = asn;
            if as_path_aggr && j > 0 && asn == seg.asns[j - 1] {
                continue;
            }
            if !first {
                path_col.push(';');
            }
            first = false;
            path_col.push_str(&asn.to_string());
        }
        if set {
            path_col.push('}');
        }
    }

    let withdrawn_col = update.withdrawn.iter().map(BgpNlri::to_string).join(";");

    let _ = writeln!(
        w,
        "{nlri_col}\t{src_as}\t{nexthop}\t{}\t{}\t{}\t{orig_col}\t{upstream_col}\t{dest_as}\
         \t{path_col}\t{alen}\t{maxnprepas}\t{withdrawn_col}\t{}\t{pkt_num}\t{rec}\t{:.6}",
        update.med,
        update.locpref,
        BgpOrigin::from(update.orig).as_str(),
        flow.findex,
        f.now,
    );
}

/// Extract (origin AS column, upstream AS column, destination AS) from the
/// path. SET segments are rendered as a `;`-joined list; prepended ASes are
/// skipped when walking up to the upstream AS.
fn as_path_endpoints(aspath: &[AsPathSegment]) -> (String, String, u32) {
    use itertools::Itertools;

    let Some(last) = aspath.last().filter(|s| !s.asns.is_empty()) else {
        return (String::new(), String::new(), 0);
    };

    let dest_as = aspath[0].asns.first().copied().unwrap_or(0);
    let orig_as = *last.asns.last().unwrap();

    let orig_col = if last.stype == BGP_AS_SET {
        last.asns.iter().map(u32::to_string).join(";")
    } else {
        orig_as.to_string()
    };

    // the segment holding the upstream AS: the last one for SEQUENCE paths,
    // the one before the final SET otherwise
    let (seg, mut pos) = if last.stype == BGP_AS_SET {
        match aspath.len().checked_sub(2).and_then(|i| aspath.get(i)) {
            Some(prev) if !prev.asns.is_empty() => (prev, prev.asns.len()),
            _ => return (orig_col, String::new(), dest_as),
        }
    } else {
        if last.asns.len() < 2 {
            return (orig_col, String::new(), dest_as);
        }
        (last, last.asns.len() - 1)
    };

    let upstream_col = if seg.stype == BGP_AS_SET {
        seg.asns.iter().map(u32::to_string).join(";")
    } else {
        let mut upstream = seg.asns[pos - 1];
        // do not report a prepended origin AS as the upstream AS
        while upstream == orig_as && pos >= 2 {
            pos -= 1;
            upstream = seg.asns[pos - 1];
        }
        upstream.to_string()
    };

    (orig_col, upstream_col, dest_as)
}

#[cfg(test)]
mod tests;
