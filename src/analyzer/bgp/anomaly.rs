/*!
Out-of-band anomaly and MOAS logs.

Lines are tab separated and totally ordered by (flow index, packet number,
record number), matching the order packets were processed in.
*/
use std::io::{self, Write};

use crate::models::BgpNlri;

/// Anomaly log: `<tag>\t<flowInd>\t<pktNo>\t<recNum>\t<args…>`.
pub struct AnomalyLog {
    w: Box<dyn Write>,
}

impl AnomalyLog {
    pub fn new(mut w: Box<dyn Write>) -> io::Result<AnomalyLog> {
        writeln!(w, "%Anomaly\tflowInd\tpktNo\tRecNum\tASorNet\tRepsOrMask\tNewMask")?;
        Ok(AnomalyLog { w })
    }

    fn line(&mut self, tag: &str, findex: u64, pkt: u64, rec: u32, args: &str) {
        // best effort; a failing log must not abort parsing
        let _ = writeln!(self.w, "{tag}\t{findex}\t{pkt}\t{rec}\t{args}");
    }

    pub fn private_as(&mut self, findex: u64, pkt: u64, rec: u32, asn: u32) {
        self.line("PRIVAS", findex, pkt, rec, &asn.to_string());
    }

    pub fn as_loop(&mut self, findex: u64, pkt: u64, rec: u32, asn: u32) {
        self.line("LOOP", findex, pkt, rec, &asn.to_string());
    }

    pub fn prepended_as(&mut self, findex: u64, pkt: u64, rec: u32, asn: u32, count: u32) {
        self.line("NPREPAS", findex, pkt, rec, &format!("{asn}\t{count}"));
    }

    pub fn blackhole(&mut self, findex: u64, pkt: u64, rec: u32, asn: u16, tag: u16) {
        self.line("BLACKHOLE", findex, pkt, rec, &format!("{asn}\t{tag}"));
    }

    pub fn spec24(&mut self, findex: u64, pkt: u64, rec: u32, nlri: &BgpNlri) {
        self.line("SPEC24", findex, pkt, rec, &prefix_args(nlri));
    }

    pub fn spec8(&mut self, findex: u64, pkt: u64, rec: u32, nlri: &BgpNlri) {
        self.line("SPEC8", findex, pkt, rec, &prefix_args(nlri));
    }

    pub fn bogon(&mut self, findex: u64, pkt: u64, rec: u32, nlri: &BgpNlri) {
        self.line("BOGON", findex, pkt, rec, &prefix_args(nlri));
    }

    pub fn more_specific(
        &mut self,
        findex: u64,
        pkt: u64,
        rec: u32,
        nlri: &BgpNlri,
        old_mask: u8,
        new_mask: u8,
    ) {
        let p = nlri.prefix;
        self.line(
            "MSPEC",
            findex,
            pkt,
            rec,
            &format!("{}.{}.{}.{}\t{}\t{}", p[0], p[1], p[2], p[3], old_mask, new_mask),
        );
    }

    pub fn flush(&mut self) {
        let _ = self.w.flush();
    }
}

fn prefix_args(nlri: &BgpNlri) -> String {
    let p = nlri.prefix;
    format!("{}.{}.{}.{}\t{}", p[0], p[1], p[2], p[3], nlri.mask)
}

/// MOAS log: one line per origin-AS change of an announced prefix.
pub struct MoasLog {
    w: Box<dyn Write>,
}

impl MoasLog {
    pub fn new(mut w: Box<dyn Write>) -> io::Result<MoasLog> {
        writeln!(w, "%Network\tMask\tOldOrigAS\tNewOrigAS\tflowInd\tpktNo\tRecNum")?;
        Ok(MoasLog { w })
    }

    pub fn record(
        &mut self,
        nlri: &BgpNlri,
        mask: u8,
        old_as: u32,
        new_as: u32,
        findex: u64,
        pkt: u64,
        rec: u32,
    ) {
        let p = nlri.prefix;
        let _ = writeln!(
            self.w,
            "{}.{}.{}.{}\t{}\t{}\t{}\t{}\t{}\t{}",
            p[0], p[1], p[2], p[3], mask, old_as, new_as, findex, pkt, rec
        );
    }

    pub fn flush(&mut self) {
        let _ = self.w.flush();
    }
}
