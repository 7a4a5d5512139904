/*!
Process-wide routing table with best-path replacement and
Multiple-Origin-AS detection.
*/
use std::collections::HashMap;

use crate::models::{BgpNlri, BgpOrigin, BgpRtEntry};

/// Candidate route assembled from the current UPDATE record.
#[derive(Debug, Clone, Copy)]
pub struct RouteCandidate {
    pub rid: u32,
    pub nexthop: u32,
    pub med: u32,
    pub locpref: u32,
    pub orig: BgpOrigin,
    /// Origin AS: last AS of the path.
    pub orig_as: u32,
    /// AS-path length with SET segments counting as one.
    pub asplen: u32,
    /// Segment type of the last path segment.
    pub last_stype: u8,
}

/// Outcome of advertising one prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdvertiseOutcome {
    /// Origin AS changed on a SEQUENCE path: (old, new).
    pub moas: Option<(u32, u32)>,
    /// A more specific mask replaced the entry: (old, new).
    pub more_specific: Option<(u8, u8)>,
}

pub struct RoutingTable {
    entries: HashMap<BgpNlri, BgpRtEntry>,
    /// Keep the mask in the key: distinct masks become distinct entries.
    mask_in_key: bool,
}

impl RoutingTable {
    pub fn new(mask_in_key: bool) -> RoutingTable {
        RoutingTable { entries: HashMap::new(), mask_in_key }
    }

    #[inline]
    fn key(&self, nlri: &BgpNlri) -> BgpNlri {
        let mut key = *nlri;
        if !self.mask_in_key {
            key.mask = 0;
        }
        key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, nlri: &BgpNlri) -> Option<&BgpRtEntry> {
        self.entries.get(&self.key(nlri))
    }

    /// Remove the entry for a withdrawn prefix; withdrawals are
    /// unconditional.
    pub fn withdraw(&mut self, nlri: &BgpNlri) -> bool {
        self.entries.remove(&self.key(nlri)).is_some()
    }

    /// Advertise one prefix. The entry is replaced when any best-path
    /// criterion improves (higher LOCAL_PREF, lower origin type, shorter
    /// AS path, lower MED) or a more specific mask arrives; replacing an
    /// entry with an identical candidate is a no-op.
    pub fn advertise(&mut self, nlri: &BgpNlri, cand: RouteCandidate) -> AdvertiseOutcome {
        use crate::models::BGP_AS_SEQUENCE;

        let key = self.key(nlri);
        let mut outcome = AdvertiseOutcome::default();

        let Some(e) = self.entries.get(&key) else {
            self.entries.insert(key, entry_from(nlri.mask, &cand));
            return outcome;
        };

        let mut update = false;
        if cand.locpref > e.locpref {
            update = true;
        }
        if cand.orig < e.orig {
            update = true;
        }
        if cand.asplen < e.nas {
            update = true;
        }
        if cand.med < e.med {
            update = true;
        }

        // origin-AS change is reported even when the entry is kept
        if cand.last_stype == BGP_AS_SEQUENCE && cand.orig_as != e.orig_as {
            outcome.moas = Some((e.orig_as, cand.orig_as));
        }

        if nlri.mask > e.mask {
            outcome.more_specific = Some((e.mask, nlri.mask));
            update = true;
        }

        if update {
            self.entries.insert(key, entry_from(nlri.mask, &cand));
        }

        outcome
    }
}

fn entry_from(mask: u8, cand: &RouteCandidate) -> BgpRtEntry {
    BgpRtEntry {
        rid: cand.rid,
        nexthop: cand.nexthop,
        med: cand.med,
        locpref: cand.locpref,
        orig_as: cand.orig_as,
        nas: cand.asplen,
        orig: cand.orig,
        mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BGP_AS_SEQUENCE;

    fn nlri(a: u8, b: u8, c: u8, d: u8, mask: u8) -> BgpNlri {
        BgpNlri { mask, prefix: [a, b, c, d] }
    }

    fn cand(orig_as: u32, asplen: u32) -> RouteCandidate {
        RouteCandidate {
            rid: 0x0a00_0001,
            nexthop: 0x0a00_0001,
            med: 0,
            locpref: 0,
            orig: BgpOrigin::Igp,
            orig_as,
            asplen,
            last_stype: BGP_AS_SEQUENCE,
        }
    }

    #[test]
    fn test_insert_and_withdraw() {
        let mut rt = RoutingTable::new(false);
        let p = nlri(10, 0, 0, 0, 8);
        rt.advertise(&p, cand(65001, 2));
        assert_eq!(rt.get(&p).unwrap().orig_as, 65001);
        assert!(rt.withdraw(&p));
        assert!(!rt.withdraw(&p));
        assert!(rt.is_empty());
    }

    #[test]
    fn test_moas_reported_on_origin_change() {
        let mut rt = RoutingTable::new(false);
        let p = nlri(10, 0, 0, 0, 8);
        assert!(rt.advertise(&p, cand(65001, 2)).moas.is_none());
        let out = rt.advertise(&p, cand(65002, 2));
        assert_eq!(out.moas, Some((65001, 65002)));
    }

    #[test]
    fn test_replacement_is_a_no_op_for_identical_candidate() {
        let mut rt = RoutingTable::new(false);
        let p = nlri(10, 0, 0, 0, 8);
        let c = cand(65001, 2);
        rt.advertise(&p, c);
        let before = *rt.get(&p).unwrap();
        let out = rt.advertise(&p, c);
        assert!(out.moas.is_none());
        assert!(out.more_specific.is_none());
        let after = *rt.get(&p).unwrap();
        assert_eq!(before.orig_as, after.orig_as);
        assert_eq!(before.nas, after.nas);
    }

    #[test]
    fn test_shorter_path_replaces() {
        let mut rt = RoutingTable::new(false);
        let p = nlri(10, 0, 0, 0, 8);
        rt.advertise(&p, cand(65001, 4));
        rt.advertise(&p, cand(65001, 2));
        assert_eq!(rt.get(&p).unwrap().nas, 2);
        // longer path does not replace
        rt.advertise(&p, cand(65001, 9));
        assert_eq!(rt.get(&p).unwrap().nas, 2);
    }

    #[test]
    fn test_more_specific_mask_flags_and_replaces() {
        let mut rt = RoutingTable::new(false);
        rt.advertise(&nlri(10, 0, 0, 0, 8), cand(65001, 2));
        let out = rt.advertise(&nlri(10, 0, 0, 0, 16), cand(65001, 5));
        assert_eq!(out.more_specific, Some((8, 16)));
        assert_eq!(rt.get(&nlri(10, 0, 0, 0, 16)).unwrap().mask, 16);
    }
}
