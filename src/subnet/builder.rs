/*!
Subnet table file writer, used by tests and by tooling that compiles
lookup tables from text sources.
*/
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ipnet::{Ipv4Net, Ipv6Net};

use zerocopy::{FromZeros, IntoBytes};

use crate::error::ParserError;

use super::{SubnetMode, SubnetRecord4, SubnetRecord6, RANGE_MODE_BIT, SUBNET_FILE_VERSION};

/// Source form of one IPv4 table entry.
#[derive(Debug, Clone)]
pub struct SubnetEntry4 {
    pub net: Ipv4Net,
    pub asn: u32,
    pub country: String,
    pub county: String,
    pub city: String,
    pub org: String,
    pub lat: f32,
    pub lng: f32,
    pub precision: f32,
    pub net_id: u32,
}

impl Default for SubnetEntry4 {
    fn default() -> Self {
        SubnetEntry4 {
            net: Ipv4Net::default(),
            asn: 0,
            country: String::new(),
            county: String::new(),
            city: String::new(),
            org: String::new(),
            lat: 0.0,
            lng: 0.0,
            precision: 0.0,
            net_id: 0,
        }
    }
}

/// Source form of one IPv6 table entry.
#[derive(Debug, Clone)]
pub struct SubnetEntry6 {
    pub net: Ipv6Net,
    pub asn: u32,
    pub country: String,
    pub county: String,
    pub city: String,
    pub org: String,
    pub lat: f32,
    pub lng: f32,
    pub precision: f32,
    pub net_id: u32,
}

impl Default for SubnetEntry6 {
    fn default() -> Self {
        SubnetEntry6 {
            net: Ipv6Net::default(),
            asn: 0,
            country: String::new(),
            county: String::new(),
            city: String::new(),
            org: String::new(),
            lat: 0.0,
            lng: 0.0,
            precision: 0.0,
            net_id: 0,
        }
    }
}

fn fill(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

macro_rules! build_file {
    ($fn_name:ident, $entry:ident, $record:ident, $key:ty, $bits:expr) => {
        /// Compile sorted `entries` into an on-disk table.
        pub fn $fn_name(
            path: &Path,
            mode: SubnetMode,
            entries: &[$entry],
        ) -> Result<(), ParserError> {
            let mut entries: Vec<$entry> = entries.to_vec();
            entries.sort_by_key(|e| <$key>::from(e.net.network()));

            let mut records: Vec<$record> = Vec::new();
            match mode {
                SubnetMode::Cidr => {
                    for e in &entries {
                        let mut r = $record::new_zeroed();
                        let mask: $key = e.net.netmask().into();
                        r.net.set(<$key>::from(e.net.network()) & mask);
                        r.mask.set(mask);
                        e.apply(&mut r);
                        records.push(r);
                    }
                    // backpointers to the nearest enclosing (less specific) net
                    for i in 0..records.len() {
                        let net = records[i].net.get();
                        let mut parent = 0u32;
                        let mut parent_mask: $key = 0;
                        for (j, cand) in records.iter().enumerate() {
                            if i == j {
                                continue;
                            }
                            let m = cand.mask.get();
                            if m < records[i].mask.get()
                                && (net & m) == cand.net.get()
                                && m >= parent_mask
                            {
                                parent = (j + 1) as u32;
                                parent_mask = m;
                            }
                        }
                        records[i].net_vec.set(parent);
                    }
                }
                SubnetMode::Range => {
                    for e in &entries {
                        let mask: $key = e.net.netmask().into();
                        let begin = <$key>::from(e.net.network()) & mask;
                        let end = begin | !mask;
                        let mut r = $record::new_zeroed();
                        r.net.set(begin);
                        e.apply(&mut r);
                        records.push(r);
                        let mut r = $record::new_zeroed();
                        r.net.set(end);
                        r.be_flag = 0x01;
                        e.apply(&mut r);
                        records.push(r);
                    }
                    records.sort_by_key(|r| r.net.get());
                }
            }

            let mut header = $record::new_zeroed();
            header.net.set(records.len() as $key);
            header.net_vec.set(
                SUBNET_FILE_VERSION
                    | if mode == SubnetMode::Range { RANGE_MODE_BIT } else { 0 },
            );
            header.net_id.set(1); // revision

            let mut w = BufWriter::new(File::create(path)?);
            w.write_all(header.as_bytes())?;
            for r in &records {
                w.write_all(r.as_bytes())?;
            }
            w.flush()?;
            Ok(())
        }

        impl $entry {
            fn apply(&self, r: &mut $record) {
                r.asn.set(self.asn);
                r.lat.set(self.lat);
                r.lng.set(self.lng);
                r.precision.set(self.precision);
                r.net_id.set(self.net_id);
                fill(&mut r.country, &self.country);
                fill(&mut r.county, &self.county);
                fill(&mut r.city, &self.city);
                fill(&mut r.org, &self.org);
            }
        }
    };
}

build_file!(build_file4, SubnetEntry4, SubnetRecord4, u32, 32u32);
build_file!(build_file6, SubnetEntry6, SubnetRecord6, u128, 128u32);
