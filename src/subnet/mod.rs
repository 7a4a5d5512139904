/*!
Range-encoded, binary-searchable IP→(country, ASN, organization,
coordinates, netID) lookup engine for IPv4 and IPv6.

A table file starts with a header record carrying {count, version plus
range-mode flag, revision}; the following `count` records are sorted by
their numeric key (IPv4 net as u32, IPv6 net as big-endian u128). Two
on-disk encodings exist: CIDR (net+mask, miss resolved through the record's
`net_vec` backpointer to the enclosing range) and begin/end ranges
(consecutive records discriminated by the `be_flag` byte). Files can be
loaded by a full read or memory-mapped; index 0 is the reserved "no match"
sentinel.
*/
use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use log::warn;
use memmap2::Mmap;
use zerocopy::byteorder::{BigEndian, LittleEndian, F32, U128, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::ParserError;

mod builder;
pub use builder::{build_file4, build_file6, SubnetEntry4, SubnetEntry6};

/// Schema version this crate reads and writes.
pub const SUBNET_FILE_VERSION: u32 = 1;
/// Bit 31 of the version word selects the begin/end-range encoding.
const RANGE_MODE_BIT: u32 = 0x8000_0000;

const COUNTRY_LEN: usize = 3;
const LOC_LEN: usize = 20;
const ORG_LEN: usize = 45;

/// On-disk encoding of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubnetMode {
    /// Every record carries its own netmask.
    #[default]
    Cidr,
    /// Records come in begin/end pairs discriminated by `be_flag`.
    Range,
}

/// Loader options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetConfig {
    pub mode: SubnetMode,
    /// Memory-map the file instead of reading it into memory.
    pub mmap: bool,
}

/// One IPv4 table record. Also used as the file header (count in `net`,
/// version in `net_vec`, revision in `net_id`, rest zeroed).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct SubnetRecord4 {
    pub net: U32<BigEndian>,
    /// CIDR mode: the netmask. Unused in range mode.
    pub mask: U32<BigEndian>,
    /// Range mode: bit 0 set on the end record of a pair.
    pub be_flag: u8,
    _pad: [u8; 3],
    /// Backpointer to the enclosing range, 0 if none.
    pub net_vec: U32<LittleEndian>,
    pub asn: U32<LittleEndian>,
    pub lat: F32<LittleEndian>,
    pub lng: F32<LittleEndian>,
    pub precision: F32<LittleEndian>,
    pub country: [u8; COUNTRY_LEN],
    pub county: [u8; LOC_LEN],
    pub city: [u8; LOC_LEN],
    pub org: [u8; ORG_LEN],
    pub net_id: U32<LittleEndian>,
}

/// One IPv6 table record; layout mirrors [`SubnetRecord4`] with 128-bit
/// keys.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct SubnetRecord6 {
    pub net: U128<BigEndian>,
    pub mask: U128<BigEndian>,
    pub be_flag: u8,
    _pad: [u8; 3],
    pub net_vec: U32<LittleEndian>,
    pub asn: U32<LittleEndian>,
    pub lat: F32<LittleEndian>,
    pub lng: F32<LittleEndian>,
    pub precision: F32<LittleEndian>,
    pub country: [u8; COUNTRY_LEN],
    pub county: [u8; LOC_LEN],
    pub city: [u8; LOC_LEN],
    pub org: [u8; ORG_LEN],
    pub net_id: U32<LittleEndian>,
}

/// Decoded view of one record, with the fixed-width strings trimmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetInfo {
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

enum Storage {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Mapped(m) => m,
        }
    }
}

macro_rules! subnet_table {
    ($table:ident, $record:ident, $key:ty, $addr:ty, $key_of:expr) => {
        pub struct $table {
            count: u32,
            version: u32,
            revision: u32,
            mode: SubnetMode,
            storage: Storage,
        }

        impl $table {
            /// Load a table, refusing files whose version or range-mode
            /// does not match `cfg`.
            pub fn load(path: &Path, cfg: SubnetConfig) -> Result<$table, ParserError> {
                let file = File::open(path)?;
                let storage = if cfg.mmap {
                    // read-only private map; the file must not change
                    Storage::Mapped(unsafe { Mmap::map(&file)? })
                } else {
                    let mut buf = Vec::new();
                    let mut file = file;
                    file.read_to_end(&mut buf)?;
                    Storage::Owned(buf)
                };

                let rec_size = std::mem::size_of::<$record>();
                let bytes = storage.bytes();
                if bytes.len() < rec_size || bytes.len() % rec_size != 0 {
                    return Err(ParserError::ParseError(format!(
                        "subnet file size {} is not a multiple of the record size {rec_size}",
                        bytes.len()
                    )));
                }

                let header = $record::ref_from_bytes(&bytes[..rec_size])
                    .map_err(|e| ParserError::ParseError(e.to_string()))?;
                let count = header.net.get() as u32;
                let version = header.net_vec.get();
                let revision = header.net_id.get();

                let file_mode = if version & RANGE_MODE_BIT != 0 {
                    SubnetMode::Range
                } else {
                    SubnetMode::Cidr
                };
                let schema_ver = version & !RANGE_MODE_BIT;
                if schema_ver != SUBNET_FILE_VERSION || file_mode != cfg.mode {
                    return Err(ParserError::VersionMismatch {
                        found: version,
                        expected: SUBNET_FILE_VERSION
                            | if cfg.mode == SubnetMode::Range { RANGE_MODE_BIT } else { 0 },
                    });
                }

                let n_recs = (bytes.len() / rec_size) as u32;
                if count == 0 || count + 1 != n_recs {
                    return Err(ParserError::ParseError(format!(
                        "inconsistent element count in subnet file: header says {count}, file holds {}",
                        n_recs.saturating_sub(1)
                    )));
                }

                Ok($table { count, version: schema_ver, revision, mode: file_mode, storage })
            }

            #[inline]
            pub fn count(&self) -> u32 {
                self.count
            }

            #[inline]
            pub fn version(&self) -> u32 {
                self.version
            }

            #[inline]
            pub fn revision(&self) -> u32 {
                self.revision
            }

            #[inline]
            pub fn mode(&self) -> SubnetMode {
                self.mode
            }

            fn records(&self) -> &[$record] {
                <[$record]>::ref_from_bytes(self.storage.bytes()).unwrap_or(&[])
            }

            /// Record accessor; index 0 is the header/sentinel.
            pub fn record(&self, idx: u32) -> &$record {
                &self.records()[idx as usize]
            }

            /// Trimmed field view; the sentinel decodes to an "unknown"
            /// organization.
            pub fn info(&self, idx: u32) -> SubnetInfo {
                if idx == 0 || idx > self.count {
                    return SubnetInfo { org: "unknown".to_string(), ..Default::default() };
                }
                let r = self.record(idx);
                SubnetInfo {
                    asn: r.asn.get(),
                    country: trim(&r.country),
                    county: trim(&r.county),
                    city: trim(&r.city),
                    org: trim(&r.org),
                    lat: r.lat.get(),
                    lng: r.lng.get(),
                    precision: r.precision.get(),
                    net_id: r.net_id.get(),
                }
            }

            /// Binary search for the range covering `addr`. Returns an index
            /// in `0..=count`; 0 means no range covers the address.
            pub fn lookup(&self, addr: $addr) -> u32 {
                let net: $key = ($key_of)(addr);
                if net == 0 || self.count == 0 {
                    return 0;
                }

                let recs = self.records();
                let mut start = 1i64;
                let mut end = self.count as i64;

                while start <= end {
                    let i = (end + start) / 2;
                    let k = recs[i as usize].net.get();
                    if net < k {
                        end = i - 1;
                    } else if net == k {
                        return i as u32;
                    } else {
                        start = i + 1;
                    }
                }

                // `end` is now the largest entry whose key is below `net`
                if end < 1 {
                    return 0;
                }
                let i = end as u32;
                let r = &recs[i as usize];

                match self.mode {
                    SubnetMode::Cidr => {
                        let mask = r.mask.get();
                        if (r.net.get() & mask) == (net & mask) {
                            return i;
                        }
                    }
                    SubnetMode::Range => {
                        // a begin record below `net` covers it; an end record
                        // means `net` lies past the range
                        if r.be_flag & 0x01 == 0 {
                            return i;
                        }
                    }
                }

                // chase the backpointer to the enclosing range, if any
                let j = r.net_vec.get();
                if j > 0 && j <= self.count {
                    return j;
                }

                0
            }

            /// Linear-scan reference lookup, used to cross-check the binary
            /// search.
            pub fn lookup_linear(&self, addr: $addr) -> u32 {
                let net: $key = ($key_of)(addr);
                if net == 0 {
                    return 0;
                }
                let recs = self.records();
                match self.mode {
                    SubnetMode::Cidr => {
                        // most specific match (longest mask) wins
                        let mut best = 0u32;
                        for idx in 1..=self.count {
                            let r = &recs[idx as usize];
                            let mask = r.mask.get();
                            if (net & mask) == (r.net.get() & mask)
                                && (best == 0 || mask >= recs[best as usize].mask.get())
                            {
                                best = idx;
                            }
                        }
                        best
                    }
                    SubnetMode::Range => {
                        let mut best = 0u32;
                        for idx in 1..=self.count {
                            let r = &recs[idx as usize];
                            if r.be_flag & 0x01 != 0 {
                                continue;
                            }
                            let begin = r.net.get();
                            let end_idx = idx + 1;
                            if end_idx > self.count {
                                warn!("range table ends with an unpaired begin record");
                                break;
                            }
                            let end = recs[end_idx as usize].net.get();
                            if net >= begin && net <= end {
                                best = idx;
                            }
                        }
                        best
                    }
                }
            }
        }
    };
}

subnet_table!(SubnetTable4, SubnetRecord4, u32, Ipv4Addr, |a: Ipv4Addr| u32::from(a));
subnet_table!(SubnetTable6, SubnetRecord6, u128, Ipv6Addr, |a: Ipv6Addr| u128::from(a));

fn trim(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
