/*!
Shared leaf formatters for the text and JSON translators.
*/
use std::net::Ipv6Addr;

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Ip4Format, Ip6Format, MacFormat, TextFormat, TimeFormat};

macro_rules! hx {
    ($fmt:expr, $v:expr, $w:expr) => {
        if $fmt.hex_upper {
            format!("0x{:0w$X}", $v, w = $w)
        } else {
            format!("0x{:0w$x}", $v, w = $w)
        }
    };
}

pub(crate) fn hex8(fmt: &TextFormat, v: u8) -> String {
    hx!(fmt, v, 2)
}

pub(crate) fn hex16(fmt: &TextFormat, v: u16) -> String {
    hx!(fmt, v, 4)
}

pub(crate) fn hex32(fmt: &TextFormat, v: u32) -> String {
    hx!(fmt, v, 8)
}

pub(crate) fn hex64(fmt: &TextFormat, v: u64) -> String {
    hx!(fmt, v, 16)
}

pub(crate) fn hex128(fmt: &TextFormat, v: u128) -> String {
    hx!(fmt, v, 32)
}

pub(crate) fn hex_bytes(fmt: &TextFormat, bytes: &[u8]) -> String {
    let body = if fmt.hex_upper {
        hex::encode_upper(bytes)
    } else {
        hex::encode(bytes)
    };
    format!("0x{body}")
}

/// Shortest round-trip double with a guaranteed decimal point or exponent
/// so a reader can not mistake it for an integer. The exponent carries no
/// sign prefix and no leading zeros.
pub(crate) fn double(v: f64) -> String {
    let mut s = format!("{v}");
    if !s.contains('.') && !s.contains('e') && !s.contains("NaN") && !s.contains("inf") {
        s.push_str(".0");
    }
    s
}

pub(crate) fn ip4(fmt: &TextFormat, o: [u8; 4]) -> String {
    match fmt.ip4 {
        Ip4Format::Normal => format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3]),
        Ip4Format::Normalized => format!("{:03}.{:03}.{:03}.{:03}", o[0], o[1], o[2], o[3]),
        Ip4Format::Hex => hex32(fmt, u32::from_be_bytes(o)),
        Ip4Format::Uint32 => format!("{}", u32::from_be_bytes(o)),
    }
}

pub(crate) fn ip6(fmt: &TextFormat, o: [u8; 16]) -> String {
    match fmt.ip6 {
        Ip6Format::Compressed => Ipv6Addr::from(o).to_string(),
        Ip6Format::Uncompressed => {
            let g: Vec<String> = o
                .chunks_exact(2)
                .map(|c| {
                    let v = u16::from_be_bytes([c[0], c[1]]);
                    if fmt.hex_upper {
                        format!("{v:04X}")
                    } else {
                        format!("{v:04x}")
                    }
                })
                .collect();
            g.join(":")
        }
        Ip6Format::Hex128 => hex128(fmt, u128::from_be_bytes(o)),
        Ip6Format::Hex64Pair => {
            let hi = u64::from_be_bytes(o[..8].try_into().unwrap());
            let lo = u64::from_be_bytes(o[8..].try_into().unwrap());
            format!("{}_{}", hex64(fmt, hi), hex64(fmt, lo))
        }
    }
}

pub(crate) fn mac(fmt: &TextFormat, m: [u8; 6]) -> String {
    match fmt.mac {
        MacFormat::Separated => {
            let g: Vec<String> = m
                .iter()
                .map(|b| {
                    if fmt.hex_upper {
                        format!("{b:02X}")
                    } else {
                        format!("{b:02x}")
                    }
                })
                .collect();
            g.join(&fmt.mac_sep)
        }
        MacFormat::Hex64 => {
            let v = m.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            hex64(fmt, v)
        }
        MacFormat::Uint64 => {
            let v = m.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            format!("{v}")
        }
    }
}

/// Timestamps honor the configured representation; durations always print
/// as fractional seconds.
pub(crate) fn timestamp(fmt: &TextFormat, secs: u64, frac: u32, is_duration: bool) -> String {
    if is_duration || fmt.time == TimeFormat::UnixFrac {
        return format!("{secs}.{frac:06}");
    }
    match DateTime::<Utc>::from_timestamp(secs as i64, frac.saturating_mul(1000)) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, false),
        None => format!("{secs}.{frac:06}"),
    }
}
