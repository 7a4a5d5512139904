/*!
JA3 and JA4-family fingerprints.

JA3/JA3S are MD5 hashes over decimal-joined hello fields in arrival order
with GREASE values stripped. The JA4 family combines a readable prefix
with SHA-256 truncations of the cipher and extension lists, in sorted and
original-order variants, hashed and raw.
*/
use itertools::Itertools;
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::models::tls::*;
use crate::models::{FlowIndex, FlowView, L4Proto};

use super::TlsAnalyzer;

/// Truncated length of the JA4_b/JA4_c SHA-256 (hex characters).
const JA4_TRUNC_HASH_LEN: usize = 12;

/// ja3 = md5(version,ciphers,extensions,curves,point-formats)
/// ja3s = md5(version,cipher,extensions)
pub(super) fn compute_ja3(a: &mut TlsAnalyzer, handshake_type: u8, idx: FlowIndex) {
    let f = &mut a.flows[idx];

    if !f.ja3_hash.is_empty() {
        // only the first Client/Server Hello is fingerprinted
        return;
    }

    if f.stat.intersects(
        TlsStat::CIPHERL_TRUNC | TlsStat::EXTL_TRUNC | TlsStat::EC_TRUNC,
    ) {
        // truncated lists cannot be fingerprinted faithfully
        f.stat |= TlsStat::JA3_FAIL;
        return;
    }

    let mut fingerprint = format!("{},", f.version);

    if handshake_type == TLS_HT_SERVER_HELLO {
        fingerprint.push_str(&f.cipher.to_string());
    } else {
        let ciphers = f
            .cipher_list
            .iter()
            .filter(|c| !tls_is_grease(**c))
            .map(u16::to_string)
            .join("-");
        fingerprint.push_str(&ciphers);
    }
    fingerprint.push(',');

    let exts = f
        .ext_list
        .iter()
        .filter(|e| !tls_is_grease(**e))
        .map(u16::to_string)
        .join("-");
    fingerprint.push_str(&exts);

    if handshake_type == TLS_HT_CLIENT_HELLO {
        fingerprint.push(',');
        let curves = f
            .ec
            .iter()
            .filter(|c| !tls_is_grease(**c))
            .map(u16::to_string)
            .join("-");
        fingerprint.push_str(&curves);
        fingerprint.push(',');
        let formats = f.ec_formats.iter().map(u8::to_string).join("-");
        fingerprint.push_str(&formats);
    }

    f.ja3_hash = format!("{:x}", Md5::digest(fingerprint.as_bytes()));
    if a.cfg.ja3_str {
        f.ja3_str = fingerprint;
    }

    if let Some(list) = &a.lists.ja3 {
        if let Some(desc) = list.lookup(&f.ja3_hash) {
            f.ja3_desc = desc.to_string();
        }
    }
}

fn sha256_trunc(input: &str) -> String {
    let mut hash = format!("{:x}", Sha256::digest(input.as_bytes()));
    hash.truncate(JA4_TRUNC_HASH_LEN);
    hash
}

fn hexlist(values: impl Iterator<Item = u16>) -> String {
    values.map(|v| format!("{v:04x}")).join(",")
}

/// TLS version mnemonic of the JA4_a prefix.
fn ja4_version_str(version: u16) -> Option<&'static str> {
    if tls_v_is_tls13(version) {
        Some("13")
    } else if version == TLS12 {
        Some("12")
    } else if version == TLS11 {
        Some("11")
    } else if version == TLS10 {
        Some("10")
    } else if version == SSLV3 {
        Some("s3")
    } else if version == SSLV2 {
        Some("s2")
    } else if version == SSLV1 {
        Some("s1")
    } else {
        None
    }
}

#[allow(clippy::too_many_lines)]
pub(super) fn compute_ja4(
    a: &mut TlsAnalyzer,
    handshake_type: u8,
    idx: FlowIndex,
    flow: &FlowView,
) {
    let cfg = a.cfg.clone();
    let f = &mut a.flows[idx];

    let first_done = if !f.ja4.is_empty() {
        true
    } else if cfg.ja4_o && !f.ja4_o.is_empty() {
        true
    } else if cfg.ja4_r && !f.ja4_r.is_empty() {
        true
    } else {
        cfg.ja4_ro && !f.ja4_ro.is_empty()
    };
    if first_done {
        // only the first Client/Server Hello is fingerprinted
        return;
    }

    if f.stat.intersects(TlsStat::CIPHERL_TRUNC | TlsStat::EXTL_TRUNC) {
        return;
    }
    if handshake_type == TLS_HT_CLIENT_HELLO && f.stat.contains(TlsStat::SIG_ALG_TRUNC) {
        return;
    }

    /* JA4_a */

    let mut ja4_a = String::with_capacity(10);

    // protocol: TCP 't', QUIC 'q'
    match flow.l4_proto {
        L4Proto::Tcp => ja4_a.push('t'),
        L4Proto::Udp => ja4_a.push('q'),
        _ => {
            f.stat |= TlsStat::JA4_FAIL;
            return;
        }
    }

    // negotiated version: first non-GREASE supported version, else the
    // record version
    let mut version = f.version;
    if !f.supp_ver.is_empty() {
        match f.supp_ver.iter().find(|v| !tls_is_grease(**v)) {
            Some(&v) => version = v,
            None => {
                f.stat |= TlsStat::JA4_FAIL;
                return;
            }
        }
    }
    let Some(version_str) = ja4_version_str(version) else {
        f.stat |= TlsStat::JA4_FAIL;
        return;
    };
    ja4_a.push_str(version_str);

    if handshake_type == TLS_HT_CLIENT_HELLO {
        // SNI present 'd', absent 'i'
        let has_sni = !f.server_name.is_empty() || f.ext_list.contains(&TLS_EXT_SERVER_NAME);
        ja4_a.push(if has_sni { 'd' } else { 'i' });
    }

    let num_cipher = f.cipher_list.iter().filter(|c| !tls_is_grease(**c)).count();
    if handshake_type == TLS_HT_CLIENT_HELLO {
        ja4_a.push_str(&format!("{num_cipher:02}"));
    }

    let num_ext = f.ext_list.iter().filter(|e| !tls_is_grease(**e)).count();
    ja4_a.push_str(&format!("{num_ext:02}"));

    // first and last character of the first usable ALPN value, 00 without
    let mut alpn = ['0', '0'];
    if !f.alpn_list.is_empty() {
        let usable = f
            .alpn_list
            .iter()
            .find(|p| p.len() >= 2 && !p.starts_with("ignore/"));
        match usable {
            Some(p) => {
                alpn[0] = p.chars().next().unwrap();
                alpn[1] = p.chars().last().unwrap();
            }
            None => {
                f.stat |= TlsStat::JA4_FAIL;
                return;
            }
        }
    }
    ja4_a.push(alpn[0]);
    ja4_a.push(alpn[1]);

    f.stat |= TlsStat::JA4_A_OK;

    if handshake_type == TLS_HT_SERVER_HELLO {
        /* JA4S */

        let ja4s_b = format!("{:04x}", f.cipher);
        f.stat |= TlsStat::JA4_B_OK;

        // extensions in the order they appear
        let ja4s_c = hexlist(f.ext_list.iter().copied().filter(|e| !tls_is_grease(*e)));
        let ja4s_c_hash = sha256_trunc(&ja4s_c);
        f.stat |= TlsStat::JA4_C_OK;

        f.ja4 = format!("{ja4_a}_{ja4s_b}_{ja4s_c_hash}");
        if cfg.ja4_o {
            f.ja4_o = f.ja4.clone();
        }
        if cfg.ja4_r {
            f.ja4_r = format!("{ja4_a}_{ja4s_b}_{ja4s_c}");
        }
        if cfg.ja4_ro {
            f.ja4_ro = format!("{ja4_a}_{ja4s_b}_{ja4s_c}");
        }

        if let Some(list) = &a.lists.ja4s {
            if let Some(desc) = list.lookup(&a.flows[idx].ja4) {
                a.flows[idx].ja4_desc = desc.to_string();
            }
        }
        return;
    }

    /* JA4 (client) */

    // cipher suites, ascending-hex sorted (JA4_b) and original order
    let mut sorted_cipher: Vec<u16> =
        f.cipher_list.iter().copied().filter(|c| !tls_is_grease(*c)).collect();
    let ja4_o_b = hexlist(sorted_cipher.iter().copied());
    sorted_cipher.sort_unstable();
    let ja4_r_b = hexlist(sorted_cipher.into_iter());

    let ja4_b_hash = sha256_trunc(&ja4_r_b);
    let ja4_o_b_hash = sha256_trunc(&ja4_o_b);
    f.stat |= TlsStat::JA4_B_OK;

    // extensions sorted without SNI and ALPN, plus the signature
    // algorithms in their original order (JA4_c); the original-order
    // variant keeps SNI and ALPN
    let mut sorted_ext: Vec<u16> = f
        .ext_list
        .iter()
        .copied()
        .filter(|e| !tls_is_grease(*e) && *e != TLS_EXT_SERVER_NAME && *e != TLS_EXT_ALPN)
        .collect();
    sorted_ext.sort_unstable();
    let sig_algs = hexlist(f.sig_alg.iter().copied().filter(|s| !tls_is_grease(*s)));

    let mut ja4_r_c = hexlist(sorted_ext.into_iter());
    let mut ja4_o_c = hexlist(f.ext_list.iter().copied().filter(|e| !tls_is_grease(*e)));
    if !f.sig_alg.is_empty() {
        ja4_r_c.push('_');
        ja4_r_c.push_str(&sig_algs);
        ja4_o_c.push('_');
        ja4_o_c.push_str(&sig_algs);
    }

    let ja4_c_hash = sha256_trunc(&ja4_r_c);
    let ja4_o_c_hash = sha256_trunc(&ja4_o_c);
    f.stat |= TlsStat::JA4_C_OK;

    f.ja4 = format!("{ja4_a}_{ja4_b_hash}_{ja4_c_hash}");
    if cfg.ja4_o {
        f.ja4_o = format!("{ja4_a}_{ja4_o_b_hash}_{ja4_o_c_hash}");
    }
    if cfg.ja4_r {
        f.ja4_r = format!("{ja4_a}_{ja4_r_b}_{ja4_r_c}");
    }
    if cfg.ja4_ro {
        f.ja4_ro = format!("{ja4_a}_{ja4_o_b}_{ja4_o_c}");
    }

    if let Some(list) = &a.lists.ja4 {
        if let Some(desc) = list.lookup(&a.flows[idx].ja4) {
            a.flows[idx].ja4_desc = desc.to_string();
        }
    }
}
