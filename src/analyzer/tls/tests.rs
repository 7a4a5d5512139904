use std::net::{IpAddr, Ipv4Addr};

use md5::Md5;
use sha2::Digest;

use super::*;
use crate::analyzer::PacketContext;
use crate::models::FlowDir;

fn analyzer() -> TlsAnalyzer {
    let mut a = TlsAnalyzer::new(TlsConfig::default(), TlsLists::default());
    a.init(8).unwrap();
    a
}

fn analyzer_with(cfg: TlsConfig) -> TlsAnalyzer {
    let mut a = TlsAnalyzer::new(cfg, TlsLists::default());
    a.init(8).unwrap();
    a
}

fn flow_view(l4_proto: L4Proto, direction: FlowDir, opposite: Option<usize>) -> FlowView {
    FlowView {
        findex: 1,
        src_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        dst_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
        src_port: 49152,
        dst_port: 443,
        vlan: 0,
        l4_proto,
        first_seen_secs: 1_700_000_000,
        direction,
        opposite,
    }
}

fn packet<'a>(l7: &'a [u8], l4_proto: L4Proto) -> PacketView<'a> {
    PacketView {
        l7,
        l7_len: l7.len() as u16,
        ts_secs: 1_700_000_000,
        ts_usecs: 0,
        l4_proto,
        first_fragment: true,
        pkt_num: 1,
    }
}

fn ext(typ: u16, data: &[u8]) -> Vec<u8> {
    let mut v = typ.to_be_bytes().to_vec();
    v.extend_from_slice(&(data.len() as u16).to_be_bytes());
    v.extend_from_slice(data);
    v
}

fn sni_ext(name: &str) -> Vec<u8> {
    let mut data = ((name.len() + 3) as u16).to_be_bytes().to_vec(); // list length
    data.push(0); // host_name
    data.extend_from_slice(&(name.len() as u16).to_be_bytes());
    data.extend_from_slice(name.as_bytes());
    ext(0x0000, &data)
}

fn curves_ext(curves: &[u16]) -> Vec<u8> {
    let mut data = ((curves.len() * 2) as u16).to_be_bytes().to_vec();
    for c in curves {
        data.extend_from_slice(&c.to_be_bytes());
    }
    ext(0x000a, &data)
}

fn formats_ext(formats: &[u8]) -> Vec<u8> {
    let mut data = vec![formats.len() as u8];
    data.extend_from_slice(formats);
    ext(0x000b, &data)
}

fn alpn_ext(protos: &[&str]) -> Vec<u8> {
    let mut list = Vec::new();
    for p in protos {
        list.push(p.len() as u8);
        list.extend_from_slice(p.as_bytes());
    }
    let mut data = (list.len() as u16).to_be_bytes().to_vec();
    data.extend_from_slice(&list);
    ext(0x0010, &data)
}

fn supported_versions_ext(versions: &[u16]) -> Vec<u8> {
    let mut data = vec![(versions.len() * 2) as u8];
    for v in versions {
        data.extend_from_slice(&v.to_be_bytes());
    }
    ext(0x002b, &data)
}

/// ServerHello variant: the single negotiated version, no length byte.
fn server_supported_version_ext(version: u16) -> Vec<u8> {
    ext(0x002b, &version.to_be_bytes())
}

/// Handshake message inside one record.
fn record(rec_version: u16, typ: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![typ];
    v.extend_from_slice(&rec_version.to_be_bytes());
    v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    v.extend_from_slice(payload);
    v
}

fn hello(ht: u8, hand_version: u16, ciphers: &[u16], exts: &[Vec<u8>]) -> Vec<u8> {
    let mut body = hand_version.to_be_bytes().to_vec();
    // random: a plausible gmt_unix_time plus patterned bytes
    body.extend_from_slice(&1_690_000_000u32.to_be_bytes());
    body.extend_from_slice(&[0x5a; 28]);
    body.push(0); // session id length
    if ht == TLS_HT_CLIENT_HELLO {
        body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
    }
    for c in ciphers {
        body.extend_from_slice(&c.to_be_bytes());
    }
    if ht == TLS_HT_CLIENT_HELLO {
        body.push(1); // one compression method
    }
    body.push(0); // null compression

    let ext_bytes: Vec<u8> = exts.iter().flatten().copied().collect();
    body.extend_from_slice(&(ext_bytes.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_bytes);

    let mut hs = vec![ht];
    hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]); // u24
    hs.extend_from_slice(&body);
    hs
}

fn drive(a: &mut TlsAnalyzer, bytes: &[u8], l4: L4Proto, idx: usize) {
    let flow = flow_view(l4, FlowDir::A, None);
    let pkt = packet(bytes, l4);
    let mut ctx = PacketContext::default();
    a.on_new_flow(&pkt, &flow, idx);
    a.on_layer4(&pkt, &flow, idx, &mut ctx);
}

#[test]
fn test_ja3_reference_string() {
    let mut a = analyzer_with(TlsConfig { ja3_str: true, ..Default::default() });
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0xc02b, 0xc02f],
        &[sni_ext("example.com"), curves_ext(&[0x0017, 0x0018]), formats_ext(&[0x00])],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert_eq!(f.ja3_str, "771,49195-49199,0-10-11,23-24,0");
    let expected = format!("{:x}", Md5::digest(f.ja3_str.as_bytes()));
    assert_eq!(f.ja3_hash, expected);
}

#[test]
fn test_ja3_is_invariant_under_reparsing() {
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0xc02b, 0xc02f],
        &[sni_ext("example.com"), curves_ext(&[0x0017, 0x0018]), formats_ext(&[0x00])],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);

    let mut first = analyzer();
    drive(&mut first, &bytes, L4Proto::Tcp, 0);
    let mut second = analyzer();
    drive(&mut second, &bytes, L4Proto::Tcp, 0);

    assert!(!first.flow(0).ja3_hash.is_empty());
    assert_eq!(first.flow(0).ja3_hash, second.flow(0).ja3_hash);
    assert_eq!(first.flow(0).ja4, second.flow(0).ja4);
}

#[test]
fn test_ja4_a_protocol_tag() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0xc02b, 0xc02f],
        &[sni_ext("example.com"), curves_ext(&[0x0017, 0x0018]), formats_ext(&[0x00])],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    // TCP, TLS 1.2, SNI present, 2 ciphers, 3 extensions, no ALPN
    assert!(f.ja4.starts_with("t12d020300_"), "{}", f.ja4);
    assert!(f.stat.contains(TlsStat::JA4_A_OK));
    assert!(f.stat.contains(TlsStat::JA4_B_OK));
    assert!(f.stat.contains(TlsStat::JA4_C_OK));
}

#[test]
fn test_ja4_grease_and_alpn_handling() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0x0a0a, 0xc02b, 0xc02f], // leading GREASE cipher
        &[
            sni_ext("example.com"),
            alpn_ext(&["h2", "http/1.1"]),
            supported_versions_ext(&[0x2a2a, TLS13]), // GREASE then 1.3
            curves_ext(&[0x0017]),
            formats_ext(&[0x00]),
        ],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    // version from supported_versions, GREASE skipped; first ALPN h2
    assert!(f.ja4.starts_with("t13d0205h2_"), "{}", f.ja4);
    assert!(f.proto.contains(TlsProto::HTTP2));
}

#[test]
fn test_ja4s_server_hello() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_SERVER_HELLO,
        0x0303,
        &[0x1301],
        &[server_supported_version_ext(TLS13)],
    );
    let bytes = record(0x0303, TLS_RT_HANDSHAKE, &hs);

    let flow = flow_view(L4Proto::Tcp, FlowDir::B, None);
    let pkt = packet(&bytes, L4Proto::Tcp);
    let mut ctx = PacketContext::default();
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    // server side: no SNI letter, no cipher count, one extension
    assert!(f.ja4.starts_with("t130100_1301_"), "{}", f.ja4);
    assert_eq!(f.cipher, 0x1301);
}

#[test]
fn test_server_hello_supported_version_list() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_SERVER_HELLO,
        0x0303,
        &[0x1302],
        &[server_supported_version_ext(TLS13)],
    );
    let bytes = record(0x0303, TLS_RT_HANDSHAKE, &hs);
    let flow = flow_view(L4Proto::Tcp, FlowDir::B, None);
    let pkt = packet(&bytes, L4Proto::Tcp);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut PacketContext::default());
    assert_eq!(a.flow(0).supp_ver.as_slice(), [TLS13]);
}

#[test]
fn test_sni_and_extension_lists() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0xc02b],
        &[
            sni_ext("www.example.org"),
            curves_ext(&[0x0017, 0x001d]),
            formats_ext(&[0x00, 0x01]),
        ],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert_eq!(f.server_name, "www.example.org");
    assert_eq!(f.ext_list.as_slice(), [0x0000, 0x000a, 0x000b]);
    assert_eq!(f.num_ext, 3);
    assert_eq!(f.ec.as_slice(), [0x0017, 0x001d]);
    assert_eq!(f.ec_formats.as_slice(), [0x00, 0x01]);
    assert_eq!(f.cipher, 0xc02b);
    assert_eq!(f.version, 0x0303);
    assert_eq!(f.hand_ver.as_slice(), [0x0303]);
    assert_eq!(f.rec_ver.as_slice(), [0x0301]);
}

#[test]
fn test_alert_bag_and_fatal() {
    let mut a = analyzer();
    let mut bytes = record(0x0303, TLS_RT_ALERT, &[TLS_AL_WARN, 0]); // close_notify
    bytes.extend(record(0x0303, TLS_RT_ALERT, &[TLS_AL_FATAL, 40])); // handshake_failure
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert_eq!(f.num_alert, 2);
    assert_eq!(f.alert, (1 << 0) | (1 << 40));
    assert!(f.stat.contains(TlsStat::AL_FATAL));
}

#[test]
fn test_change_cipher_spec_must_be_one() {
    let mut a = analyzer();
    let bytes = record(0x0303, TLS_RT_CHANGE_CIPHER_SPEC, &[0x02]);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);
    assert!(a.flow(0).stat.contains(TlsStat::MALFORMED));
    assert_eq!(a.flow(0).num_change_cipher, 1);
}

#[test]
fn test_heartbleed_pattern() {
    let mut a = analyzer();
    // heartbeat claims 0x4000 payload bytes inside a 19-byte record
    let mut hb = vec![TLS_HB_REQUEST];
    hb.extend_from_slice(&0x4000u16.to_be_bytes());
    hb.extend_from_slice(&[0u8; 16]);
    let bytes = record(0x0302, TLS_RT_HEARTBEAT, &hb);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    assert!(a.flow(0).vuln.contains(TlsVuln::HEART));
}

#[test]
fn test_record_too_long() {
    let mut a = analyzer();
    let mut bytes = vec![TLS_RT_HANDSHAKE];
    bytes.extend_from_slice(&0x0303u16.to_be_bytes());
    bytes.extend_from_slice(&0x7fffu16.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);
    assert!(a.flow(0).stat.contains(TlsStat::REC_TOO_LONG));
}

#[test]
fn test_version_mismatch_between_records() {
    let mut a = analyzer();
    let mut bytes = record(0x0301, TLS_RT_APPLICATION_DATA, &[0u8; 4]);
    bytes.extend(record(0x0303, TLS_RT_APPLICATION_DATA, &[0u8; 4]));
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert!(f.stat.contains(TlsStat::VERSION_MISMATCH));
    assert_eq!(f.num_app_data, 2);
    assert_eq!(f.num_rec_ver, 2);
}

#[test]
fn test_sslv2_fallback() {
    let mut a = analyzer();
    // SSLv2-framed CLIENT-HELLO announcing SSL 3.0
    let mut bytes = vec![0x80, 0x1f]; // high bit: 2-byte header, length 31
    bytes.push(0x01); // message type
    bytes.extend_from_slice(&0x0300u16.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 28]);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    assert_eq!(a.flow(0).version, 0x0300);
}

#[test]
fn test_deflate_compression_flags_crime() {
    let mut a = analyzer();
    let mut body = 0x0303u16.to_be_bytes().to_vec();
    body.extend_from_slice(&1_690_000_000u32.to_be_bytes());
    body.extend_from_slice(&[0x5a; 28]);
    body.push(0); // session id
    body.extend_from_slice(&2u16.to_be_bytes()); // one cipher
    body.extend_from_slice(&0xc02bu16.to_be_bytes());
    body.push(2); // two compression methods
    body.push(1); // deflate
    body.push(0);
    body.extend_from_slice(&0u16.to_be_bytes()); // no extensions
    let mut hs = vec![TLS_HT_CLIENT_HELLO];
    hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    hs.extend_from_slice(&body);
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert!(f.flags.contains(TlsFlags::COMPR));
    assert!(f.vuln.contains(TlsVuln::BREACH));
    assert!(f.vuln.contains(TlsVuln::CRIME));
}

#[test]
fn test_random_all_zero_flags_rand() {
    let mut a = analyzer();
    let mut body = 0x0303u16.to_be_bytes().to_vec();
    body.extend_from_slice(&[0u8; 32]); // all-zero random
    body.push(0);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&0xc02bu16.to_be_bytes());
    body.push(1);
    body.push(0);
    body.extend_from_slice(&0u16.to_be_bytes());
    let mut hs = vec![TLS_HT_CLIENT_HELLO];
    hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    hs.extend_from_slice(&body);
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let f = a.flow(0);
    assert!(f.flags.contains(TlsFlags::RAND));
    assert!(f.flags.contains(TlsFlags::STIME)); // gmt 0 is implausible
}

#[test]
fn test_quic_crypto_payload_is_parsed() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0x1301],
        &[sni_ext("quic.example"), supported_versions_ext(&[TLS13])],
    );
    // CRYPTO frame wrapping the raw handshake (no TLS record layer)
    let mut payload = vec![0x06, 0x00];
    payload.extend_from_slice(&(0x4000u16 | hs.len() as u16).to_be_bytes());
    payload.extend_from_slice(&hs);

    let flow = flow_view(L4Proto::Udp, FlowDir::A, None);
    let pkt = packet(&payload, L4Proto::Udp);
    let mut ctx = PacketContext { quic: true, decrypted_initial: Some(payload.clone()) };
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert_eq!(f.server_name, "quic.example");
    assert_eq!(f.num_handshake, 1);
    // QUIC carries TLS 1.3 and fingerprints as 'q'
    assert!(f.ja4.starts_with("q13d"), "{}", f.ja4);
}

#[test]
fn test_quic_flow_without_decrypted_payload_is_skipped() {
    let mut a = analyzer();
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &[0u8; 8]);
    let flow = flow_view(L4Proto::Udp, FlowDir::A, None);
    let pkt = packet(&bytes, L4Proto::Udp);
    let mut ctx = PacketContext { quic: true, decrypted_initial: None };
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);
    assert_eq!(a.flow(0).num_handshake, 0);
}

#[test]
fn test_invalid_flow_is_reset_at_terminate() {
    let mut a = analyzer();
    let bytes = record(0x0303, TLS_RT_ALERT, &[TLS_AL_FATAL, 40]);
    // never got a valid hello: version stays 0 after an alert-only flow?
    // version is set from the record header, so craft a non-TLS flow
    let garbage = [0x00u8; 16];
    let flow = flow_view(L4Proto::Tcp, FlowDir::A, None);
    let pkt = packet(&garbage, L4Proto::Tcp);
    let mut ctx = PacketContext::default();
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);
    drop(bytes);

    let mut out = crate::output::OutputBuffer::new();
    a.on_flow_terminate(0, &flow, &mut out);
    assert!(a.flow(0).stat.is_empty());
}

#[test]
fn test_terminate_row_matches_schema() {
    let mut a = analyzer();
    let hs = hello(
        TLS_HT_CLIENT_HELLO,
        0x0303,
        &[0xc02b, 0xc02f],
        &[sni_ext("example.com"), curves_ext(&[0x0017]), formats_ext(&[0x00])],
    );
    let bytes = record(0x0301, TLS_RT_HANDSHAKE, &hs);
    let flow = flow_view(L4Proto::Tcp, FlowDir::A, None);
    drive(&mut a, &bytes, L4Proto::Tcp, 0);

    let mut out = crate::output::OutputBuffer::new();
    a.on_flow_terminate(0, &flow, &mut out);

    let schema = a.print_header();
    let tr = crate::output::TextTranslator::new(crate::output::TextFormat::default());
    let mut line = Vec::new();
    assert!(tr.write_row(&schema, out.as_slice(), &mut line).unwrap());
    let line = String::from_utf8(line).unwrap();
    assert!(line.contains("example.com"));
    assert!(line.contains("0xc02b"));

    // and the same row renders as JSON
    let jtr = crate::output::JsonTranslator::new(
        crate::output::TextFormat::default(),
        crate::output::JsonFormat::default(),
    );
    let mut json = Vec::new();
    assert!(jtr.write_row(&schema, out.as_slice(), &mut json).unwrap());
    let json = String::from_utf8(json).unwrap();
    assert!(json.contains("\"sslServerName\":[\"example.com\"]"));
}
