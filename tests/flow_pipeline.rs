//! End-to-end scenarios across the analyzer chain: QUIC decryption feeding
//! the TLS analyzer, combined row/schema consistency, and the subnet
//! engine behind the whois surface.
use std::net::{IpAddr, Ipv4Addr};

use flowlyzer::analyzer::bgp::{BgpAnalyzer, BgpConfig};
use flowlyzer::analyzer::quic::{crypto, QuicAnalyzer};
use flowlyzer::analyzer::tls::{TlsAnalyzer, TlsConfig, TlsLists};
use flowlyzer::analyzer::{FlowAnalyzer, PacketContext};
use flowlyzer::models::{FlowDir, FlowView, L4Proto, PacketView};
use flowlyzer::output::{JsonFormat, JsonTranslator, OutputBuffer, TextFormat, TextTranslator};
use flowlyzer::subnet::{
    build_file4, SubnetConfig, SubnetEntry4, SubnetMode, SubnetTable4,
};
use flowlyzer::Schema;

fn udp_flow() -> FlowView {
    FlowView {
        findex: 42,
        src_ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
        dst_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
        src_port: 50000,
        dst_port: 443,
        vlan: 0,
        l4_proto: L4Proto::Udp,
        first_seen_secs: 1_700_000_000,
        direction: FlowDir::A,
        opposite: None,
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

fn varint2(v: u16) -> [u8; 2] {
    (0x4000 | v).to_be_bytes()
}

/// A minimal TLS ClientHello handshake message with an SNI extension.
fn client_hello(sni: &str) -> Vec<u8> {
    let mut sni_data = ((sni.len() + 3) as u16).to_be_bytes().to_vec();
    sni_data.push(0);
    sni_data.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    sni_data.extend_from_slice(sni.as_bytes());
    let mut ext = 0u16.to_be_bytes().to_vec();
    ext.extend_from_slice(&(sni_data.len() as u16).to_be_bytes());
    ext.extend_from_slice(&sni_data);

    let mut body = 0x0303u16.to_be_bytes().to_vec();
    body.extend_from_slice(&1_690_000_000u32.to_be_bytes());
    body.extend_from_slice(&[0x5a; 28]);
    body.push(0); // session id
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&0x1301u16.to_be_bytes());
    body.push(1);
    body.push(0); // null compression
    body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext);

    let mut hs = vec![0x01];
    hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    hs.extend_from_slice(&body);
    hs
}

/// A protected QUIC v1 client Initial packet carrying `crypto_payload`.
fn initial_packet(dcid: &[u8], crypto_payload: &[u8]) -> Vec<u8> {
    let pn_len = 2usize;
    let pktnum = 0u16;

    let mut frames = vec![0x06, 0x00];
    frames.extend_from_slice(&varint2(crypto_payload.len() as u16));
    frames.extend_from_slice(crypto_payload);

    let mut hdr = vec![0xc0 | (pn_len - 1) as u8];
    hdr.extend_from_slice(&1u32.to_be_bytes());
    hdr.push(dcid.len() as u8);
    hdr.extend_from_slice(dcid);
    hdr.push(2);
    hdr.extend_from_slice(&[0xaa, 0xbb]);
    hdr.push(0); // token length
    hdr.extend_from_slice(&varint2((pn_len + frames.len() + 16) as u16));

    let pn_bytes = pktnum.to_be_bytes();
    let mut aad = hdr.clone();
    aad.extend_from_slice(&pn_bytes);

    let secret = crypto::initial_secret(dcid, true, 1).unwrap();
    let ct = crypto::encrypt_payload(&secret, &frames, pktnum as u64, &aad).unwrap();
    let sample: [u8; 16] = ct[4 - pn_len..20 - pn_len].try_into().unwrap();
    let mask = crypto::header_protection_mask(&sample, &secret).unwrap();

    let mut pkt = hdr;
    pkt[0] ^= mask[0] & 0x0f;
    for (i, b) in pn_bytes.iter().enumerate() {
        pkt.push(b ^ mask[i + 1]);
    }
    pkt.extend_from_slice(&ct);
    pkt
}

#[test]
fn test_quic_hands_client_hello_to_tls() {
    let mut quic = QuicAnalyzer::new();
    quic.init(4).unwrap();
    let mut tls = TlsAnalyzer::new(TlsConfig::default(), TlsLists::default());
    tls.init(4).unwrap();

    let flow = udp_flow();
    let hello = client_hello("h3.example.net");
    let bytes = initial_packet(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08], &hello);
    let pkt = packet(&bytes, L4Proto::Udp);

    let mut ctx = PacketContext::default();
    quic.on_new_flow(&pkt, &flow, 0);
    tls.on_new_flow(&pkt, &flow, 0);
    quic.on_layer4(&pkt, &flow, 0, &mut ctx);
    tls.on_layer4(&pkt, &flow, 0, &mut ctx);

    assert!(ctx.quic);
    assert_eq!(tls.flow(0).server_name, "h3.example.net");
    assert_eq!(tls.flow(0).num_handshake, 1);
    // the TLS analyzer declares its dependency on the QUIC analyzer
    assert_eq!(tls.dependencies(), "quic");
}

#[test]
fn test_per_flow_isolation() {
    let mut quic = QuicAnalyzer::new();
    quic.init(4).unwrap();

    let flow = udp_flow();
    let hello = client_hello("a.example");
    let bytes = initial_packet(&[0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80], &hello);
    let pkt = packet(&bytes, L4Proto::Udp);

    let mut ctx = PacketContext::default();
    quic.on_new_flow(&pkt, &flow, 2);
    let before: Vec<String> = (0..4).map(|i| format!("{:?}", quic.flow(i))).collect();
    quic.on_layer4(&pkt, &flow, 2, &mut ctx);

    // no other flow's state may change
    for i in [0usize, 1, 3] {
        assert_eq!(format!("{:?}", quic.flow(i)), before[i]);
    }
    assert_ne!(format!("{:?}", quic.flow(2)), before[2]);
}

#[test]
fn test_combined_row_walks_all_schemas() {
    let mut bgp = BgpAnalyzer::new(
        BgpConfig::default(),
        Box::new(std::io::sink()),
        Box::new(std::io::sink()),
        None,
    )
    .unwrap();
    bgp.init(4).unwrap();
    let mut quic = QuicAnalyzer::new();
    quic.init(4).unwrap();
    let mut tls = TlsAnalyzer::new(TlsConfig::default(), TlsLists::default());
    tls.init(4).unwrap();

    let flow = udp_flow();
    let hello = client_hello("h3.example.net");
    let bytes = initial_packet(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08], &hello);
    let pkt = packet(&bytes, L4Proto::Udp);

    let mut ctx = PacketContext::default();
    for a in [&mut bgp as &mut dyn FlowAnalyzer, &mut quic, &mut tls] {
        a.on_new_flow(&pkt, &flow, 0);
    }
    for a in [&mut bgp as &mut dyn FlowAnalyzer, &mut quic, &mut tls] {
        a.on_layer4(&pkt, &flow, 0, &mut ctx);
    }

    // one row holding every analyzer's fragment, walked by the combined
    // schema without desynchronization
    let mut schema = Schema::new();
    let mut row = OutputBuffer::new();
    for a in [&mut bgp as &mut dyn FlowAnalyzer, &mut quic, &mut tls] {
        schema.extend(a.print_header());
        a.on_flow_terminate(0, &flow, &mut row);
    }

    let text = TextTranslator::new(TextFormat::default());
    let mut line = Vec::new();
    assert!(text.write_row(&schema, row.as_slice(), &mut line).unwrap());
    let line = String::from_utf8(line).unwrap();
    assert_eq!(line.matches('\t').count(), schema.values.len() - 1);

    let json = JsonTranslator::new(TextFormat::default(), JsonFormat::default());
    let mut obj = Vec::new();
    assert!(json.write_row(&schema, row.as_slice(), &mut obj).unwrap());
    let obj = String::from_utf8(obj).unwrap();
    assert!(obj.contains("\"quicDCID\":\"8394c8f03e515708\""));
    assert!(obj.contains("\"sslServerName\":[\"h3.example.net\"]"));
}

#[test]
fn test_subnet_lookup_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subnets4.bin");
    build_file4(
        &path,
        SubnetMode::Cidr,
        &[SubnetEntry4 {
            net: "1.0.0.0/24".parse().unwrap(),
            asn: 13335,
            country: "US".to_string(),
            org: "Cloudflare".to_string(),
            ..Default::default()
        }],
    )
    .unwrap();

    let table = SubnetTable4::load(&path, SubnetConfig::default()).unwrap();

    let hit = table.lookup(Ipv4Addr::new(1, 0, 0, 1));
    assert!(hit > 0);
    let info = table.info(hit);
    assert_eq!(info.org, "Cloudflare");
    assert_eq!(info.asn, 13335);
    assert_eq!(info.country, "US");

    assert_eq!(table.lookup(Ipv4Addr::new(1, 0, 1, 1)), 0);
    assert_eq!(table.info(0).org, "unknown");
}
