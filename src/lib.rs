/*!
flowlyzer is a passive network-flow analysis library.

Packets arrive from a capture source, are grouped into bidirectional
flows, and each flow is handed to a chain of protocol analyzers. On flow
termination every analyzer appends its findings to one typed, self-
describing binary row which the bundled translators render as text or
JSON.

The crate provides:
- the [`analyzer`] module with the per-flow analyzers: BGP-4
  ([`analyzer::bgp`]), QUIC with Initial-packet decryption
  ([`analyzer::quic`]) and TLS/SSL with the JA3/JA4 fingerprint family
  ([`analyzer::tls`]), all driven through the [`analyzer::FlowAnalyzer`]
  lifecycle;
- the [`output`] module with the typed record model, the output buffer
  append protocol and the binary→text / binary→JSON translators;
- the [`subnet`] module, a range-encoded IP→(country, ASN, organization)
  lookup engine for IPv4 and IPv6;
- the [`fplist`] module with the sorted fingerprint lists backing JA3/JA4
  name resolution.

# Example

Classify one BGP packet and render the flow row as text:

```
use flowlyzer::analyzer::bgp::{BgpAnalyzer, BgpConfig};
use flowlyzer::analyzer::{FlowAnalyzer, PacketContext};
use flowlyzer::models::{FlowDir, FlowView, L4Proto, PacketView};
use flowlyzer::output::{OutputBuffer, TextFormat, TextTranslator};

let mut bgp = BgpAnalyzer::new(
    BgpConfig::default(),
    Box::new(std::io::sink()),
    Box::new(std::io::sink()),
    None,
).unwrap();
bgp.init(16).unwrap();

let flow = FlowView {
    findex: 1,
    src_ip: "192.0.2.1".parse().unwrap(),
    dst_ip: "192.0.2.2".parse().unwrap(),
    src_port: 33000,
    dst_port: 179,
    vlan: 0,
    l4_proto: L4Proto::Tcp,
    first_seen_secs: 1_700_000_000,
    direction: FlowDir::A,
    opposite: None,
};

// a KEEPALIVE message
let mut l7 = vec![0xff; 16];
l7.extend_from_slice(&19u16.to_be_bytes());
l7.push(4);

let packet = PacketView {
    l7: &l7,
    l7_len: l7.len() as u16,
    ts_secs: 1_700_000_000,
    ts_usecs: 0,
    l4_proto: L4Proto::Tcp,
    first_fragment: true,
    pkt_num: 1,
};

let mut ctx = PacketContext::default();
bgp.on_new_flow(&packet, &flow, 0);
bgp.on_layer4(&packet, &flow, 0, &mut ctx);

let mut row = OutputBuffer::new();
bgp.on_flow_terminate(0, &flow, &mut row);

let translator = TextTranslator::new(TextFormat::default());
let mut line = Vec::new();
translator.write_row(&bgp.print_header(), row.as_slice(), &mut line).unwrap();
assert!(String::from_utf8(line).unwrap().starts_with("0x0001"));
```
*/
pub mod analyzer;
pub mod buffer;
pub mod error;
pub mod fplist;
pub mod models;
pub mod output;
pub mod subnet;

pub use crate::analyzer::{FlowAnalyzer, PacketContext};
pub use crate::buffer::ByteCursor;
pub use crate::error::ParserError;
pub use crate::fplist::FingerprintList;
pub use crate::models::{FlowIndex, FlowView, PacketView, Schema};
pub use crate::output::{JsonTranslator, OutputBuffer, TextTranslator};
