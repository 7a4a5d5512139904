/*!
The flow-analyzer contract.

The capture runtime drives each analyzer through the same lifecycle:
`init` once at startup, `print_header` to publish the output schema,
`on_new_flow` / `on_layer4` per packet, `on_flow_terminate` once when the
flow ends (the analyzer appends its row fragment to the shared output
buffer), `plugin_report` and `finalize` at teardown. All callbacks run on
one logical thread in packet order; per-flow state is serially consistent.
*/
pub mod bgp;
pub mod quic;
pub mod tls;

use std::io;

use crate::error::ParserError;
use crate::models::{FlowIndex, FlowView, PacketView, Schema};
use crate::output::OutputBuffer;

/// Per-packet context shared along the analyzer chain within one
/// `on_layer4` round. The QUIC analyzer publishes the decrypted Initial
/// payload here; the TLS analyzer consumes it in the same round.
#[derive(Debug, Default)]
pub struct PacketContext {
    /// Set when the flow is classified as QUIC.
    pub quic: bool,
    /// Decrypted Initial-packet payload, when decryption succeeded.
    pub decrypted_initial: Option<Vec<u8>>,
}

impl PacketContext {
    /// Reset between packets; allocations are kept.
    pub fn reset(&mut self) {
        self.quic = false;
        if let Some(buf) = &mut self.decrypted_initial {
            buf.clear();
        }
        self.decrypted_initial = None;
    }
}

/// Lifecycle implemented by every flow analyzer.
pub trait FlowAnalyzer {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Space-delimited names of analyzers that must run earlier in the
    /// chain (e.g. the TLS analyzer depends on the QUIC analyzer).
    fn dependencies(&self) -> &'static str {
        ""
    }

    /// Size the per-flow state array; called once before any packet.
    fn init(&mut self, flow_capacity: usize) -> Result<(), ParserError>;

    /// Publish the output schema; called once at startup.
    fn print_header(&self) -> Schema;

    fn on_new_flow(&mut self, packet: &PacketView, flow: &FlowView, idx: FlowIndex);

    fn on_layer4(
        &mut self,
        packet: &PacketView,
        flow: &FlowView,
        idx: FlowIndex,
        ctx: &mut PacketContext,
    );

    /// Append this analyzer's row fragment for the terminating flow.
    fn on_flow_terminate(&mut self, idx: FlowIndex, flow: &FlowView, out: &mut OutputBuffer);

    /// End-of-run summary.
    fn plugin_report(&self, w: &mut dyn io::Write) -> io::Result<()> {
        let _ = w;
        Ok(())
    }

    /// Release process-wide resources.
    fn finalize(&mut self) {}
}
