/*!
Data models shared between the analyzers, the output layer and the sinks.
*/
pub mod bgp;
pub mod flow;
pub mod quic;
pub mod record;
pub mod tls;

pub use bgp::*;
pub use flow::*;
pub use quic::*;
pub use record::*;
pub use tls::*;
