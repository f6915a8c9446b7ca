//! Control plane: outbound correlation and inbound dispatch.

pub mod correlator;
pub mod dispatcher;

pub use correlator::Correlator;
pub use dispatcher::{InboundDispatcher, McpHandler};
