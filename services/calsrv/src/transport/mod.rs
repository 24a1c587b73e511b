//! Transport layer
//!
//! Byte channels used to reach a meter.

pub mod serial;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use serial::{FlowControl, Parity, SerialTransport, SerialTransportConfig};
pub use traits::{ConnectionState, Transport, TransportConfig, TransportError, TransportStats};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockTransport, MockTransportConfig, MockTransportHandle};
