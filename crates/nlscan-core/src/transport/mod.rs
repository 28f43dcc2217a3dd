//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockDevice, MockTransport, OpenGate};
pub use nusb::{DeviceSummary, NusbTransport, list_scanners};
pub use traits::{ScannerTransport, TransportError, TransportListener};
