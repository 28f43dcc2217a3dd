//! Scanner transport abstraction.
//!
//! Defines the `ScannerTransport` trait for the physical link and the
//! `TransportListener` callbacks the link drives from its own thread,
//! allowing different implementations (nusb, mock, etc.).

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={}", .pid.map_or("*".to_string(), |p| format!("{:04X}", p)))]
    DeviceNotFound { vid: u16, pid: Option<u16> },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Link is already open")]
    AlreadyOpen,

    #[error("Link is not open")]
    NotOpen,

    #[error("Operation not supported by this device")]
    Unsupported,

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callbacks a transport makes while a link is open.
///
/// Called from the transport's delivery thread, never from the thread that
/// called `open`/`close`. Implementations must return promptly.
pub trait TransportListener: Send + Sync {
    /// Device plugged in (`true`) or pulled out (`false`).
    fn on_plug_changed(&self, plugged: bool);

    /// A frame arrived; only `data[..length]` is meaningful.
    fn on_data_received(&self, data: &[u8], length: usize);
}

/// Abstract scanner link.
///
/// Contract:
/// - after `open` returns `Err`, no callbacks fire for that attempt
/// - `close` is idempotent, and once it returns no further callbacks fire
/// - `open` gives up within a bounded time of its own choosing
pub trait ScannerTransport: Send {
    /// Acquire the physical link and start delivering events to `listener`.
    fn open(&mut self, listener: Arc<dyn TransportListener>) -> Result<(), TransportError>;

    /// Release the link.
    fn close(&mut self);

    /// Ask the device for a software-triggered read.
    fn trigger(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Whether a link is currently held.
    fn is_open(&self) -> bool;

    /// VID/PID of the open device, if any.
    fn device_ids(&self) -> Option<(u16, u16)> {
        None
    }
}

impl<T: ScannerTransport + ?Sized> ScannerTransport for Box<T> {
    fn open(&mut self, listener: Arc<dyn TransportListener>) -> Result<(), TransportError> {
        (**self).open(listener)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn trigger(&mut self) -> Result<(), TransportError> {
        (**self).trigger()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn device_ids(&self) -> Option<(u16, u16)> {
        (**self).device_ids()
    }
}
