//! nlscan-core: connection and session management for USB barcode scanners.
//!
//! This crate owns the lifecycle of a USB-attached scanner: opening the
//! link, tracking plug state, and turning received frames into scan
//! results that any number of observers can follow.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: the physical link abstraction (nusb, mock)
//! - **Decode**: frame to [`ScanResult`] translation
//! - **State**: connection state machine and the observable snapshot store
//! - **Events**: observer trait and recovered session errors
//! - **Session**: the manager tying them together
//! - **Config**: TOML-backed device and decode settings
//!
//! # Example
//!
//! ```no_run
//! use nlscan_core::{NusbTransport, ScannerConfig, SessionManager};
//!
//! let config = ScannerConfig::default();
//! let transport = NusbTransport::new(config.device.clone()).expect("bad config");
//! let manager = SessionManager::new(transport, config.decode);
//!
//! let updates = manager.subscribe();
//! if manager.connect() {
//!     for snapshot in updates {
//!         if let Some(scan) = snapshot.new_scan() {
//!             println!("{}", scan.text());
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod decode;
pub mod events;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{DeviceConfig, ScannerConfig, TransferKind};
pub use decode::{DecodeConfig, DecodeError, ScanResult};
pub use events::{NullObserver, ScannerObserver, SessionError, TracingObserver, spawn_observer};
pub use session::{SessionManager, TriggerOutcome};
pub use state::{ConnectionStatus, SessionInfo, StateChange, StateSnapshot, Subscription};
pub use transport::{
    MockTransport, NusbTransport, ScannerTransport, TransportError, TransportListener,
};
