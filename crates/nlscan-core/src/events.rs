//! Observer side of the session manager.
//!
//! Lets CLI/TUI/other consumers follow connection and scan state without
//! touching the manager's internals.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::decode::DecodeError;
use crate::state::store::{StateChange, StateSnapshot, Subscription};

/// Faults the session manager recovers from locally.
///
/// None of these is returned to callers as an `Err`; open failures and
/// unplugs show up as the snapshot's `last_error`, decode failures only in
/// logs and session counters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The transport could not establish the link.
    #[error("Failed to open scanner: {0}")]
    OpenFailure(String),

    /// The device was pulled while a session was live.
    #[error("Scanner unplugged while connected")]
    UnexpectedDisconnect,

    /// A received frame was not a usable payload.
    #[error("Could not decode scan payload: {0}")]
    DecodeFailure(#[from] DecodeError),
}

/// Observer trait for receiving state updates.
///
/// Implement this trait in your UI layer to receive updates.
pub trait ScannerObserver: Send + Sync {
    /// Called for every published snapshot, in order.
    fn on_update(&self, snapshot: &StateSnapshot);
}

impl<F> ScannerObserver for F
where
    F: Fn(&StateSnapshot) + Send + Sync,
{
    fn on_update(&self, snapshot: &StateSnapshot) {
        self(snapshot)
    }
}

/// No-op observer that discards all updates.
pub struct NullObserver;

impl ScannerObserver for NullObserver {
    fn on_update(&self, _snapshot: &StateSnapshot) {}
}

/// Observer that logs updates using tracing.
pub struct TracingObserver;

impl ScannerObserver for TracingObserver {
    fn on_update(&self, snapshot: &StateSnapshot) {
        match snapshot.change {
            StateChange::Initial => {
                tracing::debug!(status = %snapshot.status, revision = snapshot.revision, "Observing scanner state");
            }
            StateChange::Status { from, to } => match &snapshot.last_error {
                Some(err) if !to.is_connected() => {
                    tracing::warn!(from = %from, to = %to, error = %err, "Status changed");
                }
                _ => tracing::info!(from = %from, to = %to, "Status changed"),
            },
            StateChange::Scan => {
                if let Some(scan) = &snapshot.latest_scan {
                    tracing::info!(seq = scan.sequence(), text = %scan.text(), "Scan received");
                }
            }
            StateChange::Error => {
                if let Some(err) = &snapshot.last_error {
                    tracing::error!("Error: {}", err);
                }
            }
        }
    }
}

/// Run `observer` on its own thread, fed by `subscription`.
///
/// The thread ends when the store behind the subscription is dropped. A slow
/// observer only delays itself.
pub fn spawn_observer<O>(subscription: Subscription, observer: Arc<O>) -> io::Result<JoinHandle<()>>
where
    O: ScannerObserver + ?Sized + 'static,
{
    thread::Builder::new()
        .name("nlscan-observer".into())
        .spawn(move || {
            for snapshot in subscription {
                observer.on_update(&snapshot);
            }
        })
}
