//! Observable connection state.
//!
//! The store keeps the latest [`StateSnapshot`] and fans every new snapshot
//! out to subscribers over unbounded channels. Publishing never waits on a
//! subscriber.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use super::machine::ConnectionStatus;
use crate::decode::ScanResult;
use crate::events::SessionError;

/// What caused a snapshot to be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Current state handed to a new subscriber, or the store's initial value.
    Initial,
    Status {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    Scan,
    Error,
}

/// Immutable view of the connection state at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Bumped on every publication.
    pub revision: u64,
    pub status: ConnectionStatus,
    pub latest_scan: Option<Arc<ScanResult>>,
    pub last_error: Option<SessionError>,
    pub change: StateChange,
}

impl StateSnapshot {
    fn initial() -> Self {
        Self {
            revision: 0,
            status: ConnectionStatus::Disconnected,
            latest_scan: None,
            last_error: None,
            change: StateChange::Initial,
        }
    }

    /// The scan this snapshot announces, if it was published for one.
    pub fn new_scan(&self) -> Option<&Arc<ScanResult>> {
        match self.change {
            StateChange::Scan => self.latest_scan.as_ref(),
            _ => None,
        }
    }
}

/// Latest state plus the subscriber fan-out.
pub struct StateStore {
    current: RwLock<Arc<StateSnapshot>>,
    subscribers: Mutex<Vec<Sender<Arc<StateSnapshot>>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(StateSnapshot::initial())),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Sender<Arc<StateSnapshot>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot().status
    }

    /// Subscribe to every future snapshot. The current state is delivered
    /// first, tagged [`StateChange::Initial`].
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let mut subscribers = self.lock_subscribers();

        let mut first = StateSnapshot::clone(&self.snapshot());
        first.change = StateChange::Initial;
        // Receiver is still in scope, so this cannot fail.
        let _ = tx.send(Arc::new(first));

        subscribers.push(tx);
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn publish(&self, change: StateChange, update: impl FnOnce(&mut StateSnapshot)) {
        let mut subscribers = self.lock_subscribers();

        let snapshot = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = StateSnapshot::clone(&current);
            update(&mut next);
            next.revision += 1;
            next.change = change;
            let next = Arc::new(next);
            *current = Arc::clone(&next);
            next
        };

        subscribers.retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }

    /// Publish a status transition. Entering `Connected` clears the last
    /// error; `error` replaces it. Returns false, publishing nothing, when
    /// the status is unchanged.
    pub(crate) fn publish_status(&self, to: ConnectionStatus, error: Option<SessionError>) -> bool {
        let from = self.status();
        if from == to {
            return false;
        }
        self.publish(StateChange::Status { from, to }, |s| {
            s.status = to;
            if to.is_connected() {
                s.last_error = None;
            }
            if error.is_some() {
                s.last_error = error;
            }
        });
        true
    }

    pub(crate) fn publish_scan(&self, scan: Arc<ScanResult>) {
        self.publish(StateChange::Scan, |s| s.latest_scan = Some(scan));
    }

    pub(crate) fn publish_error(&self, error: SessionError) {
        self.publish(StateChange::Error, |s| s.last_error = Some(error));
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a store subscription.
///
/// Yields snapshots in publication order. Ends once the store is dropped.
pub struct Subscription {
    rx: Receiver<Arc<StateSnapshot>>,
}

impl Subscription {
    /// Block for the next snapshot. `None` once the store is gone.
    pub fn recv(&self) -> Option<Arc<StateSnapshot>> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<StateSnapshot>> {
        match self.rx.recv_timeout(timeout) {
            Ok(s) => Some(s),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Arc<StateSnapshot>> {
        match self.rx.try_recv() {
            Ok(s) => Some(s),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<Arc<StateSnapshot>> {
        self.rx.try_iter().collect()
    }
}

impl Iterator for Subscription {
    type Item = Arc<StateSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
