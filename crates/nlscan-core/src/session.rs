//! Scanner session manager - owns the connection lifecycle.
//!
//! `connect`, `disconnect` and `trigger_scan` may be called from any thread
//! while the transport delivers plug and data events on its own thread.
//! Session state lives behind one lock; transport calls are serialized by a
//! second lock that transport callbacks never take, so closing a link can
//! wait for its delivery thread without deadlocking.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, instrument, trace, warn};

use crate::decode::{DecodeConfig, ScanResult, decode_payload};
use crate::events::SessionError;
use crate::state::machine::{ConnectionStatus, SessionInfo, SessionState, Unplug};
use crate::state::store::{StateSnapshot, StateStore, Subscription};
use crate::transport::{ScannerTransport, TransportError, TransportListener};

/// Result of a software trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Command handed to the device. A scan may or may not follow.
    Sent,
    /// No live session; nothing was sent.
    NotConnected,
    /// The transport has no software trigger; nothing was sent.
    Unsupported,
    /// The transport reported an error while sending.
    Failed,
}

/// State shared with the listeners handed to the transport.
struct Shared {
    state: Mutex<SessionState>,
    store: StateStore,
    decode: DecodeConfig,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_plug(&self, generation: u64, plugged: bool) {
        if plugged {
            info!(generation, "Scanner plugged in");
            return;
        }

        let mut state = self.lock_state();
        match state.unplug(generation) {
            Unplug::Ended(session) => {
                warn!(
                    session = session.id,
                    scans = session.scans_received,
                    "Scanner unplugged"
                );
                self.store.publish_status(
                    ConnectionStatus::Disconnected,
                    Some(SessionError::UnexpectedDisconnect),
                );
            }
            Unplug::CancelledAttempt => {
                info!(generation, "Scanner unplugged while opening");
            }
            Unplug::Stale => {
                trace!(generation, "Ignoring unplug from retired session");
            }
        }
    }

    fn handle_data(&self, generation: u64, data: &[u8], length: usize) {
        // Decoding happens outside the lock.
        let decoded = decode_payload(data, length, &self.decode);

        let mut state = self.lock_state();
        match decoded {
            Ok(text) => {
                let Some((session_id, sequence)) = state.accept_frame(generation) else {
                    trace!(generation, "Discarding frame from retired session");
                    return;
                };
                debug!(seq = sequence, len = length, "Scan decoded");
                let scan = ScanResult::new(sequence, session_id, text, data[..length].to_vec());
                self.store.publish_scan(Arc::new(scan));
            }
            Err(e) => {
                if state.record_decode_failure(generation) {
                    let err = SessionError::from(e);
                    warn!(error = %err, len = length, "Dropping frame");
                }
            }
        }
    }
}

/// Listener registered with the transport for one connect attempt.
///
/// Holds only a weak reference, so a transport that outlives its manager
/// delivers into nothing.
struct SessionListener {
    generation: u64,
    shared: Weak<Shared>,
}

impl TransportListener for SessionListener {
    fn on_plug_changed(&self, plugged: bool) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_plug(self.generation, plugged);
        }
    }

    fn on_data_received(&self, data: &[u8], length: usize) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_data(self.generation, data, length);
        }
    }
}

/// Session manager - the single owner of a scanner transport.
pub struct SessionManager<T: ScannerTransport> {
    shared: Arc<Shared>,
    transport: Mutex<T>,
}

impl<T: ScannerTransport> SessionManager<T> {
    pub fn new(transport: T, decode: DecodeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::new()),
                store: StateStore::new(),
                decode,
            }),
            transport: Mutex::new(transport),
        }
    }

    fn lock_transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session.
    ///
    /// Returns true when a session is live afterwards. Already connected is
    /// a no-op that returns true. Failures are recorded as the snapshot's
    /// `last_error`; an attempt cancelled by `disconnect` (or superseded by
    /// a newer `connect`) closes whatever it opened and returns false.
    #[instrument(skip(self))]
    pub fn connect(&self) -> bool {
        let generation = match self.shared.lock_state().begin_attempt() {
            Some(generation) => generation,
            None => {
                debug!("Already connected");
                return true;
            }
        };

        let mut transport = self.lock_transport();
        if !self.shared.lock_state().is_pending(generation) {
            debug!(generation, "Connect attempt superseded before open");
            return false;
        }

        // Reap a link left behind by an unplug.
        transport.close();

        let listener = Arc::new(SessionListener {
            generation,
            shared: Arc::downgrade(&self.shared),
        });
        let result = transport.open(listener);
        let device_ids = transport.device_ids();

        let mut state = self.shared.lock_state();
        // Settle the attempt first; only a still-pending attempt may publish.
        let still_pending = match &result {
            Ok(()) => state.complete_attempt(generation, device_ids),
            Err(_) => state.abandon_attempt(generation),
        };

        match (result, still_pending) {
            (Ok(()), true) => {
                match device_ids {
                    Some((vid, pid)) => info!(
                        session = generation,
                        vid = %format!("{:04X}", vid),
                        pid = %format!("{:04X}", pid),
                        "Scanner connected"
                    ),
                    None => info!(session = generation, "Scanner connected"),
                }
                self.shared
                    .store
                    .publish_status(ConnectionStatus::Connected, None);
                true
            }
            (Ok(()), false) => {
                drop(state);
                info!(generation, "Connect attempt cancelled, closing link");
                transport.close();
                false
            }
            (Err(e), true) => {
                warn!(error = %e, "Failed to open scanner");
                self.shared
                    .store
                    .publish_error(SessionError::OpenFailure(e.to_string()));
                false
            }
            (Err(e), false) => {
                debug!(error = %e, "Cancelled connect attempt failed to open");
                false
            }
        }
    }

    /// End the session, if any, and drop every event still in flight for it.
    ///
    /// Idempotent. A `connect` still opening when this is called returns
    /// false and leaves the manager disconnected.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        let generation = {
            let mut state = self.shared.lock_state();
            let (generation, ended) = state.retire();
            if let Some(session) = ended {
                info!(
                    session = session.id,
                    scans = session.scans_received,
                    decode_failures = session.decode_failures,
                    "Scanner disconnected"
                );
                self.shared
                    .store
                    .publish_status(ConnectionStatus::Disconnected, None);
            }
            generation
        };

        let mut transport = self.lock_transport();
        // A connect that started after us owns the link now.
        if self.shared.lock_state().generation() == generation {
            transport.close();
        } else {
            debug!("Newer connect attempt pending, leaving link to it");
        }
    }

    /// Ask the device for a software-triggered read.
    ///
    /// Best effort: `Sent` only means the command went out. Nothing is sent
    /// while disconnected.
    pub fn trigger_scan(&self) -> TriggerOutcome {
        if !self.is_connected() {
            debug!("Trigger ignored, not connected");
            return TriggerOutcome::NotConnected;
        }

        let mut transport = self.lock_transport();
        if !self.is_connected() {
            debug!("Trigger ignored, disconnected meanwhile");
            return TriggerOutcome::NotConnected;
        }

        match transport.trigger() {
            Ok(()) => {
                debug!("Trigger sent");
                TriggerOutcome::Sent
            }
            Err(TransportError::Unsupported) => {
                debug!("Transport has no software trigger");
                TriggerOutcome::Unsupported
            }
            Err(e) => {
                warn!(error = %e, "Trigger failed");
                TriggerOutcome::Failed
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock_state().status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.shared.store.snapshot()
    }

    pub fn latest_scan(&self) -> Option<Arc<ScanResult>> {
        self.snapshot().latest_scan.clone()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.snapshot().last_error.clone()
    }

    /// Details of the live session, if any.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.lock_state().session().cloned()
    }

    /// Follow every state change from now on.
    pub fn subscribe(&self) -> Subscription {
        self.shared.store.subscribe()
    }

}

impl<T: ScannerTransport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::StateChange;
    use crate::transport::{MockDevice, MockTransport};
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager() -> (SessionManager<MockTransport>, MockDevice) {
        let mock = MockTransport::new();
        let device = mock.device();
        (SessionManager::new(mock, DecodeConfig::default()), device)
    }

    fn scans(sub: &Subscription) -> Vec<String> {
        sub.drain()
            .iter()
            .filter_map(|s| s.new_scan().map(|scan| scan.text().to_string()))
            .collect()
    }

    #[test]
    fn test_starts_disconnected() {
        let (manager, device) = manager();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.latest_scan().is_none());
        assert!(manager.session_info().is_none());
        assert_eq!(device.open_count(), 0);
    }

    #[test]
    fn test_connect_and_receive_scan() {
        let (manager, device) = manager();
        let sub = manager.subscribe();

        assert!(manager.connect());
        assert!(device.send(b"123456"));

        assert_eq!(manager.status(), ConnectionStatus::Connected);
        let latest = manager.latest_scan().unwrap();
        assert_eq!(latest.text(), "123456");
        assert_eq!(latest.sequence(), 1);
        assert_eq!(scans(&sub), vec!["123456"]);
        assert_eq!(manager.session_info().unwrap().scans_received, 1);
        assert_eq!(manager.session_info().unwrap().device_ids, Some((0x1EAB, 0x1A06)));
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let mock = MockTransport::new();
        let device = mock.device();
        mock.queue_open_error(TransportError::DeviceNotFound {
            vid: 0x1EAB,
            pid: None,
        });
        let manager = SessionManager::new(mock, DecodeConfig::default());
        let sub = manager.subscribe();

        assert!(!manager.connect());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            manager.last_error(),
            Some(SessionError::OpenFailure(_))
        ));

        // The failed attempt's listener must not produce results.
        let stale = device.listener(0).unwrap();
        stale.on_data_received(b"999", 3);
        assert!(manager.latest_scan().is_none());
        assert!(scans(&sub).is_empty());

        // Recoverable by a later connect, which clears the error.
        assert!(manager.connect());
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_connect_when_connected_is_noop() {
        let (manager, device) = manager();
        assert!(manager.connect());
        assert!(manager.connect());
        assert_eq!(device.open_count(), 1);
        assert!(device.is_open());
    }

    #[test]
    fn test_disconnect_idempotent() {
        let (manager, device) = manager();
        manager.connect();
        let sub = manager.subscribe();
        sub.drain();

        manager.disconnect();
        let after_one = manager.snapshot();
        manager.disconnect();
        let after_two = manager.snapshot();

        assert_eq!(after_one, after_two);
        assert!(!device.is_open());
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn test_disconnect_when_never_connected() {
        let (manager, _device) = manager();
        manager.disconnect();
        assert_eq!(manager.snapshot().revision, 0);
    }

    #[test]
    fn test_events_after_disconnect_discarded() {
        let (manager, device) = manager();
        manager.connect();
        let listener = device.listener(0).unwrap();
        manager.disconnect();

        listener.on_data_received(b"LATE", 4);
        listener.on_plug_changed(false);

        assert!(manager.latest_scan().is_none());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_unplug_disconnects() {
        let (manager, device) = manager();
        let sub = manager.subscribe();
        manager.connect();
        let listener = device.listener(0).unwrap();

        assert!(device.plug(false));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.last_error(), Some(SessionError::UnexpectedDisconnect));

        listener.on_data_received(b"123", 3);
        assert!(manager.latest_scan().is_none());

        let changes: Vec<_> = sub.drain().iter().map(|s| s.change).collect();
        assert_eq!(
            changes.last(),
            Some(&StateChange::Status {
                from: ConnectionStatus::Connected,
                to: ConnectionStatus::Disconnected
            })
        );
    }

    #[test]
    fn test_reconnect_after_unplug() {
        let (manager, device) = manager();
        manager.connect();
        device.plug(false);

        assert!(manager.connect());
        assert!(device.send(b"AFTER"));
        assert_eq!(manager.latest_scan().unwrap().text(), "AFTER");
        assert_eq!(device.open_count(), 2);

        // The first session's listener stays retired.
        device.listener(0).unwrap().on_data_received(b"OLD", 3);
        assert_eq!(manager.latest_scan().unwrap().text(), "AFTER");
    }

    #[test]
    fn test_plug_in_is_informational() {
        let (manager, device) = manager();
        manager.connect();
        let revision = manager.snapshot().revision;
        device.plug(true);
        assert_eq!(manager.snapshot().revision, revision);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_decode_failure_keeps_session() {
        let (manager, device) = manager();
        manager.connect();
        let revision = manager.snapshot().revision;

        assert!(device.send(&[0xC3, 0x28]));
        assert!(device.send(b"\r\n"));
        assert!(device.send_with_len(b"12", 8));

        assert!(manager.is_connected());
        assert!(manager.latest_scan().is_none());
        assert!(manager.last_error().is_none());
        assert_eq!(manager.snapshot().revision, revision);
        assert_eq!(manager.session_info().unwrap().decode_failures, 3);

        device.send(b"OK\r\n");
        assert_eq!(manager.latest_scan().unwrap().text(), "OK");
    }

    #[test]
    fn test_latest_scan_supersedes_history() {
        let (manager, device) = manager();
        let sub = manager.subscribe();
        manager.connect();

        for code in ["A1", "B2", "C3"] {
            device.send(code.as_bytes());
        }

        assert_eq!(manager.latest_scan().unwrap().text(), "C3");
        assert_eq!(scans(&sub), vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn test_trigger_requires_connection() {
        let (manager, device) = manager();
        assert_eq!(manager.trigger_scan(), TriggerOutcome::NotConnected);
        assert_eq!(device.trigger_count(), 0);

        manager.connect();
        assert_eq!(manager.trigger_scan(), TriggerOutcome::Sent);
        assert_eq!(device.trigger_count(), 1);

        manager.disconnect();
        assert_eq!(manager.trigger_scan(), TriggerOutcome::NotConnected);
        assert_eq!(device.trigger_count(), 1);
    }

    #[test]
    fn test_trigger_unsupported_is_noop() {
        let mock = MockTransport::new();
        mock.set_trigger_supported(false);
        let manager = SessionManager::new(mock, DecodeConfig::default());
        manager.connect();

        assert_eq!(manager.trigger_scan(), TriggerOutcome::Unsupported);
        assert!(manager.is_connected());
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_disconnect_during_open() {
        let mock = MockTransport::new();
        let device = mock.device();
        let gate = mock.gate_next_open();
        let manager = Arc::new(SessionManager::new(mock, DecodeConfig::default()));

        let connecting = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.connect())
        };
        assert!(gate.wait_started(WAIT));

        let disconnecting = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.disconnect())
        };
        // disconnect retires the attempt before it waits on the transport
        thread::sleep(Duration::from_millis(50));
        gate.release();

        assert!(!connecting.join().unwrap());
        disconnecting.join().unwrap();

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!device.is_open());

        device.listener(0).unwrap().on_data_received(b"RACE", 4);
        assert!(manager.latest_scan().is_none());
    }

    #[test]
    fn test_session_reports_device_ids() {
        let mut mock = MockTransport::new();
        mock.set_ids(0x1EAB, 0x0C12);
        let manager = SessionManager::new(mock, DecodeConfig::default());

        assert!(manager.connect());
        assert_eq!(manager.session_info().unwrap().device_ids, Some((0x1EAB, 0x0C12)));
    }

    #[test]
    fn test_cancelled_open_failure_not_published() {
        let mock = MockTransport::new();
        let device = mock.device();
        let gate = mock.gate_next_open();
        mock.queue_open_error(TransportError::OpenFailed("busy".into()));
        let manager = Arc::new(SessionManager::new(mock, DecodeConfig::default()));
        let sub = manager.subscribe();
        sub.drain();

        let connecting = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.connect())
        };
        assert!(gate.wait_started(WAIT));

        let disconnecting = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.disconnect())
        };
        thread::sleep(Duration::from_millis(50));
        gate.release();

        assert!(!connecting.join().unwrap());
        disconnecting.join().unwrap();

        assert!(manager.last_error().is_none());
        assert!(sub.drain().is_empty());
        assert!(!device.is_open());

        // The next attempt starts clean.
        assert!(manager.connect());
    }

    #[test]
    fn test_unplug_during_open() {
        let mock = MockTransport::new();
        let device = mock.device();
        let gate = mock.gate_next_open();
        let manager = Arc::new(SessionManager::new(mock, DecodeConfig::default()));

        let connecting = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.connect())
        };
        assert!(gate.wait_started(WAIT));
        device.listener(0).unwrap().on_plug_changed(false);
        gate.release();

        assert!(!connecting.join().unwrap());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!device.is_open());
    }

    #[test]
    fn test_events_from_transport_thread() {
        let (manager, device) = manager();
        let manager = Arc::new(manager);
        let sub = manager.subscribe();
        manager.connect();

        let feeder = thread::spawn(move || {
            for i in 0..100 {
                device.send(format!("CODE{:03}", i).as_bytes());
            }
        });
        feeder.join().unwrap();

        let texts = scans(&sub);
        assert_eq!(texts.len(), 100);
        assert_eq!(texts[0], "CODE000");
        assert_eq!(texts[99], "CODE099");
        assert_eq!(manager.latest_scan().unwrap().sequence(), 100);
    }

    #[test]
    fn test_slow_subscriber_does_not_block() {
        let (manager, device) = manager();
        let _never_read = manager.subscribe();
        manager.connect();

        for _ in 0..1000 {
            device.send(b"FLOOD");
        }
        assert_eq!(manager.session_info().unwrap().scans_received, 1000);
    }

    #[test]
    fn test_drop_closes_link() {
        let (manager, device) = manager();
        manager.connect();
        drop(manager);
        assert!(!device.is_open());
    }
}
