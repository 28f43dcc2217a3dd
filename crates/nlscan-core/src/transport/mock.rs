//! Mock scanner transport for testing.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::traits::{ScannerTransport, TransportError, TransportListener};

/// Upper bound on how long a gated open waits to be released.
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

struct MockState {
    /// Errors returned by upcoming opens, in order.
    open_errors: VecDeque<TransportError>,
    /// Listener of the current link.
    listener: Option<Arc<dyn TransportListener>>,
    /// Every listener ever handed to `open`, including failed attempts.
    history: Vec<Arc<dyn TransportListener>>,
    /// Link held (between a successful open and close).
    open: bool,
    /// Device still attached to the held link.
    attached: bool,
    trigger_supported: bool,
    opens: usize,
    closes: usize,
    triggers: usize,
    /// Hand-off for holding the next open in flight.
    gate: Option<(Sender<()>, Receiver<()>)>,
    vid: u16,
    pid: u16,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport for unit testing session logic.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open_errors: VecDeque::new(),
                listener: None,
                history: Vec::new(),
                open: false,
                attached: false,
                trigger_supported: true,
                opens: 0,
                closes: 0,
                triggers: 0,
                gate: None,
                vid: 0x1EAB,
                pid: 0x1A06,
            })),
        }
    }

    /// Handle that plays the device side of the link.
    pub fn device(&self) -> MockDevice {
        MockDevice {
            state: Arc::clone(&self.state),
        }
    }

    /// Make the next `open` fail with `err`.
    pub fn queue_open_error(&self, err: TransportError) {
        lock(&self.state).open_errors.push_back(err);
    }

    /// Hold the next `open` until the returned gate is released.
    pub fn gate_next_open(&self) -> OpenGate {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        lock(&self.state).gate = Some((started_tx, release_rx));
        OpenGate {
            started: started_rx,
            release: release_tx,
        }
    }

    pub fn set_trigger_supported(&self, supported: bool) {
        lock(&self.state).trigger_supported = supported;
    }

    /// Set VID/PID reported for the open device.
    pub fn set_ids(&mut self, vid: u16, pid: u16) {
        let mut state = lock(&self.state);
        state.vid = vid;
        state.pid = pid;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerTransport for MockTransport {
    fn open(&mut self, listener: Arc<dyn TransportListener>) -> Result<(), TransportError> {
        let gate = {
            let mut state = lock(&self.state);
            if state.open {
                return Err(TransportError::AlreadyOpen);
            }
            state.opens += 1;
            state.history.push(Arc::clone(&listener));
            state.gate.take()
        };

        if let Some((started, release)) = gate {
            let _ = started.send(());
            match release.recv_timeout(GATE_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::Timeout {
                        timeout_ms: GATE_TIMEOUT.as_millis() as u64,
                    });
                }
            }
        }

        let mut state = lock(&self.state);
        if let Some(err) = state.open_errors.pop_front() {
            return Err(err);
        }
        state.open = true;
        state.attached = true;
        state.listener = Some(listener);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.open = false;
        state.attached = false;
        state.listener = None;
    }

    fn trigger(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if !state.trigger_supported {
            return Err(TransportError::Unsupported);
        }
        if !state.attached {
            return Err(TransportError::Disconnected);
        }
        state.triggers += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn device_ids(&self) -> Option<(u16, u16)> {
        let state = lock(&self.state);
        state.open.then_some((state.vid, state.pid))
    }
}

/// Device side of a [`MockTransport`].
///
/// Deliveries run under the mock's lock, so once `close` has returned no
/// callback is in flight, as with a real transport.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Report a plug change on the current link. Returns whether it was delivered.
    pub fn plug(&self, plugged: bool) -> bool {
        let mut state = lock(&self.state);
        if !state.open {
            return false;
        }
        state.attached = plugged;
        if let Some(listener) = state.listener.clone() {
            listener.on_plug_changed(plugged);
        }
        true
    }

    /// Deliver a frame on the current link. Returns whether it was delivered.
    pub fn send(&self, data: &[u8]) -> bool {
        self.send_with_len(data, data.len())
    }

    /// Deliver a frame with an explicit length argument.
    pub fn send_with_len(&self, data: &[u8], length: usize) -> bool {
        let state = lock(&self.state);
        if !state.open || !state.attached {
            return false;
        }
        match &state.listener {
            Some(listener) => {
                listener.on_data_received(data, length);
                true
            }
            None => false,
        }
    }

    /// Make the next `open` fail with `err`, after the transport was handed off.
    pub fn queue_open_error(&self, err: TransportError) {
        lock(&self.state).open_errors.push_back(err);
    }

    /// Listener handed to the `n`th open attempt, for replaying late events.
    pub fn listener(&self, n: usize) -> Option<Arc<dyn TransportListener>> {
        lock(&self.state).history.get(n).cloned()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Opens that reached the device, failed ones included. `AlreadyOpen` rejections are not counted.
    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn trigger_count(&self) -> usize {
        lock(&self.state).triggers
    }
}

/// Holds a gated `open` in flight.
pub struct OpenGate {
    started: Receiver<()>,
    release: Sender<()>,
}

impl OpenGate {
    /// Block until the gated open has started. Returns false on timeout.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        self.started.recv_timeout(timeout).is_ok()
    }

    /// Let the gated open finish.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        frames: StdMutex<Vec<Vec<u8>>>,
        plugs: StdMutex<Vec<bool>>,
    }

    impl TransportListener for Recorder {
        fn on_plug_changed(&self, plugged: bool) {
            self.plugs.lock().unwrap().push(plugged);
        }

        fn on_data_received(&self, data: &[u8], length: usize) {
            self.frames.lock().unwrap().push(data[..length].to_vec());
        }
    }

    #[test]
    fn test_mock_delivery() {
        let mut mock = MockTransport::new();
        let device = mock.device();
        let recorder = Arc::new(Recorder::default());

        assert!(!device.send(b"early"));
        mock.open(recorder.clone()).unwrap();
        assert!(device.send(b"Hello"));
        assert!(device.send(b"World"));

        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![b"Hello".to_vec(), b"World".to_vec()]);
        assert_eq!(mock.device_ids(), Some((0x1EAB, 0x1A06)));
    }

    #[test]
    fn test_mock_close_stops_delivery() {
        let mut mock = MockTransport::new();
        let device = mock.device();
        let recorder = Arc::new(Recorder::default());

        mock.open(recorder.clone()).unwrap();
        mock.close();
        mock.close();

        assert!(!device.send(b"late"));
        assert!(!device.plug(false));
        assert!(recorder.frames.lock().unwrap().is_empty());
        assert_eq!(device.close_count(), 2);
        assert_eq!(mock.device_ids(), None);
    }

    #[test]
    fn test_mock_unplug() {
        let mut mock = MockTransport::new();
        let device = mock.device();
        let recorder = Arc::new(Recorder::default());

        mock.open(recorder.clone()).unwrap();
        assert!(device.plug(false));
        assert!(!device.send(b"after unplug"));
        assert_eq!(*recorder.plugs.lock().unwrap(), vec![false]);
        assert!(matches!(mock.trigger(), Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_mock_scripted_open_error() {
        let mut mock = MockTransport::new();
        mock.queue_open_error(TransportError::DeviceNotFound {
            vid: 0x1EAB,
            pid: None,
        });

        assert!(mock.open(Arc::new(Recorder::default())).is_err());
        assert!(!mock.is_open());
        assert!(mock.open(Arc::new(Recorder::default())).is_ok());
        assert!(matches!(
            mock.open(Arc::new(Recorder::default())),
            Err(TransportError::AlreadyOpen)
        ));
        // The rejected third open never reached the device.
        assert_eq!(mock.device().open_count(), 2);
    }

    #[test]
    fn test_mock_trigger() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.trigger(), Err(TransportError::NotOpen)));

        mock.open(Arc::new(Recorder::default())).unwrap();
        mock.trigger().unwrap();
        mock.set_trigger_supported(false);
        assert!(matches!(mock.trigger(), Err(TransportError::Unsupported)));
        assert_eq!(mock.device().trigger_count(), 1);
    }

    #[test]
    fn test_mock_gated_open() {
        let mut mock = MockTransport::new();
        let device = mock.device();
        let gate = mock.gate_next_open();

        let handle = std::thread::spawn(move || {
            let result = mock.open(Arc::new(Recorder::default()));
            (mock, result)
        });

        assert!(gate.wait_started(Duration::from_secs(5)));
        assert!(!device.is_open());
        gate.release();

        let (_mock, result) = handle.join().unwrap();
        assert!(result.is_ok());
        assert!(device.is_open());
    }
}
