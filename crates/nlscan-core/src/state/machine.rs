//! Connection state machine.
//!
//! Pure bookkeeping for the session manager's critical section: which
//! connect attempt is current, whether a session is live, and which
//! transport callbacks still belong to it.

use std::fmt;
use std::time::SystemTime;

/// Whether a scanner session is live.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// Read-only view of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Generation of the connect attempt that opened the session.
    pub id: u64,
    pub opened_at: SystemTime,
    /// VID/PID reported by the transport.
    pub device_ids: Option<(u16, u16)>,
    pub scans_received: u64,
    pub decode_failures: u64,
}

/// Outcome of an unplug report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unplug {
    /// Live session ended.
    Ended(SessionInfo),
    /// In-flight connect attempt invalidated.
    CancelledAttempt,
    /// Report from a retired generation; nothing changed.
    Stale,
}

/// State guarded by the session manager's lock.
///
/// Every connect attempt takes a fresh generation. Transport callbacks carry
/// the generation they were registered under and only apply while it is
/// current.
#[derive(Debug, Default)]
pub struct SessionState {
    generation: u64,
    pending: Option<u64>,
    session: Option<SessionInfo>,
    next_sequence: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.session.is_some() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Start a connect attempt. `None` when a session is already live.
    ///
    /// A newer attempt supersedes any attempt still pending.
    pub fn begin_attempt(&mut self) -> Option<u64> {
        if self.session.is_some() {
            return None;
        }
        self.generation += 1;
        self.pending = Some(self.generation);
        Some(self.generation)
    }

    /// Whether `generation` is still the pending attempt.
    pub fn is_pending(&self, generation: u64) -> bool {
        self.pending == Some(generation)
    }

    /// Turn a successful open into a live session. False if the attempt was
    /// cancelled or superseded while the transport was opening.
    pub fn complete_attempt(&mut self, generation: u64, device_ids: Option<(u16, u16)>) -> bool {
        if !self.is_pending(generation) {
            return false;
        }
        self.pending = None;
        self.session = Some(SessionInfo {
            id: generation,
            opened_at: SystemTime::now(),
            device_ids,
            scans_received: 0,
            decode_failures: 0,
        });
        tracing::info!(session = generation, "State transition: Disconnected -> Connected");
        true
    }

    /// Forget a failed attempt. False if it was already cancelled.
    pub fn abandon_attempt(&mut self, generation: u64) -> bool {
        if !self.is_pending(generation) {
            return false;
        }
        self.pending = None;
        true
    }

    /// Retire the current generation, cancelling any pending attempt and
    /// ending the live session. Returns the new generation and the ended
    /// session, if there was one.
    pub fn retire(&mut self) -> (u64, Option<SessionInfo>) {
        self.generation += 1;
        self.pending = None;
        let ended = self.session.take();
        if let Some(session) = &ended {
            tracing::info!(session = session.id, "State transition: Connected -> Disconnected");
        }
        (self.generation, ended)
    }

    /// Apply an unplug reported under `generation`.
    pub fn unplug(&mut self, generation: u64) -> Unplug {
        if generation != self.generation {
            return Unplug::Stale;
        }
        let was_pending = self.is_pending(generation);
        match self.retire() {
            (_, Some(session)) => Unplug::Ended(session),
            (_, None) if was_pending => Unplug::CancelledAttempt,
            _ => Unplug::Stale,
        }
    }

    /// Admit a decoded frame from `generation`. Returns the session id and
    /// the sequence number for the new scan, or `None` when the frame
    /// belongs to a retired session.
    pub fn accept_frame(&mut self, generation: u64) -> Option<(u64, u64)> {
        if generation != self.generation {
            return None;
        }
        let session = self.session.as_mut().filter(|s| s.id == generation)?;
        session.scans_received += 1;
        self.next_sequence += 1;
        Some((session.id, self.next_sequence))
    }

    /// Count an undecodable frame. False when the frame is stale.
    pub fn record_decode_failure(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.session.as_mut().filter(|s| s.id == generation) {
            Some(session) => {
                session.decode_failures += 1;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> (SessionState, u64) {
        let mut state = SessionState::new();
        let generation = state.begin_attempt().unwrap();
        assert!(state.complete_attempt(generation, Some((0x1EAB, 0x1A06))));
        (state, generation)
    }

    #[test]
    fn test_initial_state() {
        let state = SessionState::new();
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert!(state.session().is_none());
    }

    #[test]
    fn test_connect_cycle() {
        let (mut state, generation) = connected();
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.session().unwrap().id, generation);
        assert_eq!(state.begin_attempt(), None);

        let (_, ended) = state.retire();
        assert_eq!(ended.unwrap().id, generation);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);

        let (_, again) = state.retire();
        assert!(again.is_none());
    }

    #[test]
    fn test_retire_cancels_pending() {
        let mut state = SessionState::new();
        let generation = state.begin_attempt().unwrap();
        state.retire();
        assert!(!state.complete_attempt(generation, None));
        assert!(!state.abandon_attempt(generation));
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_abandon_failed_attempt() {
        let mut state = SessionState::new();
        let generation = state.begin_attempt().unwrap();
        assert!(state.abandon_attempt(generation));
        assert!(!state.is_pending(generation));
        assert!(state.begin_attempt().is_some());
    }

    #[test]
    fn test_newer_attempt_supersedes() {
        let mut state = SessionState::new();
        let first = state.begin_attempt().unwrap();
        let second = state.begin_attempt().unwrap();
        assert!(!state.is_pending(first));
        assert!(!state.complete_attempt(first, None));
        assert!(state.complete_attempt(second, None));
    }

    #[test]
    fn test_frames_follow_generation() {
        let (mut state, generation) = connected();
        assert_eq!(state.accept_frame(generation), Some((generation, 1)));
        assert_eq!(state.accept_frame(generation), Some((generation, 2)));
        assert_eq!(state.accept_frame(generation - 1), None);

        state.retire();
        assert_eq!(state.accept_frame(generation), None);
        assert!(!state.record_decode_failure(generation));
    }

    #[test]
    fn test_sequence_spans_sessions() {
        let (mut state, first) = connected();
        state.accept_frame(first);
        state.retire();

        let second = state.begin_attempt().unwrap();
        state.complete_attempt(second, None);
        assert_eq!(state.accept_frame(second), Some((second, 2)));
        assert_eq!(state.session().unwrap().scans_received, 1);
    }

    #[test]
    fn test_unplug() {
        let (mut state, generation) = connected();
        assert_eq!(state.unplug(generation - 1), Unplug::Stale);
        assert!(matches!(state.unplug(generation), Unplug::Ended(_)));
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.unplug(generation), Unplug::Stale);
        assert_eq!(state.accept_frame(generation), None);
    }

    #[test]
    fn test_unplug_during_attempt() {
        let mut state = SessionState::new();
        let generation = state.begin_attempt().unwrap();
        assert_eq!(state.unplug(generation), Unplug::CancelledAttempt);
        assert!(!state.complete_attempt(generation, None));
    }

    #[test]
    fn test_decode_failures_counted() {
        let (mut state, generation) = connected();
        assert!(state.record_decode_failure(generation));
        assert_eq!(state.session().unwrap().decode_failures, 1);
        assert_eq!(state.session().unwrap().scans_received, 0);
    }
}
