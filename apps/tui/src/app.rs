//! Application state and logic.
//!
//! Contains the app state (Model), input handling (Controller).

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use nlscan_core::{
    ConnectionStatus, ScanResult, ScannerTransport, SessionError, SessionManager, StateChange,
    StateSnapshot, TriggerOutcome,
};

/// Maximum log entries to keep.
const MAX_LOG_ENTRIES: usize = 1000;

/// Maximum scans kept in the history pane.
const MAX_HISTORY: usize = 200;

/// Tab/view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Main,
    Logs,
    Help,
}

/// Log level for the log pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

/// A scan as shown in the history pane.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub scan: Arc<ScanResult>,
    pub timestamp: String,
}

/// Application state.
pub struct App<T: ScannerTransport + 'static> {
    /// Whether to quit the application.
    pub should_quit: bool,
    /// Current view/tab.
    pub current_tab: Tab,
    /// Connection status as last published.
    pub status: ConnectionStatus,
    /// Most recent scan.
    pub latest_scan: Option<Arc<ScanResult>>,
    /// Last connection-level error.
    pub last_error: Option<SessionError>,
    /// Scans received while the app ran, newest last.
    pub history: VecDeque<ScanEntry>,
    /// Log entries.
    pub logs: VecDeque<LogEntry>,
    /// Log scroll position.
    pub log_scroll: usize,
    /// VID:PID of the open device.
    pub device_ids: Option<(u16, u16)>,
    manager: Arc<SessionManager<T>>,
    /// Background connect attempt.
    connect_thread: Option<JoinHandle<bool>>,
}

impl<T: ScannerTransport + 'static> App<T> {
    pub fn new(manager: Arc<SessionManager<T>>) -> Self {
        Self {
            should_quit: false,
            current_tab: Tab::Main,
            status: ConnectionStatus::Disconnected,
            latest_scan: None,
            last_error: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            log_scroll: 0,
            device_ids: None,
            manager,
            connect_thread: None,
        }
    }

    /// Whether a connect attempt is running in the background.
    pub fn is_connecting(&self) -> bool {
        self.connect_thread.is_some()
    }

    /// Handle keyboard input. Returns true if app should quit.
    pub fn on_key(&mut self, key: KeyEvent) -> bool {
        // Global shortcuts
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('c')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                self.should_quit = true;
                return true;
            }
            KeyCode::Esc => {
                if self.current_tab != Tab::Main {
                    self.current_tab = Tab::Main;
                    return false;
                }
                self.should_quit = true;
                return true;
            }
            KeyCode::F(1) => {
                self.current_tab = Tab::Help;
                return false;
            }
            KeyCode::F(2) => {
                self.current_tab = Tab::Logs;
                return false;
            }
            _ => {}
        }

        // Tab-specific handling
        match self.current_tab {
            Tab::Main => self.handle_main_key(key),
            Tab::Logs => self.handle_logs_key(key),
            Tab::Help => {
                // Any key returns to main
                self.current_tab = Tab::Main;
            }
        }

        false
    }

    fn handle_main_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter | KeyCode::Char('c') => self.toggle_connection(),
            KeyCode::Char('s') | KeyCode::Char(' ') => self.trigger_scan(),
            KeyCode::Char('x') => {
                self.history.clear();
                self.add_log(LogLevel::Info, "History cleared");
            }
            _ => {}
        }
    }

    fn handle_logs_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.log_scroll < self.logs.len().saturating_sub(1) {
                    self.log_scroll += 1;
                }
            }
            KeyCode::PageUp => {
                self.log_scroll = self.log_scroll.saturating_sub(10);
            }
            KeyCode::PageDown => {
                self.log_scroll = (self.log_scroll + 10).min(self.logs.len().saturating_sub(1));
            }
            KeyCode::Home => {
                self.log_scroll = 0;
            }
            KeyCode::End => {
                self.log_scroll = self.logs.len().saturating_sub(1);
            }
            _ => {}
        }
    }

    /// The Connect/Disconnect button.
    pub fn toggle_connection(&mut self) {
        if self.status.is_connected() {
            self.manager.disconnect();
            return;
        }
        if self.is_connecting() {
            self.add_log(LogLevel::Debug, "Connect already in progress");
            return;
        }

        self.add_log(LogLevel::Info, "Connecting...");
        let manager = Arc::clone(&self.manager);
        self.connect_thread = Some(thread::spawn(move || manager.connect()));
    }

    /// The Scan Barcode button; only live while connected.
    pub fn trigger_scan(&mut self) {
        if !self.status.is_connected() {
            return;
        }
        match self.manager.trigger_scan() {
            TriggerOutcome::Sent => self.add_log(LogLevel::Debug, "Trigger sent"),
            TriggerOutcome::Unsupported => self.add_log(
                LogLevel::Warn,
                "Scanner has no software trigger, use the hardware button",
            ),
            TriggerOutcome::NotConnected => self.add_log(LogLevel::Warn, "Not connected"),
            TriggerOutcome::Failed => self.add_log(LogLevel::Error, "Trigger failed"),
        }
    }

    /// Called on each tick - reap a finished connect attempt.
    pub fn on_tick(&mut self) {
        let finished = self
            .connect_thread
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if !finished {
            return;
        }

        if let Some(handle) = self.connect_thread.take() {
            match handle.join() {
                Ok(true) => {
                    self.device_ids = self.manager.session_info().and_then(|s| s.device_ids);
                }
                Ok(false) => {
                    let reason = self
                        .manager
                        .last_error()
                        .map_or_else(|| "cancelled".to_string(), |e| e.to_string());
                    self.add_log(LogLevel::Error, format!("Connect failed: {}", reason));
                }
                Err(_) => self.add_log(LogLevel::Error, "Connect thread panicked"),
            }
        }
    }

    /// Apply a snapshot published by the session manager.
    pub fn on_snapshot(&mut self, snapshot: &StateSnapshot) {
        self.status = snapshot.status;
        self.latest_scan = snapshot.latest_scan.clone();
        self.last_error = snapshot.last_error.clone();

        match snapshot.change {
            StateChange::Initial => {}
            StateChange::Status { to, .. } => match (to, &snapshot.last_error) {
                (ConnectionStatus::Connected, _) => {
                    self.add_log(LogLevel::Info, "Scanner connected");
                }
                (ConnectionStatus::Disconnected, Some(err)) => {
                    self.device_ids = None;
                    self.add_log(LogLevel::Warn, err.to_string());
                }
                (ConnectionStatus::Disconnected, None) => {
                    self.device_ids = None;
                    self.add_log(LogLevel::Info, "Scanner disconnected");
                }
            },
            StateChange::Scan => {
                if let Some(scan) = &snapshot.latest_scan {
                    self.add_log(LogLevel::Info, format!("Scan #{}: {}", scan.sequence(), scan));
                    if self.history.len() >= MAX_HISTORY {
                        self.history.pop_front();
                    }
                    self.history.push_back(ScanEntry {
                        scan: Arc::clone(scan),
                        timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
                    });
                }
            }
            StateChange::Error => {
                if let Some(err) = &snapshot.last_error {
                    self.add_log(LogLevel::Error, err.to_string());
                }
            }
        }
    }

    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let now = chrono::Local::now();
        let entry = LogEntry {
            level,
            message: message.into(),
            timestamp: now.format("%H:%M:%S").to_string(),
        };

        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);

        // Auto-scroll to bottom
        self.log_scroll = self.logs.len().saturating_sub(1);
    }
}
