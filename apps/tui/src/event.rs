//! Event handling for the TUI.
//!
//! Provides an event loop that merges keyboard and terminal events with
//! scanner state updates.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, KeyEvent};
use nlscan_core::{StateSnapshot, Subscription};

/// Application events.
#[derive(Debug, Clone)]
pub enum Event {
    /// Periodic tick for animations/updates.
    Tick,
    /// Keyboard event.
    Key(KeyEvent),
    /// Terminal resize.
    Resize(u16, u16),
    /// Scanner state changed.
    Scanner(Arc<StateSnapshot>),
}

/// Event handler fed by background threads.
pub struct EventHandler {
    receiver: mpsc::Receiver<Event>,
}

impl EventHandler {
    /// Create a new event handler with the specified tick rate.
    pub fn new(tick_rate_ms: u64, updates: Subscription) -> Result<Self> {
        let tick_rate = Duration::from_millis(tick_rate_ms);
        let (sender, receiver) = mpsc::channel();

        let scanner_tx = sender.clone();
        thread::Builder::new()
            .name("tui-scanner-events".into())
            .spawn(move || {
                for snapshot in updates {
                    if scanner_tx.send(Event::Scanner(snapshot)).is_err() {
                        break;
                    }
                }
            })?;

        thread::Builder::new()
            .name("tui-terminal-events".into())
            .spawn(move || {
                let mut last_tick = std::time::Instant::now();
                loop {
                    let timeout = tick_rate
                        .checked_sub(last_tick.elapsed())
                        .unwrap_or(Duration::ZERO);

                    if event::poll(timeout).unwrap_or(false) {
                        if let Ok(evt) = event::read() {
                            let event = match evt {
                                event::Event::Key(key) => Some(Event::Key(key)),
                                event::Event::Resize(w, h) => Some(Event::Resize(w, h)),
                                _ => None,
                            };
                            if let Some(e) = event {
                                if sender.send(e).is_err() {
                                    break;
                                }
                            }
                        }
                    }

                    if last_tick.elapsed() >= tick_rate {
                        if sender.send(Event::Tick).is_err() {
                            break;
                        }
                        last_tick = std::time::Instant::now();
                    }
                }
            })?;

        Ok(Self { receiver })
    }

    /// Get the next event, blocking.
    pub fn next(&self) -> Result<Event> {
        Ok(self.receiver.recv()?)
    }
}
