//! NLSCAN TUI Application - Terminal User Interface
//!
//! Connect/Disconnect and Scan controls for a USB barcode scanner with a
//! live scan history and log viewer.
//!
//! Usage: `nlscan-tui [CONFIG.toml]`

mod app;
mod event;
mod ui;

use std::io;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use nlscan_core::{NusbTransport, ScannerConfig, SessionManager};
use ratatui::prelude::*;
use tracing_subscriber::prelude::*;

use app::{App, LogLevel};
use event::{Event, EventHandler};

fn main() -> Result<()> {
    // Setup panic hook to restore terminal on crash
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));

    // Initialize tracing to file (not stdout, since we're using the terminal)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("nlscan-tui.log")
        .context("opening nlscan-tui.log")?;
    let file_appender = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(file_appender)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => ScannerConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScannerConfig::default(),
    };

    // Setup terminal
    let terminal = setup_terminal()?;

    // Run app
    let result = run_app(terminal, config);

    // Restore terminal
    restore_terminal()?;

    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}

fn run_app(mut terminal: Terminal<CrosstermBackend<io::Stdout>>, config: ScannerConfig) -> Result<()> {
    let transport = NusbTransport::new(config.device.clone())?;
    let manager = Arc::new(SessionManager::new(transport, config.decode.clone()));

    let event_handler = EventHandler::new(250, manager.subscribe())?; // 250ms tick rate
    let mut app = App::new(Arc::clone(&manager));
    app.add_log(
        LogLevel::Info,
        format!(
            "Ready: vendor {:04X}, press Enter to connect",
            config.device.vendor_id
        ),
    );

    loop {
        // Draw UI
        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Handle events
        match event_handler.next()? {
            Event::Tick => {
                app.on_tick();
            }
            Event::Key(key_event) => {
                if app.on_key(key_event) {
                    break; // Exit requested
                }
            }
            Event::Scanner(snapshot) => {
                app.on_snapshot(&snapshot);
            }
            Event::Resize(_, _) => {
                // Terminal resize is handled automatically by ratatui
            }
        }
    }

    manager.disconnect();
    Ok(())
}
