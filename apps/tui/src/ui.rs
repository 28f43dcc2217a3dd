//! UI rendering module.
//!
//! Contains all the widget rendering logic (View).

use nlscan_core::{ConnectionStatus, ScannerTransport};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Padding, Paragraph, Tabs, Wrap},
};

use crate::app::{App, LogEntry, LogLevel, Tab};

/// Main draw function.
pub fn draw<T: ScannerTransport + 'static>(frame: &mut Frame, app: &App<T>) {
    let area = frame.area();

    // Create main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header/tabs
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Footer/status bar
        ])
        .split(area);

    draw_header(frame, chunks[0], app);

    match app.current_tab {
        Tab::Main => draw_main_view(frame, chunks[1], app),
        Tab::Logs => draw_logs_view(frame, chunks[1], app),
        Tab::Help => draw_help_view(frame, chunks[1]),
    }

    draw_footer(frame, chunks[2], app);
}

fn draw_header<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let titles = vec!["Main", "Logs (F2)", "Help (F1)"];
    let selected = match app.current_tab {
        Tab::Main => 0,
        Tab::Logs => 1,
        Tab::Help => 2,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" NLSCAN Scanner ")
                .title_style(
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
        )
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .divider(symbols::DOT);

    frame.render_widget(tabs, area);
}

fn draw_footer<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let status = match (app.status, app.device_ids) {
        (ConnectionStatus::Connected, Some((vid, pid))) => Span::styled(
            format!(" ● {:04X}:{:04X} ", vid, pid),
            Style::default().fg(Color::Green),
        ),
        (ConnectionStatus::Connected, None) => {
            Span::styled(" ● Connected ", Style::default().fg(Color::Green))
        }
        (ConnectionStatus::Disconnected, _) if app.is_connecting() => {
            Span::styled(" ⟳ Connecting ", Style::default().fg(Color::Yellow))
        }
        (ConnectionStatus::Disconnected, _) => {
            Span::styled(" ○ Disconnected ", Style::default().fg(Color::Red))
        }
    };

    let scans = Span::styled(
        format!(" {} scans ", app.history.len()),
        Style::default().fg(Color::Cyan),
    );

    let help = Span::styled(
        " Ctrl+Q: Quit | Enter: Connect | S: Scan ",
        Style::default().fg(Color::DarkGray),
    );

    let line = Line::from(vec![status, scans, help]);

    let footer = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    frame.render_widget(footer, area);
}

fn draw_main_view<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Status card
            Constraint::Percentage(60), // Scan card & logs
        ])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8), // Status card
            Constraint::Min(5),    // History
        ])
        .split(chunks[0]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8), // Scan card
            Constraint::Min(5),    // Recent logs
        ])
        .split(chunks[1]);

    draw_status_card(frame, left[0], app);
    draw_history(frame, left[1], app);
    draw_scan_card(frame, right[0], app);
    draw_recent_logs(frame, right[1], app);
}

fn draw_status_card<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Scanner Status ")
        .padding(Padding::horizontal(1));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let (label, color) = if app.status.is_connected() {
        ("Connected", Color::Green)
    } else if app.is_connecting() {
        ("Connecting...", Color::Yellow)
    } else {
        ("Disconnected", Color::Red)
    };

    let device = match app.device_ids {
        Some((vid, pid)) => format!("{:04X}:{:04X}", vid, pid),
        None => "-".to_string(),
    };

    let error = app
        .last_error
        .as_ref()
        .map_or_else(|| "-".to_string(), |e| e.to_string());

    let button = if app.status.is_connected() {
        Span::styled(
            " [Enter] Disconnect ",
            Style::default().fg(Color::Black).bg(Color::Red),
        )
    } else if app.is_connecting() {
        Span::styled(" ⟳ Connecting... ", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled(
            " [Enter] Connect ",
            Style::default().fg(Color::Black).bg(Color::Green),
        )
    };

    let content = vec![
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Cyan)),
            Span::styled(
                label,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::styled("Device: ", Style::default().fg(Color::Cyan)),
            Span::styled(device, Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("Error:  ", Style::default().fg(Color::Cyan)),
            Span::styled(error, Style::default().fg(Color::White)),
        ]),
        Line::from(""),
        Line::from(button),
    ];

    frame.render_widget(Paragraph::new(content).wrap(Wrap { trim: true }), inner);
}

fn draw_scan_card<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Scan Result ")
        .padding(Padding::horizontal(1));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(inner);

    let result = match &app.latest_scan {
        Some(scan) => Paragraph::new(Text::from(vec![
            Line::from(Span::styled(
                scan.text().to_string(),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!("#{} · {} bytes", scan.sequence(), scan.raw().len()),
                Style::default().fg(Color::DarkGray),
            )),
        ])),
        None => Paragraph::new(Span::styled(
            "No scan yet",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(result.wrap(Wrap { trim: false }), chunks[0]);

    // Scan button
    let button_style = if app.status.is_connected() {
        Style::default().fg(Color::Black).bg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let button = Paragraph::new("▶ [S] Scan Barcode")
        .style(button_style)
        .alignment(Alignment::Center);
    frame.render_widget(button, chunks[1]);
}

fn draw_history<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let items: Vec<ListItem> = app
        .history
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(entry.scan.text().to_string(), Style::default().fg(Color::White)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(" History (x: clear) "),
    );

    frame.render_widget(list, area);
}

fn draw_recent_logs<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| log_to_list_item(entry, area.width))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" Recent Logs "),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(list, area);
}

fn draw_logs_view<T: ScannerTransport + 'static>(frame: &mut Frame, area: Rect, app: &App<T>) {
    let items: Vec<ListItem> = app
        .logs
        .iter()
        .skip(app.log_scroll)
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| log_to_list_item(entry, area.width))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(format!(
                    " Logs ({}/{}) ",
                    app.log_scroll + 1,
                    app.logs.len().max(1)
                )),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(list, area);
}

fn draw_help_view(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        "",
        "  NLSCAN Scanner TUI - USB barcode scanner monitor",
        "",
        "  KEYBOARD SHORTCUTS:",
        "",
        "  Ctrl+Q, Ctrl+C, Esc    Quit application",
        "  F1                     Show this help",
        "  F2                     View full logs",
        "  Enter, c               Connect / Disconnect",
        "  s, Space               Trigger a scan (when connected)",
        "  x                      Clear scan history",
        "",
        "  IN LOGS VIEW:",
        "",
        "  j/k, Up/Down           Scroll logs",
        "  Page Up/Down           Scroll by page",
        "  Home/End               Go to start/end",
        "",
        "  USAGE:",
        "",
        "  1. Plug in the scanner and press Enter to connect",
        "  2. Scan a barcode, or press S for a software trigger",
        "  3. Results show up in the Scan Result card",
        "",
        "  Press any key to return...",
    ];

    let text: Vec<Line> = help_text.iter().map(|s| Line::from(*s)).collect();

    let help = Paragraph::new(Text::from(text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Help "),
        )
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false });

    frame.render_widget(help, area);
}

fn log_to_list_item(entry: &LogEntry, width: u16) -> ListItem<'static> {
    let (icon, color) = match entry.level {
        LogLevel::Error => ("✗", Color::Red),
        LogLevel::Warn => ("⚠", Color::Yellow),
        LogLevel::Info => ("●", Color::Green),
        LogLevel::Debug => ("○", Color::Blue),
    };

    let time_len = entry.timestamp.len() + 1; // +1 for space
    let icon_len = 2; // 1 char + 1 space

    let msg_width = width.saturating_sub((time_len + icon_len + 4) as u16) as usize;
    let prefix = vec![
        Span::styled(
            format!("{} ", entry.timestamp),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(format!("{} ", icon), Style::default().fg(color)),
    ];

    let chars: Vec<char> = entry.message.chars().collect();
    if msg_width == 0 || chars.len() <= msg_width {
        let mut spans = prefix;
        spans.push(Span::styled(
            entry.message.clone(),
            Style::default().fg(Color::White),
        ));
        return ListItem::new(Line::from(spans));
    }

    // Wrap on char boundaries; scanned text may be multi-byte.
    let mut lines = Vec::new();
    for (i, chunk) in chars.chunks(msg_width).enumerate() {
        let s: String = chunk.iter().collect();
        let mut spans = if i == 0 {
            prefix.clone()
        } else {
            vec![Span::raw(" ".repeat(time_len + icon_len))]
        };
        spans.push(Span::styled(s, Style::default().fg(Color::White)));
        lines.push(Line::from(spans));
    }
    ListItem::new(Text::from(lines))
}
