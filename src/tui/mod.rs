use crate::app::{App, AppEvent, AppState, Command, Key};
use crate::cleaner::{Cleaner, DeletionFailure, DeletionProgress, DeletionReport, RemovalTool};
use crate::scanner::{ScanHandle, ScanProgress, VenvEntry};
use crate::utils::{format_size, shorten_path};
use anyhow::Result;
use crossbeam::channel::{self, select, Receiver};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// How the interactive session ended
pub struct Session {
    pub app: App,
    pub failures: Vec<DeletionFailure>,
}

/// Channels the event loop is currently listening to.
///
/// A closed channel is set to `None`; the loop swaps it for `never()` so it
/// stops taking part in the select.
struct Streams {
    entries: Option<Receiver<VenvEntry>>,
    progress: Option<Receiver<ScanProgress>>,
    scan_reported: bool,
    deletion: Option<Receiver<DeletionProgress>>,
    cleaner: Option<JoinHandle<DeletionReport>>,
}

pub fn run_tui(app: App, scan: ScanHandle, tool: RemovalTool) -> Result<Session> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app, scan, tool);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    scan: ScanHandle,
    tool: RemovalTool,
) -> Result<Session> {
    let mut keys = Some(spawn_key_reader());
    let ticker = channel::tick(Duration::from_millis(100));
    let mut frame = 0usize;
    let mut redraw = true;
    let mut failures = Vec::new();

    let mut streams = Streams {
        entries: Some(scan.entries),
        progress: Some(scan.progress),
        scan_reported: false,
        deletion: None,
        cleaner: None,
    };

    loop {
        // Scan snapshots arrive far faster than a terminal can render them;
        // they are painted on the next tick.
        if redraw {
            terminal.draw(|f| ui(f, &app, frame))?;
            redraw = false;
        }

        let entries_rx = streams.entries.clone().unwrap_or_else(channel::never);
        let progress_rx = streams.progress.clone().unwrap_or_else(channel::never);
        let deletion_rx = streams.deletion.clone().unwrap_or_else(channel::never);
        let keys_rx = keys.clone().unwrap_or_else(channel::never);

        let event = select! {
            recv(entries_rx) -> msg => match msg {
                Ok(entry) => Some(AppEvent::EntryFound(entry)),
                Err(_) => {
                    streams.entries = None;
                    None
                }
            },
            recv(progress_rx) -> msg => match msg {
                Ok(progress) => Some(AppEvent::ScanProgress(progress)),
                Err(_) => {
                    streams.progress = None;
                    None
                }
            },
            recv(deletion_rx) -> msg => match msg {
                Ok(progress) => Some(AppEvent::DeletionProgress(progress)),
                Err(_) => {
                    streams.deletion = None;
                    let report = streams
                        .cleaner
                        .take()
                        .and_then(|handle| handle.join().ok())
                        .unwrap_or_default();
                    let failed = report.failed.len();
                    failures = report.failed;
                    Some(AppEvent::DeletionFinished { failed })
                }
            },
            recv(keys_rx) -> msg => match msg {
                Ok(key) => Some(AppEvent::Key(key)),
                Err(_) => {
                    keys = None;
                    None
                }
            },
            recv(ticker) -> _ => {
                frame = frame.wrapping_add(1);
                None
            },
        };

        if !matches!(event, Some(AppEvent::ScanProgress(_))) {
            redraw = true;
        }

        if let Some(event) = event {
            match app.handle(event) {
                Command::None => {}
                Command::Quit => break,
                Command::StartDeletion(entries) => {
                    let (rx, handle) = Cleaner::with_tool(tool).spawn(entries);
                    streams.deletion = Some(rx);
                    streams.cleaner = Some(handle);
                }
            }
        }

        if !streams.scan_reported && streams.entries.is_none() && streams.progress.is_none() {
            streams.scan_reported = true;
            debug!(found = app.entries.len(), "scan streams closed");
            app.handle(AppEvent::ScanFinished);
        }
    }

    Ok(Session { app, failures })
}

/// Forward key presses from the terminal into a channel
fn spawn_key_reader() -> Receiver<Key> {
    let (tx, rx) = channel::unbounded();

    thread::spawn(move || loop {
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => map_key(key),
            Ok(_) => None,
            Err(_) => break,
        };

        if let Some(key) = key {
            if tx.send(key).is_err() {
                break;
            }
        }
    });

    rx
}

fn map_key(key: KeyEvent) -> Option<Key> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Key::Interrupt)
        }
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Esc => Some(Key::Esc),
        _ => None,
    }
}

fn ui(f: &mut Frame, app: &App, frame: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(f.size());

    draw_header(f, chunks[0], app, frame);

    match app.state {
        AppState::Done if app.entries.is_empty() => draw_nothing_found(f, chunks[1], app),
        AppState::Done => draw_done(f, chunks[1], app),
        AppState::Cleaning => draw_cleaning(f, chunks[1], app),
        _ => draw_entry_list(f, chunks[1], app),
    }

    draw_footer(f, chunks[2], app);

    if app.state == AppState::Confirming {
        draw_confirm(f, app);
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, frame: usize) {
    let progress = &app.scan_progress;
    let status = if app.state == AppState::Scanning {
        Line::from(vec![
            Span::styled(
                SPINNER[frame % SPINNER.len()],
                Style::default().fg(Color::Green),
            ),
            Span::raw(format!(
                " Scanning... {} folders, {} environments | {}",
                progress.folders_scanned,
                progress.repos_found,
                shorten_path(&progress.current_path, area.width.saturating_sub(50) as usize)
            )),
        ])
    } else {
        Line::from(Span::raw(format!(
            "Scanned {} folders | {} environments | Total size: {}",
            progress.folders_scanned,
            app.entries.len(),
            format_size(app.total_size())
        )))
    };

    let text = vec![
        Line::from(Span::styled(
            format!("venv-cleaner | {}", app.root.display()),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        status,
    ];

    let paragraph =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Info"));

    f.render_widget(paragraph, area);
}

fn draw_entry_list(f: &mut Frame, area: Rect, app: &App) {
    let path_width = area.width.saturating_sub(40) as usize;
    let items: Vec<ListItem> = app
        .entries
        .iter()
        .map(|entry| {
            let marker = if entry.selected { "[x] " } else { "[ ] " };
            let manifest = if entry.has_manifest { "" } else { " (no manifest)" };

            let content = format!(
                "{}{:<width$} {:>10} {:>5}d{}",
                marker,
                shorten_path(&entry.repo_path, path_width),
                entry.size_human(),
                entry.days_since_modified(),
                manifest,
                width = path_width
            );

            let style = if entry.selected {
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            ListItem::new(content).style(style)
        })
        .collect();

    let title = format!("Environments (sorted by {})", app.sort.label());
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");

    let mut state = ListState::default();
    if app.state != AppState::Scanning && !app.entries.is_empty() {
        state.select(Some(app.cursor));
    }

    f.render_stateful_widget(list, area, &mut state);
}

fn draw_cleaning(f: &mut Frame, area: Rect, app: &App) {
    let progress = app.deletion.unwrap_or_default();
    let ratio = if progress.total == 0 {
        0.0
    } else {
        progress.current as f64 / progress.total as f64
    };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Cleaning"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(format!(
            "{}/{} | freed {}",
            progress.current,
            progress.total,
            format_size(progress.bytes_freed)
        ));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);
    f.render_widget(gauge, chunks[0]);
}

fn draw_done(f: &mut Frame, area: Rect, app: &App) {
    let (removed, freed) = app.totals();
    let mut text = vec![
        Line::from(Span::styled(
            "Cleaning completed!",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("  Removed: {}", removed)),
        Line::from(format!("  Space freed: {}", format_size(freed))),
    ];
    if app.failed > 0 {
        text.push(Line::from(Span::styled(
            format!("  Failed: {} (details are printed on exit)", app.failed),
            Style::default().fg(Color::Red),
        )));
    }

    let paragraph =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Done"));
    f.render_widget(paragraph, area);
}

fn draw_nothing_found(f: &mut Frame, area: Rect, app: &App) {
    let text = vec![Line::from(Span::styled(
        format!(
            "No git repositories with a virtual environment found under {}",
            app.root.display()
        ),
        Style::default().fg(Color::Yellow),
    ))];

    let paragraph =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Done"));
    f.render_widget(paragraph, area);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let keys = match app.state {
        AppState::Scanning => vec![Span::raw("q: "), Span::styled("Quit", bold)],
        AppState::Selecting => vec![
            Span::raw("Space: "),
            Span::styled("Toggle", bold),
            Span::raw(" | a/d: "),
            Span::styled("All/None", bold),
            Span::raw(" | t/s/n: "),
            Span::styled("Sort", bold),
            Span::raw(" | Enter: "),
            Span::styled("Clean", bold),
            Span::raw(" | q: "),
            Span::styled("Quit", bold),
        ],
        AppState::Confirming => vec![
            Span::raw("y: "),
            Span::styled("Delete", bold),
            Span::raw(" | n: "),
            Span::styled("Back", bold),
        ],
        AppState::Cleaning => vec![Span::raw("Deleting selected environments...")],
        AppState::Done => vec![Span::raw("Press any key to exit")],
    };

    let text = vec![
        Line::from(Span::raw(format!(
            "Selected: {} | Size to free: {}",
            app.selected_count(),
            format_size(app.selected_size())
        ))),
        Line::from(keys),
    ];

    let paragraph =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Controls"));

    f.render_widget(paragraph, area);
}

fn draw_confirm(f: &mut Frame, app: &App) {
    let area = centered_rect(60, 5, f.size());
    let text = vec![
        Line::from(format!(
            "Delete {} environment(s), freeing {}?",
            app.selected_count(),
            format_size(app.selected_size())
        )),
        Line::from(""),
        Line::from("y / Enter: delete    n / Esc: back"),
    ];

    let paragraph = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Confirm")
            .border_style(Style::default().fg(Color::Red)),
    );

    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

/// A rectangle `percent_x` wide and `height` rows tall, centered in `area`
fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * percent_x / 100;
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width,
        height: height.min(area.height),
    }
}
