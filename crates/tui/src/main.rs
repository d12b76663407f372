//! cutready TUI
//!
//! Terminal front-end for the download and transcode queue. Paste URLs,
//! pick an output mode and resolution, start the run and watch progress as
//! the update channel is drained on a fixed tick.

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use cutready::{
    run_startup_checks, Config, EngineContext, FormatMode, JobStatus, JobUpdate, RunEnd, Session,
    RESOLUTION_LABELS,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use std::{
    collections::VecDeque,
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

const MAX_EVENT_LOG_ENTRIES: usize = 100;

/// cutready-tui - interactive download and transcode queue
#[derive(Parser, Debug)]
#[command(name = "cutready-tui")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory for finished files (overrides the config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log file; defaults to cutready-tui.log in the temp directory
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Skip startup checks (ffmpeg, yt-dlp). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

// ============================================================================
// App State
// ============================================================================

/// Main application state for the TUI
pub struct App {
    session: Session,
    /// URL being typed
    pub input: String,
    pub mode: FormatMode,
    pub resolution_index: usize,
    pub output_dir: PathBuf,
    /// Event log with recent job events
    pub event_log: VecDeque<String>,
}

impl App {
    pub fn new(session: Session) -> Self {
        let config = &session.context().config.download;
        let mode = config.mode;
        let output_dir = config.output_dir.clone();
        let resolution_index = RESOLUTION_LABELS
            .iter()
            .position(|label| cutready::format::max_height(label) == cutready::format::max_height(&config.resolution))
            .unwrap_or(1);

        Self {
            session,
            input: String::new(),
            mode,
            resolution_index,
            output_dir,
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
        }
    }

    /// Add an event to the log
    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    pub fn resolution(&self) -> &'static str {
        RESOLUTION_LABELS[self.resolution_index % RESOLUTION_LABELS.len()]
    }

    pub fn cycle_mode(&mut self) {
        self.mode = next_mode(self.mode);
        self.log_event(format!("Mode: {}", self.mode.label()));
    }

    pub fn cycle_resolution(&mut self) {
        self.resolution_index = (self.resolution_index + 1) % RESOLUTION_LABELS.len();
        self.log_event(format!("Resolution: {}", self.resolution()));
    }

    /// Submit every whitespace-separated URL in the input line
    pub fn submit_input(&mut self) {
        let input = std::mem::take(&mut self.input);
        for url in input.split_whitespace() {
            match self.session.submit(url) {
                Ok(()) => self.log_event(format!("Added {}", url)),
                Err(e) => self.log_event(format!("Rejected: {}", e)),
            }
        }
    }

    pub fn start(&mut self) {
        let resolution = self.resolution();
        match self.session.start(self.mode, resolution, self.output_dir.clone()) {
            Ok(count) => self.log_event(format!(
                "Started {} job(s): {}, {}",
                count,
                self.mode.label(),
                resolution
            )),
            Err(e) => self.log_event(format!("Cannot start: {}", e)),
        }
    }

    pub fn clear_finished(&mut self) {
        let removed = self.session.clear_finished();
        self.log_event(format!("Cleared {} finished job(s)", removed));
    }

    /// Drain the update channel and log noteworthy events
    pub fn pump(&mut self) {
        for update in self.session.pump() {
            if let Some(line) = describe(&self.session, &update) {
                self.log_event(line);
            }
        }
    }
}

fn next_mode(mode: FormatMode) -> FormatMode {
    let index = FormatMode::ALL.iter().position(|m| *m == mode).unwrap_or(0);
    FormatMode::ALL[(index + 1) % FormatMode::ALL.len()]
}

/// One log line for an update, if it is worth showing
fn describe(session: &Session, update: &JobUpdate) -> Option<String> {
    if update.all_complete {
        return Some(match session.last_run() {
            Some(RunEnd::Aborted(message)) => format!("Run aborted: {}", message),
            _ => "All downloads complete".to_string(),
        });
    }

    let url = update.url.as_deref()?;
    let job = session.board().get(url)?;
    match update.status {
        Some(JobStatus::Failed) => Some(format!(
            "Failed: {} ({})",
            job.title,
            job.error.as_deref().unwrap_or("unknown error")
        )),
        Some(JobStatus::Finished) => Some(format!("Finished: {}", job.title)),
        Some(status) if status.is_active() => Some(format!("{}: {}", status, job.title)),
        _ if update.title.is_some() => Some(format!("Info: {}", job.title)),
        _ => None,
    }
}

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Pending => Color::Gray,
        JobStatus::Downloading => Color::Cyan,
        JobStatus::Encoding => Color::Magenta,
        JobStatus::Finished => Color::Green,
        JobStatus::Failed => Color::Red,
    }
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

/// Initialize the terminal for TUI rendering
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore terminal to normal state
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

fn render_input(f: &mut Frame, area: Rect, app: &App) {
    let title = format!(
        " URL | Mode: {} | Resolution: {} ",
        app.mode.label(),
        app.resolution()
    );
    let paragraph = Paragraph::new(app.input.as_str())
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(paragraph, area);
}

/// Render the job table
fn render_job_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["Title", "Status", "Progress", "URL"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .session
        .board()
        .iter()
        .map(|job| {
            let progress = if job.status.is_active() {
                format!("{:.1}%", job.progress)
            } else {
                "-".to_string()
            };
            Row::new(vec![
                Cell::from(job.title.clone()),
                Cell::from(job.status.to_string()).style(Style::default().fg(status_color(job.status))),
                Cell::from(progress),
                Cell::from(job.url.clone()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Percentage(45),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Percentage(40),
    ];

    let title = if app.session.is_running() {
        " Queue (running) "
    } else {
        " Queue "
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

/// Render current-job and overall progress gauges
fn render_gauges(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let board = app.session.board();
    let (current_title, current) = board
        .iter()
        .find(|job| job.status.is_active())
        .map(|job| (format!(" {} ", job.status), job.progress))
        .unwrap_or_else(|| (" Current ".to_string(), 0.0));
    let total = board.total_progress();

    let current_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(current_title))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio((current / 100.0).clamp(0.0, 1.0))
        .label(format!("{:.1}%", current));

    let total_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Overall "))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((total / 100.0).clamp(0.0, 1.0))
        .label(format!("{:.0}%", total));

    f.render_widget(current_gauge, chunks[0]);
    f.render_widget(total_gauge, chunks[1]);
}

/// Render event log showing recent job events
fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take((area.height as usize).saturating_sub(2))
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

/// Render status bar with job counts and key help
fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let counts = app.session.board().counts();
    let status = format!(
        " Pending: {} | Active: {} | Finished: {} | Failed: {} | Enter add | Tab mode | F2 resolution | F5 start | F8 clear | Esc quit ",
        counts.pending,
        counts.downloading + counts.encoding,
        counts.finished,
        counts.failed,
    );

    let paragraph = Paragraph::new(status)
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(paragraph, area);
}

// ============================================================================
// Main UI Layout
// ============================================================================

/// Render the complete UI layout
fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // URL input
            Constraint::Min(6),     // Job table
            Constraint::Length(3),  // Gauges
            Constraint::Length(8),  // Event log
            Constraint::Length(1),  // Status bar
        ])
        .split(f.area());

    render_input(f, chunks[0], app);
    render_job_table(f, chunks[1], app);
    render_gauges(f, chunks[2], app);
    render_event_log(f, chunks[3], app);
    render_status_bar(f, chunks[4], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("cutready-tui.log"));
    init_logging(&log_path)?;

    let mut config = Config::load_or_default(&args.config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    if let Some(dir) = &args.output_dir {
        config.download.output_dir = dir.clone();
    }

    if args.skip_checks {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        eprintln!("Startup check failed: {}", e);
        return Err(io::Error::new(io::ErrorKind::NotFound, e.to_string()));
    }

    let poll_interval = Duration::from_millis(config.ui.poll_interval_ms.max(10));
    let ctx = Arc::new(EngineContext::probe(config));
    let encoder = ctx.effective_capability();

    let mut app = App::new(Session::new(ctx));
    app.log_event(format!("cutready started (encoder: {})", encoder));
    app.log_event(format!("Output directory: {}", app.output_dir.display()));

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, poll_interval).await;
    restore_terminal(&mut terminal)?;

    result
}

/// Main application loop
async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    poll_interval: Duration,
) -> io::Result<()> {
    let mut last_pump = Instant::now();

    loop {
        if last_pump.elapsed() >= poll_interval {
            app.pump();
            last_pump = Instant::now();
        }

        terminal.draw(|f| ui(f, app))?;

        // Short timeout keeps redraws and channel drains frequent
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc => return Ok(()),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(());
                    }
                    KeyCode::Enter => app.submit_input(),
                    KeyCode::Tab => app.cycle_mode(),
                    KeyCode::F(2) => app.cycle_resolution(),
                    KeyCode::F(5) => app.start(),
                    KeyCode::F(8) => app.clear_finished(),
                    KeyCode::Backspace => {
                        app.input.pop();
                    }
                    KeyCode::Char(c) => app.input.push(c),
                    _ => {}
                }
            }
        }
    }
}
