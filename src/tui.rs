use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::BridgeError;
use crate::monitor::CancellationToken;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Operational,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Intake,
    Stage,
    Execute,
    Return,
    Archive,
}

impl Phase {
    const ALL: [Phase; 5] = [
        Phase::Intake,
        Phase::Stage,
        Phase::Execute,
        Phase::Return,
        Phase::Archive,
    ];

    fn label(self) -> &'static str {
        match self {
            Phase::Intake => "Intake",
            Phase::Stage => "Stage",
            Phase::Execute => "Execute",
            Phase::Return => "Return",
            Phase::Archive => "Archive",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    polls: u32,
    finished_submissions: u32,
    cancelling: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
    cancel: CancellationToken,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
                if phase == Phase::Execute && payload.contains("(poll ") {
                    state.polls = state.polls.saturating_add(1);
                }
            } else {
                state.status = message.clone();
            }
            let line = match event.elapsed {
                Some(elapsed) => {
                    state.finished_submissions = state.finished_submissions.saturating_add(1);
                    format!("{message} ({:.1}s)", elapsed.as_secs_f64())
                }
                None => message,
            };
            push_bounded(&mut state.events, line.clone(), EVENTS_MAX);
            push_bounded(&mut state.logs, format!("[{}] {line}", timestamp()), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, cancel: CancellationToken) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: Phase::Intake,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Operational,
                started: Instant::now(),
                polls: 0,
                finished_submissions: 0,
                cancelling: false,
            })),
            cancel,
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while rendering its progress. `q` or Esc
    /// requests cancellation; the worker decides where to stop.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, BridgeError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                let elapsed = state.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, elapsed))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }
            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        result.map_err(miette::Report::new)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.cancel.cancel();
                if let Ok(mut state) = self.state.lock() {
                    state.cancelling = true;
                    state.status = "cancelling after the current step".to_string();
                }
            }
            KeyCode::Char('l') | KeyCode::F(4) => {
                if let Ok(mut state) = self.state.lock() {
                    state.view = match state.view {
                        View::Operational => View::Logs,
                        View::Logs => View::Operational,
                    };
                }
            }
            KeyCode::Up => self.log_scroll = self.log_scroll.saturating_add(1),
            KeyCode::Down => self.log_scroll = self.log_scroll.saturating_sub(1),
            _ => {}
        }
    }
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &AppState,
    tick: usize,
    elapsed: Duration,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tui.kind, tick), chunks[0]);
    match state.view {
        View::Operational => {
            let main = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                .split(chunks[1]);
            frame.render_widget(draw_status_panel(state, elapsed), main[0]);
            frame.render_widget(draw_events_panel(state), main[1]);
        }
        View::Logs => frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[1]),
    }
    let footer = Paragraph::new(Line::from(Span::styled(
        "q/Esc cancel   l logs   Up/Down scroll",
        Style::default().fg(Color::Gray),
    )));
    frame.render_widget(footer, chunks[2]);
}

fn draw_header(state: &AppState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Run => "Queue run",
        ProgressSinkKind::Project => "Project",
        ProgressSinkKind::App => "App",
        ProgressSinkKind::Archive => "Archive",
    };
    let mode = if state.cancelling {
        Span::styled("CANCELLING", Style::default().fg(Color::Red))
    } else {
        Span::styled(hb, Style::default().fg(Color::Green))
    };
    Paragraph::new(Line::from(vec![
        Span::styled(
            "SYNBRIDGE",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        mode,
    ]))
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState, elapsed: Duration) -> Paragraph<'static> {
    let phases: Vec<Span<'static>> = Phase::ALL
        .iter()
        .flat_map(|phase| {
            let style = if *phase == state.phase {
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [Span::styled(phase.label(), style), Span::raw("  ")]
        })
        .collect();
    let lines = vec![
        Line::from(Span::styled(
            "STATUS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(phases),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format_elapsed(elapsed)),
            Span::styled("   Polls: ", Style::default().fg(Color::Gray)),
            Span::raw(state.polls.to_string()),
            Span::styled("   Done: ", Style::default().fg(Color::Gray)),
            Span::raw(state.finished_submissions.to_string()),
        ]),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_events_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "RECENT EVENTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState, scroll: u16) -> Paragraph<'static> {
    let lines: Vec<Line<'static>> = state
        .logs
        .iter()
        .rev()
        .skip(scroll as usize)
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::NONE).title("Logs"))
        .wrap(Wrap { trim: false })
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = Phase::ALL
        .into_iter()
        .find(|phase| phase.label() == label.trim())?;
    Some((phase, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_prefix_is_parsed() {
        assert_eq!(
            parse_phase("phase=Stage; reads1 <- syn111"),
            Some((Phase::Stage, "reads1 <- syn111"))
        );
        assert_eq!(parse_phase("phase=Unknown; x"), None);
        assert_eq!(parse_phase("plain message"), None);
    }

    #[test]
    fn elapsed_is_clock_formatted() {
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
    }
}
