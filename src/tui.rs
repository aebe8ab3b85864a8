use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
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

use crate::app::{BootstrapResult, ProgressEvent, ProgressSink, ProgressSinkKind, Step, StepStatus};
use crate::error::BootstrapError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Plan,
    Import,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Plan => "Plan",
            Phase::Import => "Import",
            Phase::Done => "Done",
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    steps_done: usize,
    last_step_ms: Option<u128>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
    active: bool,
    show_logs: bool,
    summary: Vec<String>,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            match parse_phase(&message) {
                Some(("Import", payload)) => {
                    state.phase = Phase::Import;
                    state.status = payload.to_string();
                }
                Some(("Done", payload)) | Some(("Skip", payload)) => {
                    state.steps_done = state.steps_done.saturating_add(1);
                    state.status = payload.to_string();
                }
                _ => state.status = message.clone(),
            }
            if let Some(elapsed) = event.elapsed {
                state.last_step_ms = Some(elapsed.as_millis());
            }
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            let stamp = Local::now().format("%H:%M:%S");
            push_bounded(&mut state.logs, format!("[{stamp}] {message}"), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                phase: Phase::Plan,
                steps_done: 0,
                last_step_ms: None,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
                active: false,
                show_logs: false,
                summary: Vec::new(),
            })),
        }
    }

    /// Runs `f` on a worker thread while rendering its progress events.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, BootstrapError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_terminal()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            match rx.try_recv() {
                Ok(result) => {
                    self.set_active(false);
                    leave_terminal()?;
                    handle.join().ok();
                    return result.map_err(miette::Report::new);
                }
                Err(TryRecvError::Disconnected) => {
                    self.set_active(false);
                    leave_terminal()?;
                    handle.join().ok();
                    return Err(worker_stopped());
                }
                Err(TryRecvError::Empty) => {}
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key.code) {
                        break;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        leave_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Shows the final step table until a key is pressed.
    pub fn finish_bootstrap(&mut self, result: &BootstrapResult) -> miette::Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.phase = Phase::Done;
            state.status = format!(
                "{}: {} rows inserted, {} skipped",
                result.status,
                result.total_inserted(),
                result.total_skipped()
            );
            state.summary = result.steps.iter().map(step_line).collect();
        }

        let mut terminal = enter_terminal()?;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, 0))
                    .into_diagnostic()?;
            }
            if let Event::Key(key) = event::read().into_diagnostic()? {
                if key.kind == KeyEventKind::Press && !matches!(key.code, KeyCode::F(4)) {
                    break;
                }
                self.handle_key(key.code);
            }
        }
        leave_terminal()
    }

    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::F(4) => {
                if let Ok(mut state) = self.state.lock() {
                    state.show_logs = !state.show_logs;
                }
                false
            }
            _ => false,
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn worker_stopped() -> miette::Report {
    miette::Report::msg("worker thread stopped without a result")
}

fn enter_terminal() -> miette::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn step_line(step: &crate::app::StepResult) -> String {
    match step.status {
        StepStatus::Skipped => format!("  -  {:<30} skipped", step.step.label()),
        StepStatus::Completed => format!(
            "  ✓  {:<30} {:>6} ms  +{} ~{} ins {} skip {}",
            step.step.label(),
            step.elapsed_ms,
            step.created,
            step.updated,
            step.inserted,
            step.skipped
        ),
    }
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(8), Constraint::Length(2)])
        .split(frame.area());

    frame.render_widget(draw_header(state, kind, tick), chunks[0]);
    if state.show_logs {
        frame.render_widget(draw_logs(state), chunks[1]);
    } else {
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);
        frame.render_widget(draw_status_panel(state), main[0]);
        frame.render_widget(draw_steps_panel(state), main[1]);
    }
    let footer = Paragraph::new(Line::from(Span::styled(
        "q/Esc quit · F4 logs",
        Style::default().fg(Color::Gray),
    )))
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);
}

fn draw_header(state: &AppState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Bootstrap => "Bootstrap",
        ProgressSinkKind::Deploy => "Deploy",
    };
    let header_line = Line::from(vec![
        Span::styled(
            "ADAGE-BOOTSTRAP",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(vec![header_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let total = Step::ORDER.len();
    let percent = (state.steps_done.min(total) * 100 / total) as u8;
    let phase_color = match state.phase {
        Phase::Done => Color::Green,
        Phase::Import => Color::Cyan,
        Phase::Plan => Color::Yellow,
    };
    let last_step = state
        .last_step_ms
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{:<7} ", state.phase.label()), Style::default().fg(phase_color)),
            Span::raw(progress_bar(percent)),
            Span::raw(format!(" {:>3}%", percent)),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
            Span::styled("   Last step: ", Style::default().fg(Color::Gray)),
            Span::raw(last_step),
        ]),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(Span::styled("Recent events:", Style::default().fg(Color::Gray))),
    ];
    for event in state.events.iter().rev().take(EVENTS_MAX) {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_steps_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "STEPS",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))];
    if state.summary.is_empty() {
        for (index, step) in Step::ORDER.iter().enumerate() {
            let marker = if index < state.steps_done { "✓" } else { "·" };
            lines.push(Line::from(format!("  {marker}  {}", step.label())));
        }
    } else {
        lines.extend(state.summary.iter().cloned().map(Line::from));
    }
    Paragraph::new(lines).wrap(Wrap { trim: false })
}

fn draw_logs(state: &AppState) -> Paragraph<'static> {
    let lines = state
        .logs
        .iter()
        .rev()
        .take(LOGS_MAX)
        .map(|line| Line::from(line.clone()))
        .collect::<Vec<_>>();
    Paragraph::new(lines)
        .block(Block::default().title("Logs").borders(Borders::ALL))
        .wrap(Wrap { trim: true })
}

fn progress_bar(percent: u8) -> String {
    let total = 16;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (phase, payload) = rest.split_once(';')?;
    Some((phase, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicking_worker_disconnects_the_channel() {
        let (tx, rx) = std::sync::mpsc::channel::<Result<(), BootstrapError>>();
        let handle = thread::spawn(move || {
            let _tx = tx;
            panic!("import worker failed");
        });
        assert!(handle.join().is_err());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(worker_stopped().to_string(), "worker thread stopped without a result");
    }

    #[test]
    fn parses_phase_prefix() {
        assert_eq!(
            parse_phase("phase=Import; [2026-10-19T10:00:00Z] gene info"),
            Some(("Import", "[2026-10-19T10:00:00Z] gene info"))
        );
        assert_eq!(parse_phase("plain message"), None);
    }

    #[test]
    fn progress_counts_finished_and_skipped_steps() {
        let tui = Tui::new(ProgressSinkKind::Bootstrap);
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        sink.event(ProgressEvent {
            message: "phase=Skip; organisms: no inputs".to_string(),
            elapsed: None,
        });
        sink.event(ProgressEvent {
            message: "phase=Done; gene info".to_string(),
            elapsed: Some(Duration::from_millis(42)),
        });
        let state = tui.state.lock().unwrap();
        assert_eq!(state.steps_done, 2);
        assert_eq!(state.last_step_ms, Some(42));
        assert_eq!(progress_bar(50), "[########........]");
    }
}
