// master/src/dashboard/tui.rs

use anyhow::{Context, Result};
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
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;

use super::{format_elapsed, DashboardPlugin, DashboardSnapshot, KeyCommand, Renderer, SlotView};
use crate::state::SlotPhase;

const KEY_POLL: Duration = Duration::from_millis(100);

/// Dashboard interactivo en la pantalla alternativa de la terminal.
pub struct TuiRenderer {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiRenderer {
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("no se pudo activar el modo raw")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("no se pudo abrir la pantalla alternativa")?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }

    fn draw<T>(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()> {
        self.terminal.draw(|f| {
            let totals = plugin.totals_lines(&snapshot.totals);
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(4 + totals.len() as u16),
                    Constraint::Length(snapshot.slots.len() as u16 + 2),
                    Constraint::Min(6),
                    Constraint::Length(6),
                ])
                .split(f.area());

            render_header(f, chunks[0], snapshot, totals);
            render_slots(f, chunks[1], snapshot, plugin);
            render_logs(f, chunks[2], snapshot);
            render_messages(f, chunks[3], snapshot);
        })?;
        Ok(())
    }
}

impl<T> Renderer<T> for TuiRenderer {
    fn render(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()> {
        self.draw(snapshot, plugin)
    }

    fn finish(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()> {
        self.draw(snapshot, plugin)
    }
}

impl Drop for TuiRenderer {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

fn label(text: &str) -> Span<'_> {
    Span::styled(text, Style::default().fg(Color::Cyan))
}

fn render_header<T>(f: &mut Frame, area: Rect, snapshot: &DashboardSnapshot<T>, totals: Vec<String>) {
    let status = if snapshot.finished {
        Span::styled("TERMINADO", Style::default().fg(Color::Green))
    } else if snapshot.draining {
        Span::styled("CERRANDO", Style::default().fg(Color::Yellow))
    } else if snapshot.paused {
        Span::styled("PAUSADO", Style::default().fg(Color::Yellow))
    } else {
        Span::styled("EN CURSO", Style::default().fg(Color::Green))
    };

    let mut lines = vec![
        Line::from(vec![
            label("Tareas: "),
            Span::raw(format!("{}/{}", snapshot.done(), snapshot.total_tasks)),
            label("  |  OK: "),
            Span::raw(snapshot.completed.to_string()),
            label("  |  Fallidas: "),
            Span::styled(
                snapshot.failed.to_string(),
                if snapshot.failed > 0 {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                },
            ),
            label("  |  En curso: "),
            Span::raw(snapshot.in_flight.to_string()),
        ]),
        Line::from(vec![
            label("Workers: "),
            Span::raw(format!("{} (CPUs: {})", snapshot.pool_size, snapshot.cpu_count)),
            label("  |  Tiempo: "),
            Span::raw(format_elapsed(snapshot.elapsed)),
            label("  |  Estado: "),
            status,
        ]),
    ];
    lines.extend(totals.into_iter().map(Line::from));

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", snapshot.title));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn phase_style(phase: SlotPhase) -> Style {
    match phase {
        SlotPhase::Busy => Style::default().fg(Color::Green),
        SlotPhase::Idle => Style::default().fg(Color::Gray),
        SlotPhase::Starting | SlotPhase::Stopping => Style::default().fg(Color::Yellow),
        SlotPhase::Stopped => Style::default().fg(Color::DarkGray),
        SlotPhase::Retired => Style::default().fg(Color::Red),
    }
}

fn slot_line<T>(slot: &SlotView, focused: bool, plugin: &dyn DashboardPlugin<T>) -> Line<'static> {
    let marker = if focused { "▶" } else { " " };
    let mut spans = vec![
        Span::raw(format!("{} #{:<2} ", marker, slot.index)),
        Span::styled(format!("{:<10}", slot.phase.as_str()), phase_style(slot.phase)),
        Span::raw(format!(" tareas={:<4}", slot.tasks_done)),
    ];
    if slot.restarts > 0 {
        spans.push(Span::styled(
            format!(" relanzado x{}", slot.restarts),
            Style::default().fg(Color::Red),
        ));
    }
    spans.push(Span::raw(format!("  {}", plugin.slot_detail(slot))));

    let line = Line::from(spans);
    if focused {
        line.style(Style::default().add_modifier(Modifier::BOLD))
    } else {
        line
    }
}

fn render_slots<T>(f: &mut Frame, area: Rect, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) {
    let lines: Vec<Line> = snapshot
        .slots
        .iter()
        .map(|s| slot_line(s, s.index == snapshot.focused, plugin))
        .collect();
    let block = Block::default().borders(Borders::ALL).title(" Workers ");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_logs<T>(f: &mut Frame, area: Rect, snapshot: &DashboardSnapshot<T>) {
    // sólo entran las últimas líneas que caben
    let visible = area.height.saturating_sub(2) as usize;
    let skip = snapshot.focused_logs.len().saturating_sub(visible);
    let lines: Vec<Line> = snapshot
        .focused_logs
        .iter()
        .skip(skip)
        .map(|l| Line::from(l.as_str()))
        .collect();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" Logs del worker #{} (Tab/←/→ cambia) ", snapshot.focused));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_messages<T>(f: &mut Frame, area: Rect, snapshot: &DashboardSnapshot<T>) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = snapshot.pool_messages.len().saturating_sub(visible);
    let lines: Vec<Line> = snapshot
        .pool_messages
        .iter()
        .skip(skip)
        .map(|l| Line::from(l.as_str()))
        .collect();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Pool (p pausa, q sale) ");
    f.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

/// Traduce una tecla a un comando del dashboard.
pub fn map_key(key: KeyEvent) -> Option<KeyCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(KeyCommand::Shutdown),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyCommand::Shutdown),
        KeyCode::Char('p') => Some(KeyCommand::TogglePause),
        KeyCode::Tab | KeyCode::Right => Some(KeyCommand::FocusNext),
        KeyCode::BackTab | KeyCode::Left => Some(KeyCommand::FocusPrev),
        KeyCode::Char(c) => Some(KeyCommand::Char(c)),
        _ => None,
    }
}

/// Hilo que lee el teclado (crossterm es bloqueante) y manda los comandos al
/// loop del pool. Termina cuando se baja `stop` o se cierra el canal.
pub fn spawn_key_reader(
    tx: UnboundedSender<KeyCommand>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match event::poll(KEY_POLL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => break,
            }
            let Ok(Event::Key(key)) = event::read() else {
                continue;
            };
            if let Some(cmd) = map_key(key) {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    })
}
