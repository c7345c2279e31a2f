//! Vista del pool para el operador.
//!
//! El loop del master arma un `DashboardSnapshot` inmutable en cada tick y se
//! lo pasa al `Renderer` activo (TUI interactiva o viewer de texto plano).
//! Lo específico de cada comando entra por un `DashboardPlugin`.

pub mod tui;
pub mod viewer;

use anyhow::Result;
use std::{collections::VecDeque, time::Duration};

use crate::hooks::{PoolHooks, SlotProgress};
use crate::state::{PoolState, SlotPhase, WorkerSlot};

/// Líneas del slot enfocado que entran en el snapshot.
pub const FOCUSED_LOG_LINES: usize = 50;

/// Mensajes del pool (teclas, avisos) que se conservan.
pub const POOL_MESSAGE_CAPACITY: usize = 50;

/// Manejador de teclas propio del comando; el texto devuelto se agrega al
/// panel de mensajes del pool.
pub type ExtraKeyHandler = Box<dyn FnMut(char) -> Option<String> + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub index: usize,
    pub phase: SlotPhase,
    pub worker_id: Option<u32>,
    pub task_label: Option<String>,
    pub progress: Option<SlotProgress>,
    pub last_summary: Option<String>,
    pub last_log: Option<String>,
    pub tasks_done: u64,
    pub restarts: u32,
}

impl SlotView {
    fn from_slot<T>(slot: &WorkerSlot<T>) -> Self {
        Self {
            index: slot.index,
            phase: slot.phase,
            worker_id: slot.worker_id,
            task_label: slot.in_flight.as_ref().map(|f| f.label.clone()),
            progress: slot.progress.clone(),
            last_summary: slot.last_summary.clone(),
            last_log: slot.logs.back().cloned(),
            tasks_done: slot.tasks_done,
            restarts: slot.restarts,
        }
    }
}

/// Foto del pool en un instante; los renderers no ven nada más.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot<T> {
    pub title: String,
    pub cpu_count: usize,
    pub pool_size: usize,
    pub total_tasks: usize,
    pub slots: Vec<SlotView>,
    pub focused: usize,
    pub focused_logs: Vec<String>,
    pub pool_messages: Vec<String>,
    pub totals: T,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: usize,
    pub elapsed: Duration,
    pub paused: bool,
    pub draining: bool,
    pub finished: bool,
}

impl<T> DashboardSnapshot<T> {
    pub fn done(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Lo que cada comando aporta a la vista.
pub trait DashboardPlugin<T>: Send {
    fn totals_lines(&self, totals: &T) -> Vec<String>;

    fn slot_detail(&self, slot: &SlotView) -> String {
        let progress = slot
            .progress
            .as_ref()
            .map(format_progress)
            .unwrap_or_default();
        match (&slot.task_label, &slot.last_summary) {
            (Some(label), _) => format!("{} {}", label, progress).trim_end().to_string(),
            (None, Some(summary)) => summary.clone(),
            (None, None) => String::new(),
        }
    }
}

pub trait Renderer<T> {
    fn render(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()>;

    /// Última vista, con el pool ya cerrado.
    fn finish(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    TogglePause,
    FocusNext,
    FocusPrev,
    Shutdown,
    Char(char),
}

/// Estado de la vista que no pertenece al pool.
#[derive(Debug, Default)]
pub struct UiState {
    pub paused: bool,
    pub focused: usize,
    pub pool_messages: VecDeque<String>,
}

impl UiState {
    pub fn push_message(&mut self, message: impl Into<String>) {
        if self.pool_messages.len() == POOL_MESSAGE_CAPACITY {
            self.pool_messages.pop_front();
        }
        self.pool_messages.push_back(message.into());
    }

    pub fn focus_next(&mut self, slot_count: usize) {
        if slot_count > 0 {
            self.focused = (self.focused + 1) % slot_count;
        }
    }

    pub fn focus_prev(&mut self, slot_count: usize) {
        if slot_count > 0 {
            self.focused = (self.focused + slot_count - 1) % slot_count;
        }
    }
}

/// Arma el snapshot a partir del estado del pool y de la vista.
pub fn capture<H: PoolHooks>(
    state: &PoolState<H>,
    ui: &UiState,
    title: &str,
    cpu_count: usize,
    finished: bool,
) -> DashboardSnapshot<H::Totals> {
    let slots: Vec<SlotView> = state.slots().iter().map(SlotView::from_slot).collect();
    let focused = ui.focused.min(slots.len().saturating_sub(1));
    let focused_logs = state
        .slot(focused)
        .map(|s| {
            let skip = s.logs.len().saturating_sub(FOCUSED_LOG_LINES);
            s.logs.iter().skip(skip).cloned().collect()
        })
        .unwrap_or_default();

    DashboardSnapshot {
        title: title.to_string(),
        cpu_count,
        pool_size: slots.len(),
        total_tasks: state.total_tasks,
        slots,
        focused,
        focused_logs,
        pool_messages: ui.pool_messages.iter().cloned().collect(),
        totals: state.totals().clone(),
        completed: state.completed(),
        failed: state.failed(),
        in_flight: state.in_flight(),
        elapsed: state.elapsed(),
        paused: ui.paused,
        draining: state.is_draining(),
        finished,
    }
}

/// 1234 -> "1.2K", 5_600_000 -> "5.6M".
pub fn format_human(num: u64) -> String {
    let n = num as f64;
    if n >= 1_000_000_000.0 {
        format!("{:.1}B", n / 1_000_000_000.0)
    } else if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}K", n / 1_000.0)
    } else {
        format!("{}", num)
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn format_progress(progress: &SlotProgress) -> String {
    match (progress.total, progress.ratio()) {
        (Some(total), Some(ratio)) => format!(
            "{}/{} ({:.0}%)",
            format_human(progress.processed),
            format_human(total),
            ratio * 100.0
        ),
        _ => format!("{} filas", format_human(progress.processed)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_snapshot() -> DashboardSnapshot<u64> {
        DashboardSnapshot {
            title: "chunk-csv".into(),
            cpu_count: 8,
            pool_size: 2,
            total_tasks: 4,
            slots: vec![
                SlotView {
                    index: 0,
                    phase: SlotPhase::Busy,
                    worker_id: Some(0),
                    task_label: Some("ventas.csv".into()),
                    progress: Some(SlotProgress { processed: 12_500, total: None }),
                    last_summary: None,
                    last_log: Some("procesando ventas.csv".into()),
                    tasks_done: 1,
                    restarts: 0,
                },
                SlotView {
                    index: 1,
                    phase: SlotPhase::Idle,
                    worker_id: Some(1),
                    task_label: None,
                    progress: None,
                    last_summary: Some("clientes.csv: 3 chunks".into()),
                    last_log: None,
                    tasks_done: 2,
                    restarts: 1,
                },
            ],
            focused: 0,
            focused_logs: vec!["procesando ventas.csv".into()],
            pool_messages: vec!["salida: /tmp/out".into()],
            totals: 42,
            completed: 2,
            failed: 1,
            in_flight: 1,
            elapsed: Duration::from_secs(3725),
            paused: false,
            draining: false,
            finished: false,
        }
    }

    pub(crate) struct CountPlugin;

    impl DashboardPlugin<u64> for CountPlugin {
        fn totals_lines(&self, totals: &u64) -> Vec<String> {
            vec![format!("filas: {}", totals)]
        }
    }

    #[test]
    fn format_human_usa_sufijos() {
        assert_eq!(format_human(999), "999");
        assert_eq!(format_human(1_234), "1.2K");
        assert_eq!(format_human(5_600_000), "5.6M");
        assert_eq!(format_human(2_000_000_000), "2.0B");
    }

    #[test]
    fn format_elapsed_en_horas_minutos_segundos() {
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_millis(500)), "00:00:00");
    }

    #[test]
    fn format_progress_con_y_sin_total() {
        let with_total = SlotProgress { processed: 50, total: Some(200) };
        assert_eq!(format_progress(&with_total), "50/200 (25%)");
        let without = SlotProgress { processed: 12_500, total: None };
        assert_eq!(format_progress(&without), "12.5K filas");
    }

    #[test]
    fn slot_detail_por_defecto() {
        let snap = sample_snapshot();
        assert_eq!(CountPlugin.slot_detail(&snap.slots[0]), "ventas.csv 12.5K filas");
        assert_eq!(CountPlugin.slot_detail(&snap.slots[1]), "clientes.csv: 3 chunks");
    }

    #[test]
    fn foco_da_la_vuelta() {
        let mut ui = UiState::default();
        ui.focus_prev(3);
        assert_eq!(ui.focused, 2);
        ui.focus_next(3);
        assert_eq!(ui.focused, 0);
        ui.focus_next(0);
        assert_eq!(ui.focused, 0);
    }

    #[test]
    fn mensajes_del_pool_tienen_tope() {
        let mut ui = UiState::default();
        for i in 0..(POOL_MESSAGE_CAPACITY + 5) {
            ui.push_message(format!("m{}", i));
        }
        assert_eq!(ui.pool_messages.len(), POOL_MESSAGE_CAPACITY);
        assert_eq!(ui.pool_messages.front().map(String::as_str), Some("m5"));
    }
}
