// master/src/state.rs

use common::ParentMessage;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::config::SLOT_LOG_CAPACITY;
use crate::hooks::{PoolHooks, SlotProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Proceso lanzado, todavía no mandó `ready`
    Starting,
    Idle,
    Busy,
    /// Se le mandó shutdown, esperando que salga
    Stopping,
    Stopped,
    /// Se cayó demasiadas veces seguidas; no se relanza más
    Retired,
}

impl SlotPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotPhase::Starting => "iniciando",
            SlotPhase::Idle => "libre",
            SlotPhase::Busy => "ocupado",
            SlotPhase::Stopping => "cerrando",
            SlotPhase::Stopped => "terminado",
            SlotPhase::Retired => "retirado",
        }
    }

    pub(crate) fn is_gone(self) -> bool {
        matches!(self, SlotPhase::Stopped | SlotPhase::Retired)
    }
}

/// Tarea asignada a un slot y todavía sin resultado.
#[derive(Debug, Clone)]
pub struct InFlight<T> {
    pub task: T,
    pub label: String,
    pub started_at: Instant,
}

/// Estado vivo de un worker.
#[derive(Debug, Clone)]
pub struct WorkerSlot<T> {
    pub index: usize,
    /// Sube cada vez que el slot se relanza; los eventos de procesos
    /// anteriores se descartan comparando contra este número.
    pub generation: u64,
    pub phase: SlotPhase,
    pub worker_id: Option<u32>,
    pub in_flight: Option<InFlight<T>>,
    pub progress: Option<SlotProgress>,
    pub last_summary: Option<String>,
    pub logs: VecDeque<String>,
    pub crash_streak: u32,
    pub restarts: u32,
    pub tasks_done: u64,
}

impl<T> WorkerSlot<T> {
    fn new(index: usize) -> Self {
        Self {
            index,
            generation: 0,
            phase: SlotPhase::Starting,
            worker_id: None,
            in_flight: None,
            progress: None,
            last_summary: None,
            logs: VecDeque::with_capacity(SLOT_LOG_CAPACITY),
            crash_streak: 0,
            restarts: 0,
            tasks_done: 0,
        }
    }

    pub fn push_log(&mut self, line: String) {
        if self.logs.len() == SLOT_LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }
}

/// Tarea que terminó mal, para el resumen final.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTask {
    pub label: String,
    pub error: String,
    pub slot: usize,
}

/// Acción que el loop del pool tiene que ejecutar sobre los procesos.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<T> {
    Send { slot: usize, message: ParentMessage<T> },
    Respawn { slot: usize },
}

/// Estado completo del pool. Lo muta sólo el loop de eventos del master, así
/// que no hay locks: los handlers devuelven `Action`s y el loop las ejecuta.
pub struct PoolState<H: PoolHooks> {
    pub(crate) hooks: H,
    pub(crate) slots: Vec<WorkerSlot<H::Task>>,
    pub(crate) totals: H::Totals,
    pub(crate) total_tasks: usize,
    pub(crate) dispatched: u64,
    pub(crate) completed: u64,
    pub(crate) failed: u64,
    pub(crate) failures: Vec<FailedTask>,
    /// `next_task` ya devolvió `None` (o se pidió cortar)
    pub(crate) queue_exhausted: bool,
    /// El operador pidió terminar antes de tiempo
    pub(crate) draining: bool,
    pub(crate) shutdown_sent: bool,
    pub(crate) started_at: Instant,
}

impl<H: PoolHooks> PoolState<H> {
    pub fn new(hooks: H, pool_size: usize, total_tasks: usize) -> Self {
        let totals = hooks.init_totals();
        Self {
            hooks,
            slots: (0..pool_size).map(WorkerSlot::new).collect(),
            totals,
            total_tasks,
            dispatched: 0,
            completed: 0,
            failed: 0,
            failures: Vec::new(),
            queue_exhausted: false,
            draining: false,
            shutdown_sent: false,
            started_at: Instant::now(),
        }
    }

    pub fn slots(&self) -> &[WorkerSlot<H::Task>] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&WorkerSlot<H::Task>> {
        self.slots.get(index)
    }

    pub fn totals(&self) -> &H::Totals {
        &self.totals
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn failures(&self) -> &[FailedTask] {
        &self.failures
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.in_flight.is_some()).count()
    }

    /// Tareas que nunca llegaron a despacharse (corte anticipado).
    pub fn skipped(&self) -> u64 {
        (self.total_tasks as u64).saturating_sub(self.completed + self.failed)
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn generation(&self, slot: usize) -> u64 {
        self.slots.get(slot).map(|s| s.generation).unwrap_or(0)
    }

    /// ¿El evento viene del proceso actual de ese slot?
    pub(crate) fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.slots
            .get(slot)
            .map(|s| s.generation == generation)
            .unwrap_or(false)
    }

    /// No queda nada por despachar ni nada en vuelo.
    pub fn is_settled(&self) -> bool {
        self.queue_exhausted
            && self
                .slots
                .iter()
                .all(|s| matches!(s.phase, SlotPhase::Idle) || s.phase.is_gone())
    }

    /// Se mandó shutdown y todos los procesos salieron.
    pub fn is_finished(&self) -> bool {
        self.shutdown_sent && self.slots.iter().all(|s| s.phase.is_gone())
    }

    /// Todos los slots quedaron retirados con trabajo pendiente.
    pub fn fleet_lost(&self) -> bool {
        !self.shutdown_sent
            && !self.queue_exhausted
            && self.slots.iter().all(|s| s.phase == SlotPhase::Retired)
    }

    /// Si ya está todo hecho, arma el broadcast de shutdown (una sola vez).
    pub fn broadcast_shutdown_if_settled(&mut self) -> Vec<Action<H::Task>> {
        if self.shutdown_sent || !self.is_settled() {
            return Vec::new();
        }
        self.shutdown_sent = true;

        let mut actions = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.phase == SlotPhase::Idle {
                slot.phase = SlotPhase::Stopping;
                actions.push(Action::Send {
                    slot: slot.index,
                    message: ParentMessage::Shutdown,
                });
            }
        }
        actions
    }

    /// Marca el slot como relanzado y devuelve la nueva generación.
    pub fn mark_respawned(&mut self, index: usize) -> u64 {
        match self.slots.get_mut(index) {
            Some(slot) => {
                slot.generation += 1;
                slot.restarts += 1;
                slot.phase = SlotPhase::Starting;
                slot.worker_id = None;
                slot.progress = None;
                slot.generation
            }
            None => 0,
        }
    }

    /// El slot no se pudo (re)lanzar; no se intenta más.
    pub fn retire(&mut self, index: usize, reason: &str) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.phase = SlotPhase::Retired;
            slot.push_log(format!("[pool] slot retirado: {}", reason));
        }
    }

    /// Los logs se guardan aunque vengan de un proceso anterior del slot:
    /// las últimas líneas de un worker caído explican por qué se cayó.
    pub fn push_log(&mut self, index: usize, line: String) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.push_log(line);
        }
    }
}
