use common::{ParentMessage, ProgressSnapshot, TaskResult, WorkerMessage};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::MAX_WORKER_RESTARTS;
use crate::hooks::PoolHooks;
use crate::state::{Action, FailedTask, InFlight, PoolState, SlotPhase};

/* ---------------- eventos que llegan de los workers ---------------- */

impl<H: PoolHooks> PoolState<H> {
    /// Despacha un mensaje de un worker. Los eventos de un proceso que ya
    /// fue reemplazado se ignoran.
    pub fn handle_message(
        &mut self,
        slot: usize,
        generation: u64,
        message: WorkerMessage,
    ) -> Vec<Action<H::Task>> {
        if !self.is_current(slot, generation) {
            return Vec::new();
        }
        match message {
            WorkerMessage::Ready { worker_id } => self.worker_ready(slot, worker_id),
            WorkerMessage::Progress(snapshot) => {
                self.record_progress(slot, snapshot);
                Vec::new()
            }
            WorkerMessage::Result(result) => self.complete_task(slot, result),
        }
    }

    pub fn worker_ready(&mut self, slot: usize, worker_id: u32) -> Vec<Action<H::Task>> {
        let Some(s) = self.slots.get_mut(slot) else {
            return Vec::new();
        };
        if s.phase != SlotPhase::Starting {
            warn!("slot {} mandó ready estando {}", slot, s.phase.as_str());
            return Vec::new();
        }
        info!("worker {} listo en slot {}", worker_id, slot);
        s.worker_id = Some(worker_id);
        s.crash_streak = 0;
        s.phase = SlotPhase::Idle;
        self.assign_task(slot)
    }

    /// Le da al slot la próxima tarea de la cola, si la hay.
    pub fn assign_task(&mut self, slot: usize) -> Vec<Action<H::Task>> {
        let Some(s) = self.slots.get(slot) else {
            return Vec::new();
        };
        // una tarea por slot: nunca se despacha sobre una que sigue en vuelo
        if s.in_flight.is_some() || s.phase != SlotPhase::Idle {
            return Vec::new();
        }

        if self.shutdown_sent {
            // llegó tarde al broadcast (p.ej. un slot relanzado)
            self.slots[slot].phase = SlotPhase::Stopping;
            return vec![Action::Send {
                slot,
                message: ParentMessage::Shutdown,
            }];
        }

        if self.queue_exhausted || self.draining {
            return Vec::new();
        }

        let Some(task) = self.hooks.next_task() else {
            info!("cola vacía, slot {} queda libre", slot);
            self.queue_exhausted = true;
            return Vec::new();
        };

        let label = self.hooks.task_label(&task);
        let progress = self.hooks.init_slot_progress(&task);
        self.dispatched += 1;
        info!(
            "asignando tarea {} al slot {} ({}/{})",
            label, slot, self.dispatched, self.total_tasks
        );

        let s = &mut self.slots[slot];
        s.phase = SlotPhase::Busy;
        s.progress = Some(progress);
        s.in_flight = Some(InFlight {
            task: task.clone(),
            label,
            started_at: Instant::now(),
        });

        vec![Action::Send {
            slot,
            message: ParentMessage::Task { task },
        }]
    }

    pub fn record_progress(&mut self, slot: usize, snapshot: ProgressSnapshot) {
        let Some(s) = self.slots.get_mut(slot) else {
            return;
        };
        match &s.in_flight {
            Some(inflight) if inflight.label == snapshot.label => {}
            _ => {
                warn!("progreso de {} en slot {} sin tarea en vuelo", snapshot.label, slot);
                return;
            }
        }
        let progress = s.progress.get_or_insert_with(Default::default);
        progress.processed = snapshot.processed;
        if snapshot.total.is_some() {
            progress.total = snapshot.total;
        }
        self.hooks.on_progress(&mut self.totals, &snapshot);
    }

    /// El worker reportó el resultado: se acumula y el slot queda libre para
    /// la próxima tarea.
    pub fn complete_task(&mut self, slot: usize, result: TaskResult) -> Vec<Action<H::Task>> {
        let Some(s) = self.slots.get_mut(slot) else {
            return Vec::new();
        };
        let Some(inflight) = s.in_flight.take() else {
            warn!("resultado de {} en slot {} sin tarea en vuelo", result.label, slot);
            return Vec::new();
        };
        if inflight.label != result.label {
            warn!(
                "slot {} reportó {} pero tenía {}",
                slot, result.label, inflight.label
            );
        }
        info!(
            "slot {} terminó {} en {:?} (ok={})",
            slot,
            inflight.label,
            inflight.started_at.elapsed(),
            result.success
        );

        s.phase = SlotPhase::Idle;
        s.tasks_done += 1;
        let result = TaskResult {
            label: inflight.label,
            ..result
        };
        self.record_result(slot, &result);
        self.assign_task(slot)
    }

    /// El proceso del slot salió. Si tenía una tarea, cuenta como fallida.
    pub fn worker_exited(
        &mut self,
        slot: usize,
        generation: u64,
        status: Option<i32>,
    ) -> Vec<Action<H::Task>> {
        if !self.is_current(slot, generation) {
            return Vec::new();
        }
        let shutdown_sent = self.shutdown_sent;
        let queue_exhausted = self.queue_exhausted || self.draining;
        let Some(s) = self.slots.get_mut(slot) else {
            return Vec::new();
        };
        let status_text = status
            .map(|c| format!("código {}", c))
            .unwrap_or_else(|| "señal".to_string());

        if s.phase == SlotPhase::Stopping {
            info!("worker del slot {} terminó ({})", slot, status_text);
            s.phase = SlotPhase::Stopped;
            return Vec::new();
        }
        if s.phase.is_gone() {
            return Vec::new();
        }

        warn!(
            "worker del slot {} terminó inesperadamente ({}) estando {}",
            slot,
            status_text,
            s.phase.as_str()
        );
        s.crash_streak += 1;
        s.progress = None;
        let lost = s.in_flight.take();
        let crash_streak = s.crash_streak;

        if let Some(inflight) = lost {
            let result = TaskResult::failed(
                inflight.label,
                format!("el worker terminó inesperadamente ({})", status_text),
            );
            self.record_result(slot, &result);
        }

        let s = &mut self.slots[slot];
        if shutdown_sent || queue_exhausted {
            s.phase = SlotPhase::Stopped;
            return Vec::new();
        }
        if crash_streak > MAX_WORKER_RESTARTS {
            warn!(
                "slot {} se cayó {} veces seguidas, no se relanza",
                slot, crash_streak
            );
            s.phase = SlotPhase::Retired;
            return Vec::new();
        }
        vec![Action::Respawn { slot }]
    }

    /// Corte anticipado pedido por el operador: no se despacha nada más y
    /// lo que está en vuelo termina normalmente.
    pub fn request_shutdown(&mut self) {
        if !self.draining {
            info!("cierre anticipado pedido, se dejan de despachar tareas");
        }
        self.draining = true;
        self.queue_exhausted = true;
    }

    fn record_result(&mut self, slot: usize, result: &TaskResult) {
        if result.success {
            self.completed += 1;
        } else {
            self.failed += 1;
            self.failures.push(FailedTask {
                label: result.label.clone(),
                error: result.error.clone().unwrap_or_default(),
                slot,
            });
        }
        let summary = self.hooks.on_result(&mut self.totals, result);
        if let Some(s) = self.slots.get_mut(slot) {
            s.last_summary = Some(summary);
        }
    }
}
