use anyhow::Result;
use common::{ProgressSnapshot, TaskResult};
use serde::Serialize;
use std::time::Duration;

use crate::state::FailedTask;

/// Progreso de la tarea que está corriendo en un slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotProgress {
    pub processed: u64,
    pub total: Option<u64>,
}

impl SlotProgress {
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Lo que recibe `post_process` al final de una corrida.
pub struct PostProcessContext<'a, T> {
    pub title: &'a str,
    pub totals: &'a T,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub failures: &'a [FailedTask],
    pub elapsed: Duration,
}

/// Puntos de extensión de un comando sobre el pool genérico.
///
/// El pool nunca mira adentro de una tarea: sólo la serializa, la etiqueta
/// con `task_label` y le pasa los resultados a estos hooks.
pub trait PoolHooks: Send + 'static {
    type Task: Serialize + Clone + Send + 'static;
    type Totals: Clone + Send + 'static;

    /// Próxima tarea de la cola, en orden FIFO. `None` = cola vacía.
    fn next_task(&mut self) -> Option<Self::Task>;

    fn task_label(&self, task: &Self::Task) -> String;

    fn init_totals(&self) -> Self::Totals;

    fn init_slot_progress(&self, _task: &Self::Task) -> SlotProgress {
        SlotProgress::default()
    }

    fn on_progress(&self, _totals: &mut Self::Totals, _progress: &ProgressSnapshot) {}

    /// Acumula un resultado y devuelve el resumen que se muestra en el slot.
    fn on_result(&self, totals: &mut Self::Totals, result: &TaskResult) -> String;

    /// Sólo en modo viewer, después de que terminaron todas las tareas.
    fn post_process(&mut self, _ctx: &PostProcessContext<'_, Self::Totals>) -> Result<()> {
        Ok(())
    }
}
