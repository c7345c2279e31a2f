use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use sysinfo::{System, SystemExt};

use crate::dashboard::{DashboardPlugin, ExtraKeyHandler};
use crate::hooks::PoolHooks;

/// Veces seguidas que un worker puede caerse antes de llegar a `ready`
/// sin que el slot se dé por perdido.
pub const MAX_WORKER_RESTARTS: u32 = 3;

/// Tiempo que se espera a que los workers salgan después del shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const INTERACTIVE_RENDER_INTERVAL: Duration = Duration::from_millis(250);
pub const VIEWER_RENDER_INTERVAL: Duration = Duration::from_secs(2);

/// Líneas de log que se guardan por slot.
pub const SLOT_LOG_CAPACITY: usize = 200;

/// Cantidad de CPUs de la máquina (al menos 1).
pub fn detect_cpu_count() -> usize {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.cpus().len().max(1)
}

/// Tamaño del pool: lo pedido (o CPUs - 1), nunca más workers que tareas,
/// nunca menos de uno.
pub fn compute_pool_size(requested: Option<usize>, task_count: usize, cpu_count: usize) -> usize {
    let wanted = requested
        .filter(|n| *n > 0)
        .unwrap_or_else(|| cpu_count.saturating_sub(1));
    wanted.min(task_count).max(1)
}

/// Todo lo que necesita `run_pool` para una corrida.
pub struct PoolConfig<H: PoolHooks> {
    pub title: String,
    /// Base para los logs por defecto (`<base_dir>/logs/<run_id>`)
    pub base_dir: PathBuf,
    pub run_id: String,
    pub log_dir: PathBuf,
    /// Flag con el que el proceso re-ejecutado sabe que es un worker
    pub child_flag: String,
    pub worker_program: PathBuf,
    /// Argumentos extra antes del flag de worker
    pub worker_args: Vec<String>,
    pub pool_size: usize,
    pub cpu_count: usize,
    pub total_tasks: usize,
    pub hooks: H,
    pub viewer_mode: bool,
    pub plugin: Box<dyn DashboardPlugin<H::Totals>>,
    pub extra_key_handler: Option<ExtraKeyHandler>,
    pub render_interval: Duration,
    /// Espera después del shutdown antes de matar a los workers
    pub shutdown_grace: Duration,
}

impl<H: PoolHooks> PoolConfig<H> {
    pub fn new(
        title: impl Into<String>,
        hooks: H,
        plugin: Box<dyn DashboardPlugin<H::Totals>>,
        worker_program: impl Into<PathBuf>,
        child_flag: impl Into<String>,
    ) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());
        let run_id = uuid::Uuid::new_v4().to_string();
        let log_dir = default_log_dir(&base_dir, &run_id);

        Self {
            title: title.into(),
            base_dir,
            run_id,
            log_dir,
            child_flag: child_flag.into(),
            worker_program: worker_program.into(),
            worker_args: Vec::new(),
            pool_size: 1,
            cpu_count: 1,
            total_tasks: 0,
            hooks,
            viewer_mode: false,
            plugin,
            extra_key_handler: None,
            render_interval: INTERACTIVE_RENDER_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Cambia la base de logs y recalcula el directorio de esta corrida.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self.log_dir = default_log_dir(&self.base_dir, &self.run_id);
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    /// Fija tareas, CPUs y tamaño del pool (ver `compute_pool_size`).
    pub fn sizing(mut self, total_tasks: usize, requested: Option<usize>, cpu_count: usize) -> Self {
        self.total_tasks = total_tasks;
        self.cpu_count = cpu_count;
        self.pool_size = compute_pool_size(requested, total_tasks, cpu_count);
        self
    }

    pub fn viewer_mode(mut self, viewer: bool) -> Self {
        self.viewer_mode = viewer;
        self.render_interval = if viewer {
            VIEWER_RENDER_INTERVAL
        } else {
            INTERACTIVE_RENDER_INTERVAL
        };
        self
    }

    pub fn render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn extra_key_handler(mut self, handler: ExtraKeyHandler) -> Self {
        self.extra_key_handler = Some(handler);
        self
    }
}

pub fn default_log_dir(base_dir: &Path, run_id: &str) -> PathBuf {
    base_dir.join("logs").join(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_pool_size_nunca_supera_las_tareas() {
        assert_eq!(compute_pool_size(Some(8), 3, 16), 3);
        assert_eq!(compute_pool_size(Some(2), 10, 16), 2);
        assert_eq!(compute_pool_size(None, 100, 8), 7);
        assert_eq!(compute_pool_size(None, 2, 8), 2);
    }

    #[test]
    fn compute_pool_size_nunca_baja_de_uno() {
        assert_eq!(compute_pool_size(None, 10, 1), 1);
        assert_eq!(compute_pool_size(Some(0), 10, 1), 1);
        assert_eq!(compute_pool_size(Some(4), 0, 4), 1);
    }

    #[test]
    fn default_log_dir_usa_run_id() {
        let dir = default_log_dir(Path::new("/tmp/base"), "abc");
        assert_eq!(dir, PathBuf::from("/tmp/base/logs/abc"));
    }

    #[test]
    fn detect_cpu_count_es_positivo() {
        assert!(detect_cpu_count() >= 1);
    }
}
