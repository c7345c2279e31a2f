//! Pool de procesos worker para trabajos por archivo.
//!
//! `run_pool` lanza la flota, reparte las tareas de los hooks de a una por
//! worker, junta progreso y resultados, dibuja el dashboard y cierra todo
//! cuando la cola se vacía.

pub mod config;
pub mod dashboard;
pub mod handlers;
pub mod hooks;
pub mod monitor;
pub mod state;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{interval, sleep_until, Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::dashboard::{capture, tui, viewer::ViewerRenderer, KeyCommand, Renderer, UiState};
use crate::monitor::{spawn_worker, PoolEvent, WorkerLaunch, WorkerProcess};
use crate::state::{Action, FailedTask, PoolState};

pub use config::{compute_pool_size, detect_cpu_count, PoolConfig};
pub use dashboard::{DashboardSnapshot, ExtraKeyHandler, SlotView};
pub use hooks::{PoolHooks, PostProcessContext, SlotProgress};

/// Resultado de una corrida completa del pool.
#[derive(Debug, Clone)]
pub struct PoolOutcome<T> {
    pub title: String,
    pub totals: T,
    pub completed: u64,
    pub failed: u64,
    /// Tareas que no llegaron a despacharse por un cierre anticipado
    pub skipped: u64,
    pub failures: Vec<FailedTask>,
    pub interrupted: bool,
    pub pool_size: usize,
    pub log_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub elapsed: Duration,
}

impl<T> PoolOutcome<T> {
    /// 1 si alguna tarea falló. Las que quedaron sin despachar por un cierre
    /// pedido no cuentan como fallas.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Procesos vivos del pool, indexados por slot.
struct Fleet {
    launch: WorkerLaunch,
    procs: Vec<Option<WorkerProcess>>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl Fleet {
    fn spawn(&mut self, slot: usize, generation: u64) -> Result<()> {
        let process = spawn_worker(&self.launch, slot, generation, self.events.clone())?;
        info!("slot {} lanzado (pid={:?})", slot, process.pid);
        self.procs[slot] = Some(process);
        Ok(())
    }

    async fn apply<H: PoolHooks>(&mut self, state: &mut PoolState<H>, actions: Vec<Action<H::Task>>) {
        for action in actions {
            match action {
                Action::Send { slot, message } => {
                    let Some(process) = self.procs.get_mut(slot).and_then(Option::as_mut) else {
                        continue;
                    };
                    // si falla, el worker murió: su salida llega como evento
                    if let Err(e) = process.send(&message).await {
                        warn!("slot {}: {:#}", slot, e);
                        state.push_log(slot, format!("[pool] {:#}", e));
                    }
                }
                Action::Respawn { slot } => {
                    self.procs[slot] = None;
                    let generation = state.mark_respawned(slot);
                    warn!("relanzando slot {} (generación {})", slot, generation);
                    if let Err(e) = self.spawn(slot, generation) {
                        warn!("no se pudo relanzar el slot {}: {:#}", slot, e);
                        state.retire(slot, &format!("{:#}", e));
                    }
                }
            }
        }
    }

    /// Mata lo que quede vivo (soltar el proceso lo mata).
    fn kill_all(&mut self) {
        for process in self.procs.iter_mut() {
            process.take();
        }
    }
}

/// Corre el pool hasta que todas las tareas terminan (o se corta antes).
pub async fn run_pool<H: PoolHooks>(config: PoolConfig<H>) -> Result<PoolOutcome<H::Totals>> {
    let PoolConfig {
        title,
        log_dir,
        child_flag,
        worker_program,
        worker_args,
        pool_size,
        cpu_count,
        total_tasks,
        hooks,
        viewer_mode,
        plugin,
        mut extra_key_handler,
        render_interval,
        shutdown_grace,
        ..
    } = config;

    tokio::fs::create_dir_all(&log_dir)
        .await
        .with_context(|| format!("no se pudo crear {}", log_dir.display()))?;

    let started_at = Local::now();
    info!(
        "pool '{}': {} tareas, {} workers ({} CPUs), logs en {}",
        title,
        total_tasks,
        pool_size,
        cpu_count,
        log_dir.display()
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut fleet = Fleet {
        launch: WorkerLaunch {
            program: worker_program,
            args: worker_args,
            child_flag,
            log_dir: log_dir.clone(),
        },
        procs: (0..pool_size).map(|_| None).collect(),
        events: events_tx,
    };
    let mut state = PoolState::new(hooks, pool_size, total_tasks);

    for slot in 0..pool_size {
        fleet
            .spawn(slot, 0)
            .with_context(|| format!("no se pudo lanzar el worker del slot {}", slot))?;
    }

    let (keys_tx, mut keys_rx) = mpsc::unbounded_channel();
    let stop_keys = Arc::new(AtomicBool::new(false));
    let mut renderer: Box<dyn Renderer<H::Totals>> = if viewer_mode {
        drop(keys_tx);
        Box::new(ViewerRenderer::stdout())
    } else {
        let renderer = tui::TuiRenderer::new()?;
        tui::spawn_key_reader(keys_tx, stop_keys.clone());
        Box::new(renderer)
    };
    let mut keys_open = !viewer_mode;

    let mut ui = UiState::default();
    let mut ticker = interval(render_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut deadline: Option<Instant> = None;

    let result = loop {
        if state.is_finished() {
            break Ok(());
        }
        if state.fleet_lost() {
            break Err(anyhow!(
                "todos los workers se cayeron repetidamente; quedan tareas sin procesar"
            ));
        }

        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    break Err(anyhow!("se cerró el canal de eventos del pool"));
                };
                let actions = match event {
                    PoolEvent::Message { slot, generation, message } => {
                        state.handle_message(slot, generation, message)
                    }
                    PoolEvent::Log { slot, line } => {
                        state.push_log(slot, line);
                        Vec::new()
                    }
                    PoolEvent::Exited { slot, generation, status } => {
                        if state.generation(slot) == generation {
                            fleet.procs[slot] = None;
                        }
                        state.worker_exited(slot, generation, status)
                    }
                };
                fleet.apply(&mut state, actions).await;
            }

            key = keys_rx.recv(), if keys_open => {
                match key {
                    Some(cmd) => {
                        handle_key(cmd, &mut state, &mut ui, &mut extra_key_handler);
                        let snapshot = capture(&state, &ui, &title, cpu_count, false);
                        if let Err(e) = renderer.render(&snapshot, plugin.as_ref()) {
                            warn!("error dibujando el dashboard: {:#}", e);
                        }
                    }
                    None => keys_open = false,
                }
            }

            _ = ticker.tick() => {
                if !ui.paused {
                    let snapshot = capture(&state, &ui, &title, cpu_count, false);
                    if let Err(e) = renderer.render(&snapshot, plugin.as_ref()) {
                        warn!("error dibujando el dashboard: {:#}", e);
                    }
                }
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                warn!("los workers no salieron a tiempo, se matan");
                ui.push_message("los workers no salieron a tiempo, se matan");
                fleet.kill_all();
                deadline = None;
            }
        }

        let actions = state.broadcast_shutdown_if_settled();
        if !actions.is_empty() {
            info!("cola terminada, mandando shutdown a {} workers", actions.len());
            deadline = Some(Instant::now() + shutdown_grace);
            fleet.apply(&mut state, actions).await;
        }
    };

    stop_keys.store(true, Ordering::Relaxed);
    fleet.kill_all();

    let snapshot = capture(&state, &ui, &title, cpu_count, true);
    if let Err(e) = renderer.finish(&snapshot, plugin.as_ref()) {
        warn!("error dibujando el dashboard: {:#}", e);
    }
    // restaura la terminal antes de cualquier salida de texto
    drop(renderer);

    result?;

    let elapsed = state.elapsed();
    let skipped = state.skipped();
    if viewer_mode {
        let ctx = PostProcessContext {
            title: &title,
            totals: &state.totals,
            completed: state.completed,
            failed: state.failed,
            skipped,
            failures: &state.failures,
            elapsed,
        };
        state.hooks.post_process(&ctx)?;
    }

    info!(
        "pool '{}' terminado: {} ok, {} fallidas, {} sin despachar en {:?}",
        title, state.completed, state.failed, skipped, elapsed
    );

    Ok(PoolOutcome {
        title,
        totals: state.totals.clone(),
        completed: state.completed,
        failed: state.failed,
        skipped,
        interrupted: state.draining,
        failures: state.failures.clone(),
        pool_size,
        log_dir,
        started_at,
        finished_at: Local::now(),
        elapsed,
    })
}

fn handle_key<H: PoolHooks>(
    cmd: KeyCommand,
    state: &mut PoolState<H>,
    ui: &mut UiState,
    extra: &mut Option<ExtraKeyHandler>,
) {
    let slot_count = state.slots().len();
    match cmd {
        KeyCommand::TogglePause => {
            ui.paused = !ui.paused;
            ui.push_message(if ui.paused { "vista en pausa" } else { "vista reanudada" });
        }
        KeyCommand::FocusNext => ui.focus_next(slot_count),
        KeyCommand::FocusPrev => ui.focus_prev(slot_count),
        KeyCommand::Shutdown => {
            if state.is_draining() {
                ui.push_message("ya se está cerrando, esperando las tareas en curso");
            } else {
                state.request_shutdown();
                ui.push_message("cierre pedido: no se despachan más tareas");
            }
        }
        KeyCommand::Char(c) => {
            if let Some(text) = extra.as_mut().and_then(|handler| handler(c)) {
                ui.push_message(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::CountPlugin;
    use common::TaskResult;
    use std::collections::VecDeque;

    struct Names(VecDeque<String>);

    impl PoolHooks for Names {
        type Task = String;
        type Totals = u64;

        fn next_task(&mut self) -> Option<String> {
            self.0.pop_front()
        }
        fn task_label(&self, task: &String) -> String {
            task.clone()
        }
        fn init_totals(&self) -> u64 {
            0
        }
        fn on_result(&self, totals: &mut u64, result: &TaskResult) -> String {
            *totals += 1;
            result.label.clone()
        }
    }

    fn state_with(n: usize) -> PoolState<Names> {
        let names = (0..n).map(|i| format!("f{}", i)).collect();
        PoolState::new(Names(names), 2, n)
    }

    // workers de mentira con `sh -c`: el flag de worker queda como $0
    fn shell_pool(sub: &str, script: &str, tasks: usize, workers: usize) -> PoolConfig<Names> {
        let log_dir = std::env::temp_dir().join("filepool_pool_tests").join(sub);
        let _ = std::fs::remove_dir_all(&log_dir);
        let names = (0..tasks).map(|i| format!("f{}", i)).collect();
        PoolConfig::new("prueba", Names(names), Box::new(CountPlugin), "sh", "--worker")
            .worker_args(vec!["-c".into(), script.into()])
            .log_dir(log_dir)
            .sizing(tasks, Some(workers), 4)
            .viewer_mode(true)
    }

    #[tokio::test]
    async fn worker_que_se_cae_con_cada_tarea_se_relanza() {
        let script = r#"
            echo "{\"type\":\"ready\",\"worker_id\":$WORKER_ID}"
            read line
            case "$line" in *shutdown*) exit 0 ;; esac
            exit 3
        "#;
        let config = shell_pool("crash", script, 3, 2);

        let outcome = tokio::time::timeout(Duration::from_secs(20), run_pool(config))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.exit_code(), 1);

        let mut labels: Vec<&str> = outcome.failures.iter().map(|f| f.label.as_str()).collect();
        labels.sort();
        assert_eq!(labels, vec!["f0", "f1", "f2"]);
        assert!(outcome
            .failures
            .iter()
            .all(|f| f.error.contains("terminó inesperadamente (código 3)")));
    }

    #[tokio::test]
    async fn worker_que_ignora_shutdown_se_mata_al_vencer_la_espera() {
        // contesta la tarea y después no lee más nada
        let script = r#"
            echo '{"type":"ready","worker_id":0}'
            read line
            echo '{"type":"result","label":"f0","success":true}'
            exec sleep 30
        "#;
        let grace = Duration::from_millis(300);
        let config = shell_pool("grace", script, 1, 1).shutdown_grace(grace);

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(10), run_pool(config))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.exit_code(), 0);
        assert!(started.elapsed() >= grace);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn exit_code_depende_de_las_fallas() {
        let mut outcome = PoolOutcome {
            title: "t".into(),
            totals: 0u64,
            completed: 3,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            interrupted: false,
            pool_size: 1,
            log_dir: PathBuf::from("/tmp"),
            started_at: Local::now(),
            finished_at: Local::now(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(outcome.exit_code(), 0);
        outcome.failed = 1;
        assert_eq!(outcome.exit_code(), 1);
        outcome.failed = 0;
        outcome.skipped = 2;
        outcome.interrupted = true;
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn tecla_de_cierre_deja_de_despachar() {
        let mut state = state_with(4);
        let mut ui = UiState::default();
        handle_key(KeyCommand::Shutdown, &mut state, &mut ui, &mut None);
        assert!(state.is_draining());
        handle_key(KeyCommand::Shutdown, &mut state, &mut ui, &mut None);
        assert_eq!(ui.pool_messages.len(), 2);
        assert!(ui.pool_messages[1].contains("ya se está cerrando"));
    }

    #[test]
    fn teclas_extra_van_al_handler_del_comando() {
        let mut state = state_with(1);
        let mut ui = UiState::default();
        let mut extra: Option<ExtraKeyHandler> = Some(Box::new(|c| {
            (c == 'o').then(|| "salida: /tmp/out".to_string())
        }));

        handle_key(KeyCommand::Char('x'), &mut state, &mut ui, &mut extra);
        assert!(ui.pool_messages.is_empty());
        handle_key(KeyCommand::Char('o'), &mut state, &mut ui, &mut extra);
        assert_eq!(ui.pool_messages.back().map(String::as_str), Some("salida: /tmp/out"));
    }

    #[test]
    fn pausa_y_foco() {
        let mut state = state_with(3);
        let mut ui = UiState::default();
        handle_key(KeyCommand::TogglePause, &mut state, &mut ui, &mut None);
        assert!(ui.paused);
        handle_key(KeyCommand::FocusPrev, &mut state, &mut ui, &mut None);
        assert_eq!(ui.focused, 1);
        handle_key(KeyCommand::TogglePause, &mut state, &mut ui, &mut None);
        assert!(!ui.paused);
    }
}
