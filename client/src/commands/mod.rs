pub mod chunk;
pub mod convert;

use anyhow::{Context, Result};
use master::{
    dashboard::DashboardPlugin, detect_cpu_count, run_pool, ExtraKeyHandler, PoolConfig,
    PoolHooks, PoolOutcome,
};
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};

use crate::cli::{Commands, PoolArgs};
use crate::{logging, WORKER_FLAG};

pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::ChunkCsv(args) => chunk::run(args).await,
        Commands::JsonlToCsv(args) => convert::run(args).await,
    }
}

/// Totales por archivo, compartidos por los comandos de este CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileTotals {
    pub files_ok: u64,
    pub files_failed: u64,
    /// Último conteo de filas reportado por cada archivo
    pub rows_by_file: BTreeMap<String, u64>,
}

impl FileTotals {
    pub fn rows(&self) -> u64 {
        self.rows_by_file.values().sum()
    }

    pub fn record_progress(&mut self, label: &str, processed: u64) {
        self.rows_by_file.insert(label.to_string(), processed);
    }

    /// Acumula un resultado y devuelve el resumen para el slot.
    pub fn record_result(&mut self, result: &common::TaskResult) -> String {
        if result.success {
            self.files_ok += 1;
            let rows = self.rows_by_file.get(&result.label).copied().unwrap_or(0);
            format!("{}: {} filas", result.label, rows)
        } else {
            self.files_failed += 1;
            format!("{}: falló", result.label)
        }
    }
}

/// Ruta absoluta; las relativas se resuelven contra el directorio actual.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("no se pudo leer el directorio actual")?;
    Ok(cwd.join(path))
}

/// Tecla `o`: muestra el directorio de salida en el panel del pool.
pub fn output_dir_key(output_dir: PathBuf) -> ExtraKeyHandler {
    Box::new(move |c| (c == 'o').then(|| format!("salida: {}", output_dir.display())))
}

/// Arma el pool con este mismo binario como worker, lo corre e imprime el
/// resumen final. Devuelve el código de salida.
pub async fn run_command<H: PoolHooks>(
    title: &str,
    hooks: H,
    total_tasks: usize,
    plugin: Box<dyn DashboardPlugin<H::Totals>>,
    pool: &PoolArgs,
    extra_keys: ExtraKeyHandler,
) -> Result<i32> {
    let program = env::current_exe().context("no se pudo ubicar el ejecutable actual")?;
    let config = PoolConfig::new(title, hooks, plugin, program, WORKER_FLAG)
        .sizing(total_tasks, pool.concurrency, detect_cpu_count())
        .viewer_mode(pool.viewer)
        .extra_key_handler(extra_keys);

    logging::init_tracing(pool.viewer, &config.log_dir)?;

    let outcome = run_pool(config).await?;
    print_summary(&outcome);
    Ok(outcome.exit_code())
}

fn print_summary<T>(outcome: &PoolOutcome<T>) {
    println!(
        "{}: {} ok, {} fallidas, {} sin procesar ({} workers, {:.1}s)",
        outcome.title,
        outcome.completed,
        outcome.failed,
        outcome.skipped,
        outcome.pool_size,
        outcome.elapsed.as_secs_f64()
    );
    if outcome.interrupted {
        println!("corrida cortada antes de tiempo por el operador");
    }
    if !outcome.failures.is_empty() {
        println!("tareas fallidas:");
        for failure in &outcome.failures {
            println!("  - {} (worker #{}): {}", failure.label, failure.slot, failure.error);
        }
    }
    println!(
        "logs: {} (inicio {})",
        outcome.log_dir.display(),
        outcome.started_at.format("%Y-%m-%d %H:%M:%S")
    );
}
