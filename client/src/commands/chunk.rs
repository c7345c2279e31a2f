use anyhow::{bail, Result};
use common::{
    chunker::{is_chunk_file, list_chunk_files, threshold_bytes},
    discovery::find_input_files,
    ChunkTask, FileTask, ProgressSnapshot, TaskResult,
};
use master::{dashboard::DashboardPlugin, PoolHooks, PostProcessContext};
use std::{collections::VecDeque, path::PathBuf};
use tracing::{info, warn};

use super::{absolute, output_dir_key, run_command, FileTotals};
use crate::cli::ChunkCsvArgs;

pub const TITLE: &str = "chunk-csv";

/// Una tarea por CSV del directorio. Los chunks de corridas anteriores no
/// se vuelven a partir.
pub fn plan_tasks(args: &ChunkCsvArgs) -> Result<(Vec<FileTask>, PathBuf)> {
    let inputs = find_input_files(&args.directory, "csv")?;
    let discovered = inputs.len();
    let inputs: Vec<PathBuf> = inputs.into_iter().filter(|p| !is_chunk_file(p)).collect();
    if inputs.is_empty() {
        bail!(
            "{} sólo tiene chunks generados ({} archivos), no hay CSV para partir",
            args.directory.display(),
            discovered
        );
    }

    let output_dir = match &args.output_dir {
        Some(dir) => absolute(dir)?,
        None => absolute(&args.directory)?,
    };

    let tasks = inputs
        .into_iter()
        .map(|input_path| {
            FileTask::Chunk(ChunkTask {
                input_path,
                output_dir: output_dir.clone(),
                clear_output_dir: !args.keep_existing,
                chunk_size_mb: args.chunk_size_mb,
            })
        })
        .collect();
    Ok((tasks, output_dir))
}

pub struct ChunkCsvHooks {
    queue: VecDeque<FileTask>,
    stems: Vec<String>,
    output_dir: PathBuf,
}

impl ChunkCsvHooks {
    pub fn new(tasks: Vec<FileTask>, output_dir: PathBuf) -> Self {
        let stems = tasks
            .iter()
            .filter_map(|t| t.input_path().file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .collect();
        Self {
            queue: tasks.into(),
            stems,
            output_dir,
        }
    }

    /// Chunks que quedaron en disco para cada input, en orden.
    pub fn chunk_counts(&self) -> Result<Vec<(String, usize)>> {
        self.stems
            .iter()
            .map(|stem| Ok((stem.clone(), list_chunk_files(&self.output_dir, stem)?.len())))
            .collect()
    }
}

impl PoolHooks for ChunkCsvHooks {
    type Task = FileTask;
    type Totals = FileTotals;

    fn next_task(&mut self) -> Option<FileTask> {
        self.queue.pop_front()
    }

    fn task_label(&self, task: &FileTask) -> String {
        task.label()
    }

    fn init_totals(&self) -> FileTotals {
        FileTotals::default()
    }

    fn on_progress(&self, totals: &mut FileTotals, progress: &ProgressSnapshot) {
        totals.record_progress(&progress.label, progress.processed);
    }

    fn on_result(&self, totals: &mut FileTotals, result: &TaskResult) -> String {
        totals.record_result(result)
    }

    fn post_process(&mut self, ctx: &PostProcessContext<'_, FileTotals>) -> Result<()> {
        let counts = self.chunk_counts()?;
        let chunks: usize = counts.iter().map(|(_, n)| n).sum();
        for (stem, n) in &counts {
            println!("{}: {} chunks", stem, n);
        }
        info!(
            "{}: {} chunks en {} ({} filas)",
            ctx.title,
            chunks,
            self.output_dir.display(),
            ctx.totals.rows()
        );
        if ctx.failed > 0 {
            warn!("{} archivos no se pudieron partir", ctx.failed);
        }
        Ok(())
    }
}

pub struct ChunkPlugin {
    pub chunk_size_mb: f64,
}

impl DashboardPlugin<FileTotals> for ChunkPlugin {
    fn totals_lines(&self, totals: &FileTotals) -> Vec<String> {
        vec![format!(
            "archivos ok {} | fallidos {} | filas {} | chunk {} MB (~{} bytes)",
            totals.files_ok,
            totals.files_failed,
            master::dashboard::format_human(totals.rows()),
            self.chunk_size_mb,
            threshold_bytes(self.chunk_size_mb)
        )]
    }
}

pub async fn run(args: ChunkCsvArgs) -> Result<i32> {
    let (tasks, output_dir) = plan_tasks(&args)?;
    let total = tasks.len();
    let hooks = ChunkCsvHooks::new(tasks, output_dir.clone());
    let plugin = Box::new(ChunkPlugin {
        chunk_size_mb: args.chunk_size_mb,
    });
    run_command(TITLE, hooks, total, plugin, &args.pool, output_dir_key(output_dir)).await
}
