use anyhow::Result;
use common::{discovery::find_input_files, ConvertTask, FileTask, ProgressSnapshot, TaskResult};
use master::{dashboard::DashboardPlugin, PoolHooks, PostProcessContext, SlotView};
use std::{collections::VecDeque, path::PathBuf};
use tracing::info;

use super::{absolute, output_dir_key, run_command, FileTotals};
use crate::cli::JsonlToCsvArgs;

pub const TITLE: &str = "jsonl-to-csv";

pub fn plan_tasks(args: &JsonlToCsvArgs) -> Result<(Vec<FileTask>, PathBuf)> {
    let inputs = find_input_files(&args.directory, "jsonl")?;
    let output_dir = match &args.output_dir {
        Some(dir) => absolute(dir)?,
        None => absolute(&args.directory)?,
    };
    let tasks = inputs
        .into_iter()
        .map(|input_path| {
            FileTask::JsonlToCsv(ConvertTask {
                input_path,
                output_dir: output_dir.clone(),
            })
        })
        .collect();
    Ok((tasks, output_dir))
}

pub struct JsonlToCsvHooks {
    queue: VecDeque<FileTask>,
    outputs: Vec<PathBuf>,
}

impl JsonlToCsvHooks {
    pub fn new(tasks: Vec<FileTask>) -> Self {
        let outputs = tasks
            .iter()
            .filter_map(|t| {
                let stem = t.input_path().file_stem()?;
                Some(t.output_dir().join(format!("{}.csv", stem.to_string_lossy())))
            })
            .collect();
        Self {
            queue: tasks.into(),
            outputs,
        }
    }
}

impl PoolHooks for JsonlToCsvHooks {
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
        let written: Vec<&PathBuf> = self.outputs.iter().filter(|p| p.exists()).collect();
        for path in &written {
            println!("csv: {}", path.display());
        }
        info!(
            "{}: {} de {} CSV generados, {} filas",
            ctx.title,
            written.len(),
            self.outputs.len(),
            ctx.totals.rows()
        );
        Ok(())
    }
}

pub struct ConvertPlugin;

impl DashboardPlugin<FileTotals> for ConvertPlugin {
    fn totals_lines(&self, totals: &FileTotals) -> Vec<String> {
        vec![format!(
            "convertidos {} | fallidos {} | filas {}",
            totals.files_ok,
            totals.files_failed,
            master::dashboard::format_human(totals.rows())
        )]
    }

    /// El total de filas se conoce recién en la segunda pasada.
    fn slot_detail(&self, slot: &SlotView) -> String {
        match (&slot.task_label, &slot.progress) {
            (Some(label), Some(p)) if p.total.is_none() => format!("{} (leyendo columnas)", label),
            (Some(label), Some(p)) => {
                format!("{} -> csv {}", label, master::dashboard::format_progress(p))
            }
            (Some(label), None) => label.clone(),
            (None, _) => slot.last_summary.clone().unwrap_or_default(),
        }
    }
}

pub async fn run(args: JsonlToCsvArgs) -> Result<i32> {
    let (tasks, output_dir) = plan_tasks(&args)?;
    let total = tasks.len();
    let hooks = JsonlToCsvHooks::new(tasks);
    run_command(
        TITLE,
        hooks,
        total,
        Box::new(ConvertPlugin),
        &args.pool,
        output_dir_key(output_dir),
    )
    .await
}
