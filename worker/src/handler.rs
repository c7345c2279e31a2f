use anyhow::Result;
use common::{chunker, convert, FileTask};
use tracing::info;

use crate::worker::TaskHandler;

/// Handler de las tareas de archivo que conoce el CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTaskHandler;

impl TaskHandler for FileTaskHandler {
    type Task = FileTask;

    fn label(&self, task: &FileTask) -> String {
        task.label()
    }

    fn handle(&self, task: FileTask, progress: &mut dyn FnMut(u64, Option<u64>)) -> Result<()> {
        match task {
            FileTask::Chunk(t) => {
                let summary = chunker::chunk_file(
                    &t.input_path,
                    &t.output_dir,
                    t.clear_output_dir,
                    t.chunk_size_mb,
                    progress,
                )?;
                info!(
                    "{}: {} chunks en {}",
                    t.input_path.display(),
                    summary.chunk_paths.len(),
                    t.output_dir.display()
                );
            }
            FileTask::JsonlToCsv(t) => {
                let summary = convert::jsonl_to_csv(&t.input_path, &t.output_dir, progress)?;
                info!(
                    "{} -> {}",
                    t.input_path.display(),
                    summary.output_path.display()
                );
            }
        }
        Ok(())
    }
}
