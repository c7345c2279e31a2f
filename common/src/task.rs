use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unidad de trabajo que el master le entrega a un worker.
///
/// Viaja serializada dentro de `ParentMessage::Task`; el worker decide el
/// handler según `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileTask {
    Chunk(ChunkTask),
    JsonlToCsv(ConvertTask),
}

/// Partir un CSV grande en chunks acotados por tamaño.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTask {
    /// Ruta absoluta del CSV de entrada
    pub input_path: PathBuf,
    /// Directorio donde se escriben los `<stem>_chunk_NNNN.csv`
    pub output_dir: PathBuf,
    /// Borrar chunks previos de este mismo input antes de escribir
    pub clear_output_dir: bool,
    /// Tamaño objetivo de cada chunk, en megabytes
    pub chunk_size_mb: f64,
}

/// Convertir un archivo JSONL (un objeto por línea) a CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertTask {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
}

impl FileTask {
    pub fn input_path(&self) -> &Path {
        match self {
            FileTask::Chunk(t) => &t.input_path,
            FileTask::JsonlToCsv(t) => &t.input_path,
        }
    }

    pub fn output_dir(&self) -> &Path {
        match self {
            FileTask::Chunk(t) => &t.output_dir,
            FileTask::JsonlToCsv(t) => &t.output_dir,
        }
    }

    /// Etiqueta para logs y dashboard: el nombre del archivo de entrada.
    pub fn label(&self) -> String {
        file_label(self.input_path())
    }
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
