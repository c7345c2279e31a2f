//! Protocolo master <-> worker.
//!
//! Un mensaje por línea, JSON con etiqueta `type`. El master escribe en el
//! stdin del worker y lee su stdout; el stderr del worker queda para logs.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::results::{ProgressSnapshot, TaskResult};

/// Mensajes del master hacia un worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage<T> {
    Task { task: T },
    Shutdown,
}

/// Mensajes de un worker hacia el master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// El worker arrancó y está libre (se manda una sola vez)
    Ready { worker_id: u32 },
    Progress(ProgressSnapshot),
    /// Único mensaje que libera el slot para una nueva tarea
    Result(TaskResult),
}

/// Serializa un mensaje como una línea terminada en `\n`.
///
/// serde_json escapa los saltos de línea dentro de strings, así que un
/// mensaje nunca ocupa más de una línea.
pub fn encode_line<M: Serialize>(msg: &M) -> Result<String> {
    let mut line = serde_json::to_string(msg).context("error serializando mensaje IPC")?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<M: DeserializeOwned>(line: &str) -> Result<M> {
    serde_json::from_str(line.trim_end())
        .with_context(|| format!("mensaje IPC inválido: {}", line.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ChunkTask, FileTask};
    use std::path::PathBuf;

    #[test]
    fn encode_line_usa_tag_type_y_termina_en_newline() {
        let line = encode_line(&WorkerMessage::Ready { worker_id: 3 }).unwrap();
        assert_eq!(line, "{\"type\":\"ready\",\"worker_id\":3}\n");

        let line = encode_line(&ParentMessage::<FileTask>::Shutdown).unwrap();
        assert_eq!(line, "{\"type\":\"shutdown\"}\n");
    }

    #[test]
    fn error_con_saltos_de_linea_ocupa_una_sola_linea() {
        let msg = WorkerMessage::Result(TaskResult::failed("a.csv", "linea 1\nlinea 2"));
        let line = encode_line(&msg).unwrap();

        assert_eq!(line.matches('\n').count(), 1);
        let back: WorkerMessage = decode_line(&line).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn decode_line_lee_tarea_del_master() {
        let raw = r#"{"type":"task","task":{"kind":"chunk","input_path":"/in/a.csv","output_dir":"/out","clear_output_dir":false,"chunk_size_mb":1.5}}"#;
        let msg: ParentMessage<FileTask> = decode_line(raw).unwrap();

        assert_eq!(
            msg,
            ParentMessage::Task {
                task: FileTask::Chunk(ChunkTask {
                    input_path: PathBuf::from("/in/a.csv"),
                    output_dir: PathBuf::from("/out"),
                    clear_output_dir: false,
                    chunk_size_mb: 1.5,
                })
            }
        );
    }

    #[test]
    fn progress_sin_total_omite_el_campo() {
        let msg = WorkerMessage::Progress(ProgressSnapshot {
            label: "a.csv".into(),
            processed: 10,
            total: None,
        });
        let line = encode_line(&msg).unwrap();
        assert!(!line.contains("total"));
    }

    #[test]
    fn decode_line_rechaza_basura() {
        let res: Result<WorkerMessage> = decode_line("hola mundo");
        assert!(res.is_err());
    }
}
