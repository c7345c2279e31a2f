pub mod chunk_writer;
pub mod chunker;
pub mod convert;
pub mod discovery;
pub mod protocol;
pub mod results;
pub mod task;

pub use protocol::{decode_line, encode_line, ParentMessage, WorkerMessage};
pub use results::{ProgressSnapshot, TaskResult};
pub use task::{ChunkTask, ConvertTask, FileTask};

/// Variable de entorno con la identidad numérica del worker.
pub const WORKER_ID_ENV: &str = "WORKER_ID";
