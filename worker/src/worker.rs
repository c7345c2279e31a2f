use anyhow::{Context, Result};
use common::{
    decode_line, encode_line, ParentMessage, ProgressSnapshot, TaskResult, WorkerMessage,
    WORKER_ID_ENV,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{env, path::Path, sync::Arc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Código de salida cuando el master cierra el stdin sin mandar shutdown.
pub const EXIT_PARENT_GONE: i32 = 2;

/// Lo que sabe hacer un worker con una tarea.
///
/// `handle` corre en el pool de hilos bloqueantes de tokio, así que puede
/// hacer I/O síncrona sin frenar la lectura de mensajes.
pub trait TaskHandler: Send + Sync + 'static {
    type Task: DeserializeOwned + Send + 'static;

    fn label(&self, task: &Self::Task) -> String;

    fn handle(
        &self,
        task: Self::Task,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<()>;
}

/// Cómo terminó el loop de mensajes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    ParentGone,
}

impl LoopExit {
    pub fn exit_code(self) -> i32 {
        match self {
            LoopExit::Shutdown => 0,
            LoopExit::ParentGone => EXIT_PARENT_GONE,
        }
    }
}

/// Identidad del worker, desde WORKER_ID (0 si no está o no es un número).
pub fn worker_id_from_env() -> u32 {
    env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0)
}

/// Punto de entrada del proceso worker: stdin/stdout son el canal con el
/// master, los logs van a stderr. Devuelve el código de salida del proceso.
pub async fn run<H: TaskHandler>(handler: H) -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    let worker_id = worker_id_from_env();
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    let exit = run_loop(Arc::new(handler), worker_id, stdin, stdout).await?;
    Ok(exit.exit_code())
}

/// Loop principal del worker.
/// - Anuncia `ready` una sola vez.
/// - Por cada `task` corre el handler y responde con `result`.
/// - Un error de la tarea no termina el loop; sólo `shutdown` o EOF.
pub async fn run_loop<H, R, W>(
    handler: Arc<H>,
    worker_id: u32,
    reader: R,
    mut writer: W,
) -> Result<LoopExit>
where
    H: TaskHandler,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("worker {} listo", worker_id);
    send(&mut writer, &WorkerMessage::Ready { worker_id }).await?;

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("error leyendo del master")? {
        if line.trim().is_empty() {
            continue;
        }

        let msg: ParentMessage<H::Task> = match decode_line(&line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("worker {}: {:#}", worker_id, e);
                // una tarea ilegible igual se contesta, si no el slot queda ocupado
                if let Some(label) = unreadable_task_label(&line) {
                    let result = TaskResult::failed(label, format!("tarea ilegible: {:#}", e));
                    send(&mut writer, &WorkerMessage::Result(result)).await?;
                }
                continue;
            }
        };

        match msg {
            ParentMessage::Task { task } => {
                let label = handler.label(&task);
                info!("worker {} tomó tarea {}", worker_id, label);

                let result = execute_task(handler.clone(), task, &label, &mut writer).await?;
                match &result.error {
                    None => info!("worker {} terminó {}", worker_id, label),
                    Some(err) => warn!("worker {}: tarea {} falló: {}", worker_id, label, err),
                }
                send(&mut writer, &WorkerMessage::Result(result)).await?;
            }
            ParentMessage::Shutdown => {
                info!("worker {} recibió shutdown", worker_id);
                return Ok(LoopExit::Shutdown);
            }
        }
    }

    warn!("worker {}: el master cerró el canal", worker_id);
    Ok(LoopExit::ParentGone)
}

/// Corre una tarea en un hilo bloqueante y reenvía su progreso mientras tanto.
async fn execute_task<H, W>(
    handler: Arc<H>,
    task: H::Task,
    label: &str,
    writer: &mut W,
) -> Result<TaskResult>
where
    H: TaskHandler,
    W: AsyncWrite + Unpin,
{
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(u64, Option<u64>)>();

    let mut job = tokio::task::spawn_blocking(move || {
        let mut report = |processed: u64, total: Option<u64>| {
            // si el receptor ya no está, el progreso simplemente se descarta
            let _ = progress_tx.send((processed, total));
        };
        handler.handle(task, &mut report)
    });

    let outcome = loop {
        tokio::select! {
            biased;
            Some((processed, total)) = progress_rx.recv() => {
                let snapshot = ProgressSnapshot { label: label.to_string(), processed, total };
                send(writer, &WorkerMessage::Progress(snapshot)).await?;
            }
            joined = &mut job => break joined,
        }
    };

    // progreso que quedó en el canal cuando terminó la tarea
    while let Ok((processed, total)) = progress_rx.try_recv() {
        let snapshot = ProgressSnapshot {
            label: label.to_string(),
            processed,
            total,
        };
        send(writer, &WorkerMessage::Progress(snapshot)).await?;
    }

    Ok(match outcome {
        Ok(Ok(())) => TaskResult::ok(label),
        Ok(Err(e)) => TaskResult::failed(label, format!("{:#}", e)),
        Err(e) if e.is_panic() => TaskResult::failed(label, format!("panic en la tarea: {}", e)),
        Err(e) => TaskResult::failed(label, format!("la tarea no terminó: {}", e)),
    })
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, msg: &WorkerMessage) -> Result<()> {
    let line = encode_line(msg)?;
    writer
        .write_all(line.as_bytes())
        .await
        .context("error escribiendo al master")?;
    writer.flush().await.context("error escribiendo al master")?;
    Ok(())
}

/// Si la línea es un mensaje `task` (aunque no se pueda decodificar la
/// tarea), una etiqueta para reportarla: el nombre del archivo si está.
fn unreadable_task_label(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("task") {
        return None;
    }
    let label = value
        .pointer("/task/input_path")
        .and_then(Value::as_str)
        .and_then(|p| Path::new(p).file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "tarea".to_string());
    Some(label)
}
