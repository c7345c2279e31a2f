//! Lanzamiento y vigilancia de los procesos worker.
//!
//! Cada worker tiene dos tareas de tokio que sólo leen: una para stdout
//! (protocolo) y otra para stderr (logs). Todo lo que leen se manda como
//! `PoolEvent` al loop del master, que es el único dueño del estado.

use anyhow::{Context, Result};
use common::{decode_line, encode_line, ParentMessage, WorkerMessage, WORKER_ID_ENV};
use serde::Serialize;
use std::{path::PathBuf, process::Stdio};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{mpsc::UnboundedSender, oneshot},
};
use tracing::{debug, warn};

/// Cómo lanzar un worker.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub child_flag: String,
    pub log_dir: PathBuf,
}

#[derive(Debug)]
pub enum PoolEvent {
    Message {
        slot: usize,
        generation: u64,
        message: WorkerMessage,
    },
    Log {
        slot: usize,
        line: String,
    },
    Exited {
        slot: usize,
        generation: u64,
        status: Option<i32>,
    },
}

/// Extremo de escritura hacia un worker vivo. Soltarlo mata el proceso si
/// todavía no salió.
pub struct WorkerProcess {
    stdin: ChildStdin,
    pub pid: Option<u32>,
    _kill: oneshot::Sender<()>,
}

impl WorkerProcess {
    pub async fn send<T: Serialize>(&mut self, message: &ParentMessage<T>) -> Result<()> {
        let line = encode_line(message)?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("no se pudo escribir al worker")?;
        self.stdin.flush().await.context("no se pudo escribir al worker")?;
        Ok(())
    }
}

pub fn worker_log_path(log_dir: &std::path::Path, slot: usize) -> PathBuf {
    log_dir.join(format!("worker-{}.log", slot))
}

/// Lanza el worker de un slot y engancha sus lectores al canal de eventos.
pub fn spawn_worker(
    launch: &WorkerLaunch,
    slot: usize,
    generation: u64,
    events: UnboundedSender<PoolEvent>,
) -> Result<WorkerProcess> {
    let mut child = Command::new(&launch.program)
        .args(&launch.args)
        .arg(&launch.child_flag)
        .env(WORKER_ID_ENV, slot.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("no se pudo lanzar {}", launch.program.display()))?;

    let pid = child.id();
    let stdin = child.stdin.take().context("el worker no tiene stdin")?;
    let stdout = child.stdout.take().context("el worker no tiene stdout")?;
    let stderr = child.stderr.take().context("el worker no tiene stderr")?;

    debug!("slot {} lanzado (pid={:?}, generación {})", slot, pid, generation);

    let log_path = worker_log_path(&launch.log_dir, slot);
    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(forward_stderr(slot, stderr, log_path, events.clone()));
    tokio::spawn(supervise(slot, generation, stdout, child, kill_rx, events));

    Ok(WorkerProcess {
        stdin,
        pid,
        _kill: kill_tx,
    })
}

/// Sigue al proceso hasta que cierra stdout o lo sueltan desde el master, y
/// reporta la salida.
async fn supervise(
    slot: usize,
    generation: u64,
    stdout: ChildStdout,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    events: UnboundedSender<PoolEvent>,
) {
    let killed = tokio::select! {
        _ = forward_stdout(slot, generation, stdout, &events) => false,
        _ = &mut kill_rx => true,
    };
    if killed {
        debug!("slot {}: se mata el worker (generación {})", slot, generation);
        let _ = child.start_kill();
    }

    let status = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("slot {}: no se pudo esperar al worker: {}", slot, e);
            None
        }
    };
    let _ = events.send(PoolEvent::Exited {
        slot,
        generation,
        status,
    });
}

/// Lee el protocolo del worker hasta que cierra stdout.
async fn forward_stdout(
    slot: usize,
    generation: u64,
    stdout: ChildStdout,
    events: &UnboundedSender<PoolEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let event = match decode_line::<WorkerMessage>(&line) {
                    Ok(message) => PoolEvent::Message {
                        slot,
                        generation,
                        message,
                    },
                    // algo escribió en stdout sin pasar por el protocolo
                    Err(_) => PoolEvent::Log {
                        slot,
                        line: format!("[stdout] {}", line),
                    },
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("slot {}: error leyendo stdout del worker: {}", slot, e);
                return;
            }
        }
    }
}

/// Copia el stderr del worker al ring buffer del slot y a su archivo de log.
async fn forward_stderr(
    slot: usize,
    stderr: ChildStderr,
    log_path: PathBuf,
    events: UnboundedSender<PoolEvent>,
) {
    let mut log_file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            warn!("no se pudo abrir {}: {}", log_path.display(), e);
            None
        }
    };

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(file) = log_file.as_mut() {
            let written = file.write_all(line.as_bytes()).await;
            let newline = file.write_all(b"\n").await;
            if written.is_err() || newline.is_err() {
                warn!("no se pudo escribir en {}", log_path.display());
                log_file = None;
            }
        }
        if events.send(PoolEvent::Log { slot, line }).is_err() {
            break;
        }
    }

    if let Some(mut file) = log_file {
        let _ = file.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::Duration};
    use tokio::sync::mpsc;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("filepool_monitor_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    // con `sh -c`, el flag de worker queda como $0 y no molesta
    fn shell(script: &str, log_dir: PathBuf) -> WorkerLaunch {
        WorkerLaunch {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            child_flag: "--worker".into(),
            log_dir,
        }
    }

    #[tokio::test]
    async fn eventos_de_un_worker_que_sale_solo() {
        let dir = temp_dir("sale_solo");
        let script = r#"echo '{"type":"ready","worker_id":7}'; echo hola >&2; echo basura"#;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _process = spawn_worker(&shell(script, dir.clone()), 3, 5, tx).unwrap();

        let mut messages = Vec::new();
        let mut logs = Vec::new();
        let mut exit = None;
        tokio::time::timeout(Duration::from_secs(10), async {
            while exit.is_none() || !logs.iter().any(|l: &String| l == "hola") {
                match rx.recv().await {
                    Some(PoolEvent::Message { slot, generation, message }) => {
                        assert_eq!((slot, generation), (3, 5));
                        messages.push(message);
                    }
                    Some(PoolEvent::Log { line, .. }) => logs.push(line),
                    Some(PoolEvent::Exited { generation, status, .. }) => {
                        exit = Some((generation, status))
                    }
                    None => break,
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(messages, vec![WorkerMessage::Ready { worker_id: 7 }]);
        assert!(logs.contains(&"[stdout] basura".to_string()));
        assert_eq!(exit, Some((5, Some(0))));

        // el stderr también queda en el log del slot
        let mut content = String::new();
        for _ in 0..50 {
            content = fs::read_to_string(worker_log_path(&dir, 3)).unwrap_or_default();
            if content.contains("hola") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(content, "hola\n");
    }

    #[tokio::test]
    async fn worker_id_llega_por_el_entorno() {
        let dir = temp_dir("worker_id");
        let script = r#"echo "{\"type\":\"ready\",\"worker_id\":$WORKER_ID}""#;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _process = spawn_worker(&shell(script, dir), 4, 0, tx).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        match event {
            Some(PoolEvent::Message { message, .. }) => {
                assert_eq!(message, WorkerMessage::Ready { worker_id: 4 })
            }
            other => panic!("evento inesperado: {:?}", other),
        }
    }

    #[tokio::test]
    async fn soltar_el_proceso_lo_mata() {
        let dir = temp_dir("soltar");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let process = spawn_worker(&shell("sleep 30", dir), 0, 2, tx).unwrap();
        drop(process);

        let event = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(PoolEvent::Exited { generation, status, .. }) => break Some((generation, status)),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .unwrap();
        // muerto por señal: no hay código de salida
        assert_eq!(event, Some((2, None)));
    }

    #[tokio::test]
    async fn send_escribe_una_linea_por_mensaje() {
        let dir = temp_dir("send");
        // el worker de mentira devuelve por stderr lo que recibe
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = spawn_worker(&shell("read line; echo \"$line\" >&2", dir), 1, 0, tx).unwrap();
        process
            .send(&ParentMessage::<String>::Shutdown)
            .await
            .unwrap();

        let line = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(PoolEvent::Log { line, .. }) => break Some(line),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(line.as_deref(), Some(r#"{"type":"shutdown"}"#));
    }
}
