mod cli;
mod commands;
mod logging;

use std::{env, process};
use worker::FileTaskHandler;

/// Flag oculto: el mismo binario, re-ejecutado por el pool, corre como worker.
pub const WORKER_FLAG: &str = "--filepool-worker";

#[tokio::main]
async fn main() {
    let code = if env::args().skip(1).any(|a| a == WORKER_FLAG) {
        match worker::run(FileTaskHandler).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("worker: {:#}", e);
                2
            }
        }
    } else {
        cli::run().await
    };
    process::exit(code);
}
