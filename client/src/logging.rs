use anyhow::{anyhow, Context, Result};
use std::{fs::File, path::Path, sync::Mutex};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "filepool=info,filepool_master=info,filepool_worker=info,filepool_common=info";

pub const POOL_LOG_FILE: &str = "pool.log";

/// En modo viewer los logs van a stderr; en modo interactivo la terminal es
/// del dashboard, así que van a `<log_dir>/pool.log`.
pub fn init_tracing(viewer: bool, log_dir: &Path) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let init = if viewer {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
    } else {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("no se pudo crear {}", log_dir.display()))?;
        let path = log_dir.join(POOL_LOG_FILE);
        let file =
            File::create(&path).with_context(|| format!("no se pudo crear {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .try_init()
    };
    init.map_err(|e| anyhow!("no se pudo iniciar el logging: {}", e))
}
