use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

pub const DEFAULT_CHUNK_SIZE_MB: f64 = 10.0;

#[derive(Parser)]
#[command(name = "filepool")]
#[command(about = "Procesa directorios de archivos en paralelo con un pool de workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parte cada CSV del directorio en chunks de tamaño acotado
    ChunkCsv(ChunkCsvArgs),
    /// Convierte cada JSONL del directorio en un CSV
    JsonlToCsv(JsonlToCsvArgs),
}

/// Opciones del pool, comunes a todos los comandos.
#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Cantidad de workers (por defecto CPUs - 1)
    #[arg(long, env = "FILEPOOL_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Salida en texto plano en vez del dashboard interactivo
    #[arg(long)]
    pub viewer: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ChunkCsvArgs {
    /// Directorio con los CSV de entrada
    #[arg(long, value_name = "DIR")]
    pub directory: PathBuf,

    /// Directorio de salida (por defecto el de entrada)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Tamaño objetivo de cada chunk, en MB
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE_MB, value_parser = parse_positive_mb)]
    pub chunk_size_mb: f64,

    /// No borrar los chunks de una corrida anterior
    #[arg(long)]
    pub keep_existing: bool,

    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Args, Debug, Clone)]
pub struct JsonlToCsvArgs {
    /// Directorio con los JSONL de entrada
    #[arg(long, value_name = "DIR")]
    pub directory: PathBuf,

    /// Directorio de salida (por defecto el de entrada)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub pool: PoolArgs,
}

fn parse_positive_mb(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' no es un número", s))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("el tamaño tiene que ser mayor a 0 (se pasó {})", s));
    }
    Ok(value)
}

/// Corre el comando pedido y devuelve el código de salida del proceso.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match commands::dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_positive_mb_acepta_fracciones() {
        assert_eq!(parse_positive_mb("0.5"), Ok(0.5));
        assert_eq!(parse_positive_mb("10"), Ok(10.0));
    }

    #[test]
    fn parse_positive_mb_rechaza_cero_negativos_y_basura() {
        assert!(parse_positive_mb("0").is_err());
        assert!(parse_positive_mb("-3").is_err());
        assert!(parse_positive_mb("inf").is_err());
        assert!(parse_positive_mb("diez").is_err());
    }

    #[test]
    fn chunk_csv_usa_valores_por_defecto() {
        let cli = Cli::try_parse_from(["filepool", "chunk-csv", "--directory", "/data/in"]).unwrap();
        let Commands::ChunkCsv(args) = cli.command else {
            panic!("se esperaba chunk-csv");
        };
        assert_eq!(args.directory, PathBuf::from("/data/in"));
        assert_eq!(args.chunk_size_mb, DEFAULT_CHUNK_SIZE_MB);
        assert!(!args.keep_existing);
        assert!(!args.pool.viewer);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn jsonl_to_csv_acepta_opciones_del_pool() {
        let cli = Cli::try_parse_from([
            "filepool",
            "jsonl-to-csv",
            "--directory",
            "in",
            "--output-dir",
            "out",
            "--concurrency",
            "3",
            "--viewer",
        ])
        .unwrap();
        let Commands::JsonlToCsv(args) = cli.command else {
            panic!("se esperaba jsonl-to-csv");
        };
        assert_eq!(args.pool.concurrency, Some(3));
        assert!(args.pool.viewer);
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn chunk_size_invalido_es_error_de_parseo() {
        let parsed = Cli::try_parse_from([
            "filepool",
            "chunk-csv",
            "--directory",
            "in",
            "--chunk-size-mb",
            "0",
        ]);
        assert!(parsed.is_err());
    }
}
