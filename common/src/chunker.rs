//! Partición de un CSV en chunks acotados por tamaño.
//!
//! El input se lee fila por fila (nunca entero en memoria) y cada chunk se
//! cierra antes de abrir el siguiente, así que el orden de las filas dentro
//! de la secuencia de chunks es el mismo que en el archivo original.

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use glob::glob;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::chunk_writer::{chunk_file_name, ChunkWriter};

const DEFAULT_PROGRESS_EVERY_ROWS: u64 = 10_000;

/// Cuántas filas con columnas de más/de menos se loguean una por una.
const MAX_MISMATCH_WARNINGS: u64 = 5;

/// Cada cuántas filas se reporta progreso.
/// Se puede sobreescribir con la env var PROGRESS_EVERY_ROWS.
pub fn progress_every_rows() -> u64 {
    std::env::var("PROGRESS_EVERY_ROWS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_PROGRESS_EVERY_ROWS)
}

/// Umbral en bytes para un tamaño de chunk en megabytes.
pub fn threshold_bytes(chunk_size_mb: f64) -> u64 {
    (chunk_size_mb * 1024.0 * 1024.0) as u64
}

/// Tamaño aproximado de una fila: los valores unidos por comas.
///
/// No cuenta comillas ni el salto de línea, así que un chunk con campos
/// citados puede quedar algo por encima del umbral nominal.
pub fn approx_row_size(record: &StringRecord) -> u64 {
    let fields: usize = record.iter().map(str::len).sum();
    let commas = record.len().saturating_sub(1);
    (fields + commas) as u64
}

/// Chunks generados para un input.
#[derive(Debug, Clone, Default)]
pub struct ChunkSummary {
    pub chunk_paths: Vec<PathBuf>,
    /// Filas de datos (sin header)
    pub total_rows: u64,
    /// Filas de datos de cada chunk, en el mismo orden que `chunk_paths`
    pub rows_per_chunk: Vec<u64>,
}

/// Parte `input_path` en `<stem>_chunk_NNNN.csv` dentro de `output_dir`.
///
/// `on_progress(procesadas, total)` se llama cada `progress_every_rows()`
/// filas y una vez más al final con el total.
pub fn chunk_file(
    input_path: &Path,
    output_dir: &Path,
    clear_output_dir: bool,
    chunk_size_mb: f64,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<ChunkSummary> {
    if !chunk_size_mb.is_finite() || chunk_size_mb <= 0.0 {
        bail!("tamaño de chunk inválido: {} MB", chunk_size_mb);
    }
    let threshold = threshold_bytes(chunk_size_mb);
    let every = progress_every_rows();

    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .with_context(|| format!("ruta de entrada sin nombre: {}", input_path.display()))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("no se pudo crear {}", output_dir.display()))?;

    if clear_output_dir {
        let removed = clear_chunk_files(output_dir, &stem)?;
        if removed > 0 {
            info!("borrados {} chunks previos de {}", removed, stem);
        }
    }

    let file = File::open(input_path)
        .with_context(|| format!("no se pudo abrir {}", input_path.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut summary = ChunkSummary::default();
    let mut header: Option<StringRecord> = None;
    let mut current: Option<ChunkWriter> = None;
    let mut chunk_index: u32 = 0;
    let mut mismatches: u64 = 0;

    for result in reader.records() {
        let record = result.with_context(|| {
            format!(
                "error leyendo {} (fila {})",
                input_path.display(),
                summary.total_rows + 2
            )
        })?;

        let Some(header) = header.as_ref() else {
            debug!("header de {}: {} columnas", stem, record.len());
            header = Some(record);
            continue;
        };

        if record.len() != header.len() {
            mismatches += 1;
            if mismatches <= MAX_MISMATCH_WARNINGS {
                warn!(
                    "{}: la fila {} tiene {} columnas (header: {})",
                    stem,
                    summary.total_rows + 2,
                    record.len(),
                    header.len()
                );
            }
        }

        let row_size = approx_row_size(&record);

        let needs_new_chunk = match current.as_ref() {
            Some(writer) => writer.would_overflow(row_size, threshold),
            None => true,
        };

        if needs_new_chunk {
            if let Some(writer) = current.take() {
                close_chunk(writer, &mut summary)?;
            }
            chunk_index += 1;
            let path = output_dir.join(chunk_file_name(&stem, chunk_index));
            debug!("abriendo chunk {}", path.display());
            current = Some(ChunkWriter::create(&path, header)?);
        }

        if let Some(writer) = current.as_mut() {
            writer.write_row(&record, row_size)?;
        }
        summary.total_rows += 1;

        if summary.total_rows % every == 0 {
            on_progress(summary.total_rows, None);
        }
    }

    match (current.take(), header.as_ref()) {
        (Some(writer), _) => close_chunk(writer, &mut summary)?,
        // solo header: un chunk con el header para que el input tenga salida
        (None, Some(header)) => {
            let path = output_dir.join(chunk_file_name(&stem, 1));
            let writer = ChunkWriter::create(&path, header)?;
            close_chunk(writer, &mut summary)?;
        }
        (None, None) => warn!("{} está vacío, no se generaron chunks", input_path.display()),
    }

    if mismatches > MAX_MISMATCH_WARNINGS {
        warn!(
            "{}: {} filas en total con cantidad de columnas distinta al header",
            stem, mismatches
        );
    }

    on_progress(summary.total_rows, Some(summary.total_rows));

    info!(
        "{} partido en {} chunks ({} filas)",
        stem,
        summary.chunk_paths.len(),
        summary.total_rows
    );

    Ok(summary)
}

fn close_chunk(writer: ChunkWriter, summary: &mut ChunkSummary) -> Result<()> {
    let stats = writer.finish()?;
    summary.chunk_paths.push(stats.path);
    summary.rows_per_chunk.push(stats.rows);
    Ok(())
}

/// Chunks existentes de `stem` en `dir`, ordenados por índice.
pub fn list_chunk_files(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}_chunk_*.csv",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(stem)
    );

    let mut files: Vec<PathBuf> = glob(&pattern)
        .context("patrón de chunks inválido")?
        .filter_map(|entry| entry.ok())
        .filter(|path| chunk_index_of(path, stem).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Índice de un chunk de `stem`, o `None` si el archivo no es uno.
pub fn chunk_index_of(path: &Path, stem: &str) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits = name
        .strip_prefix(stem)?
        .strip_prefix("_chunk_")?
        .strip_suffix(".csv")?;

    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// ¿El archivo tiene forma de chunk generado (`*_chunk_NNNN.csv`)?
pub fn is_chunk_file(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    match stem.rsplit_once("_chunk_") {
        Some((base, digits)) => {
            !base.is_empty() && digits.len() >= 4 && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn clear_chunk_files(dir: &Path, stem: &str) -> Result<usize> {
    let files = list_chunk_files(dir, stem)?;
    for path in &files {
        fs::remove_file(path)
            .with_context(|| format!("no se pudo borrar {}", path.display()))?;
    }
    Ok(files.len())
}
