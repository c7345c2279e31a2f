use anyhow::{anyhow, Context, Result};
use csv::{StringRecord, Writer, WriterBuilder};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

/// Buffer de escritura por chunk. Acota la memoria: cuando se llena, la
/// escritura bloquea hasta que el sistema operativo acepta los datos.
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Nombre de un chunk: `<stem>_chunk_<NNNN>.csv` (índice desde 1).
pub fn chunk_file_name(stem: &str, index: u32) -> String {
    format!("{}_chunk_{:04}.csv", stem, index)
}

/// Un archivo de chunk abierto. Siempre arranca con el header del input.
pub struct ChunkWriter {
    path: PathBuf,
    writer: Writer<File>,
    /// Bytes acumulados según la aproximación de `approx_row_size`
    bytes: u64,
    rows: u64,
}

/// Lo que quedó escrito en un chunk ya cerrado.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkStats {
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
}

impl ChunkWriter {
    pub fn create(path: &Path, header: &StringRecord) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("no se pudo crear el chunk {}", path.display()))?;

        // flexible: las filas con distinta cantidad de columnas se escriben igual
        let mut writer = WriterBuilder::new()
            .flexible(true)
            .buffer_capacity(WRITE_BUFFER_BYTES)
            .from_writer(file);

        writer
            .write_record(header)
            .with_context(|| format!("no se pudo escribir el header en {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            bytes: 0,
            rows: 0,
        })
    }

    /// ¿Agregar una fila de `row_size` bytes pasaría el umbral?
    ///
    /// Un chunk vacío nunca desborda: una fila más grande que el umbral
    /// igual entra sola en su propio chunk.
    pub fn would_overflow(&self, row_size: u64, threshold: u64) -> bool {
        self.rows > 0 && self.bytes + row_size > threshold
    }

    pub fn write_row(&mut self, record: &StringRecord, row_size: u64) -> Result<()> {
        self.writer
            .write_record(record)
            .with_context(|| format!("no se pudo escribir en {}", self.path.display()))?;
        self.bytes += row_size;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Vacía el buffer y espera a que el archivo quede en disco.
    pub fn finish(self) -> Result<ChunkStats> {
        let Self {
            path,
            writer,
            bytes,
            rows,
        } = self;

        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("no se pudo vaciar {}: {}", path.display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("no se pudo sincronizar {}", path.display()))?;

        Ok(ChunkStats { path, rows, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("filepool_chunk_writer_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn chunk_file_name_rellena_a_cuatro_digitos() {
        assert_eq!(chunk_file_name("sample", 1), "sample_chunk_0001.csv");
        assert_eq!(chunk_file_name("sample", 42), "sample_chunk_0042.csv");
        assert_eq!(chunk_file_name("sample", 9999), "sample_chunk_9999.csv");
    }

    #[test]
    fn chunk_writer_escribe_header_y_cita_campos() {
        let tmp = temp_dir("quote");
        let path = tmp.join("out_chunk_0001.csv");

        let header = StringRecord::from(vec!["id", "nota"]);
        let mut w = ChunkWriter::create(&path, &header).unwrap();
        w.write_row(&StringRecord::from(vec!["1", "hola, mundo"]), 13).unwrap();
        w.write_row(&StringRecord::from(vec!["2", "dijo \"si\"\nfin"]), 16).unwrap();

        let stats = w.finish().unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.bytes, 29);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "id,nota\n1,\"hola, mundo\"\n2,\"dijo \"\"si\"\"\nfin\"\n"
        );
    }

    #[test]
    fn would_overflow_respeta_chunk_vacio() {
        let tmp = temp_dir("overflow");
        let header = StringRecord::from(vec!["a"]);
        let mut w = ChunkWriter::create(&tmp.join("x_chunk_0001.csv"), &header).unwrap();

        // vacío: nunca desborda aunque la fila sola supere el umbral
        assert!(!w.would_overflow(500, 100));

        w.write_row(&StringRecord::from(vec!["x"]), 60).unwrap();
        assert!(!w.would_overflow(40, 100));
        assert!(w.would_overflow(41, 100));
    }
}
