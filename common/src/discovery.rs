use anyhow::{bail, Context, Result};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Busca los archivos `*.{extension}` (no recursivo) de un directorio.
///
/// Devuelve rutas absolutas ordenadas. Un directorio inexistente o ilegible
/// es un error; un directorio sin archivos que coincidan también, porque no
/// tiene sentido levantar workers sin trabajo.
pub fn find_input_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = fs::canonicalize(dir)
        .with_context(|| format!("no se pudo abrir el directorio {}", dir.display()))?;

    if !dir.is_dir() {
        bail!("{} no es un directorio", dir.display());
    }
    // read_dir falla si no hay permisos de lectura; glob en cambio lo silencia
    fs::read_dir(&dir).with_context(|| format!("no se pudo leer {}", dir.display()))?;

    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        extension
    );

    let mut files = Vec::new();
    for entry in glob(&pattern).context("patrón de búsqueda inválido")? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("no se pudo leer {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();

    if files.is_empty() {
        bail!(
            "no se encontraron archivos *.{} en {}",
            extension,
            dir.display()
        );
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("filepool_discovery_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn find_input_files_filtra_por_extension_y_ordena() {
        let tmp = temp_dir("basic");
        fs::write(tmp.join("b.csv"), "x\n").unwrap();
        fs::write(tmp.join("a.csv"), "x\n").unwrap();
        fs::write(tmp.join("notas.txt"), "x\n").unwrap();
        fs::create_dir_all(tmp.join("sub.csv")).unwrap();

        let files = find_input_files(&tmp, "csv").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn find_input_files_sin_coincidencias_es_error() {
        let tmp = temp_dir("empty");
        fs::write(tmp.join("notas.txt"), "x\n").unwrap();

        let err = find_input_files(&tmp, "csv").unwrap_err();
        assert!(err.to_string().contains("no se encontraron"));
    }

    #[test]
    fn find_input_files_directorio_inexistente_es_error() {
        let tmp = temp_dir("missing");
        assert!(find_input_files(&tmp.join("no_existe"), "csv").is_err());
    }
}
