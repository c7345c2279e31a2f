use anyhow::{anyhow, bail, Context, Result};
use csv::WriterBuilder;
use serde_json::{Map, Value};
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::info;

use crate::chunker::progress_every_rows;

#[derive(Debug, Clone)]
pub struct ConvertSummary {
    pub output_path: PathBuf,
    pub rows: u64,
    pub columns: Vec<String>,
}

/// Convierte un JSONL (un objeto por línea) en `<output_dir>/<stem>.csv`.
///
/// Dos pasadas en streaming: la primera junta las columnas (unión de las
/// claves, en orden de aparición) y cuenta filas; la segunda escribe a un
/// temporal en `output_dir` que se mueve al nombre definitivo al final. Si
/// algo falla antes (o el proceso muere), el temporal se borra y no queda un
/// CSV truncado.
pub fn jsonl_to_csv(
    input_path: &Path,
    output_dir: &Path,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<ConvertSummary> {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .with_context(|| format!("ruta de entrada sin nombre: {}", input_path.display()))?;

    // 1) columnas y cantidad de filas
    let mut columns: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut total: u64 = 0;
    for_each_object(input_path, |_, obj| {
        for key in obj.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
        total += 1;
        Ok(())
    })?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("no se pudo crear {}", output_dir.display()))?;
    let output_path = output_dir.join(format!("{}.csv", stem));

    // 2) escritura
    let temp = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("no se pudo crear un temporal en {}", output_dir.display()))?;
    let mut writer = WriterBuilder::new().from_writer(temp);
    // un JSONL sin objetos da un CSV vacío, sin header
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }

    let every = progress_every_rows();
    let mut written: u64 = 0;
    for_each_object(input_path, |_, obj| {
        let row: Vec<String> = columns
            .iter()
            .map(|col| obj.get(col).map(cell_value).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
        written += 1;
        if written % every == 0 {
            on_progress(written, Some(total));
        }
        Ok(())
    })?;

    let temp = writer
        .into_inner()
        .map_err(|e| anyhow!("no se pudo vaciar el CSV de {}: {}", stem, e.error()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("no se pudo sincronizar el CSV de {}", stem))?;
    temp.persist(&output_path)
        .map_err(|e| anyhow!("no se pudo guardar {}: {}", output_path.display(), e.error))?;

    on_progress(written, Some(total));
    info!(
        "{} convertido: {} filas, {} columnas",
        stem,
        written,
        columns.len()
    );

    Ok(ConvertSummary {
        output_path,
        rows: written,
        columns,
    })
}

/// Recorre los objetos del JSONL; las líneas vacías se ignoran.
fn for_each_object<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(u64, &Map<String, Value>) -> Result<()>,
{
    let file = File::open(path).with_context(|| format!("no se pudo abrir {}", path.display()))?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx as u64 + 1;
        let line = line.with_context(|| format!("error leyendo {} (línea {})", path.display(), line_no))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("JSON inválido en {} (línea {})", path.display(), line_no))?;
        let Value::Object(obj) = value else {
            bail!(
                "la línea {} de {} no es un objeto JSON",
                line_no,
                path.display()
            );
        };
        f(line_no, &obj)?;
    }
    Ok(())
}

fn cell_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("filepool_convert_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn jsonl_to_csv_une_columnas_en_orden_de_aparicion() {
        let tmp = temp_dir("basic");
        let input = tmp.join("eventos.jsonl");
        fs::write(
            &input,
            concat!(
                "{\"id\":1,\"nombre\":\"Ana\"}\n",
                "\n",
                "{\"id\":2,\"extra\":{\"a\":true},\"nombre\":null}\n",
                "{\"nombre\":\"Luis, el de \\\"arriba\\\"\",\"id\":3}\n"
            ),
        )
        .unwrap();

        let mut calls = Vec::new();
        let summary = jsonl_to_csv(&input, &tmp.join("out"), &mut |p, t| calls.push((p, t))).unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.columns, vec!["id", "nombre", "extra"]);
        assert_eq!(calls.last(), Some(&(3, Some(3))));
        assert_eq!(fs::read_dir(tmp.join("out")).unwrap().count(), 1);

        let content = fs::read_to_string(&summary.output_path).unwrap();
        assert_eq!(
            content,
            "id,nombre,extra\n1,Ana,\n2,,\"{\"\"a\"\":true}\"\n3,\"Luis, el de \"\"arriba\"\"\",\n"
        );
    }

    #[test]
    fn jsonl_to_csv_sin_objetos_deja_un_csv_vacio() {
        let tmp = temp_dir("vacio");
        let input = tmp.join("vacio.jsonl");
        fs::write(&input, "\n\n").unwrap();

        let mut calls = Vec::new();
        let summary = jsonl_to_csv(&input, &tmp, &mut |p, t| calls.push((p, t))).unwrap();
        assert_eq!(summary.rows, 0);
        assert!(summary.columns.is_empty());
        assert_eq!(calls, vec![(0, Some(0))]);
        assert_eq!(fs::read_to_string(tmp.join("vacio.csv")).unwrap(), "");
    }

    #[test]
    fn jsonl_to_csv_falla_con_linea_que_no_es_objeto() {
        let tmp = temp_dir("not_object");
        let input = tmp.join("malo.jsonl");
        fs::write(&input, "{\"a\":1}\n[1,2]\n").unwrap();

        let err = jsonl_to_csv(&input, &tmp.join("out"), &mut |_, _| {}).unwrap_err();
        assert!(format!("{err:#}").contains("línea 2"));
        assert!(!tmp.join("out").join("malo.csv").exists());
    }

    #[test]
    fn jsonl_to_csv_no_deja_temporales_si_no_puede_guardar() {
        let tmp = temp_dir("persist_falla");
        let input = tmp.join("x.jsonl");
        fs::write(&input, "{\"a\":1}\n").unwrap();
        let out = tmp.join("out");
        // un directorio con el nombre del CSV hace fallar el paso final
        fs::create_dir_all(out.join("x.csv")).unwrap();

        let err = jsonl_to_csv(&input, &out, &mut |_, _| {}).unwrap_err();
        assert!(format!("{err:#}").contains("no se pudo guardar"));

        let names: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["x.csv"]);
        assert!(out.join("x.csv").is_dir());
    }

    #[test]
    fn jsonl_to_csv_reporta_progreso_con_el_total() {
        let tmp = temp_dir("progreso");
        let input = tmp.join("largo.jsonl");
        let mut content = String::new();
        for i in 0..25_000 {
            content.push_str(&format!("{{\"n\":{}}}\n", i));
        }
        fs::write(&input, content).unwrap();

        let mut calls = Vec::new();
        let summary = jsonl_to_csv(&input, &tmp, &mut |p, t| calls.push((p, t))).unwrap();
        assert_eq!(summary.rows, 25_000);
        assert_eq!(
            calls,
            vec![
                (10_000, Some(25_000)),
                (20_000, Some(25_000)),
                (25_000, Some(25_000))
            ]
        );
    }
}
