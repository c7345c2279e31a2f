use anyhow::Result;
use std::io::{self, Write};

use super::{format_elapsed, DashboardPlugin, DashboardSnapshot, Renderer};

/// Modo viewer: bloques de texto plano cada tanto, sin tocar la terminal.
/// Sirve para CI o cuando la salida va a un archivo.
pub struct ViewerRenderer<W: Write> {
    out: W,
}

impl ViewerRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ViewerRenderer<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_block<T>(
        &mut self,
        snapshot: &DashboardSnapshot<T>,
        plugin: &dyn DashboardPlugin<T>,
        heading: &str,
    ) -> Result<()> {
        let out = &mut self.out;
        writeln!(
            out,
            "== {} [{}] {} ==",
            snapshot.title,
            format_elapsed(snapshot.elapsed),
            heading
        )?;
        writeln!(
            out,
            "tareas {}/{} | ok {} | fallidas {} | en curso {} | workers {}",
            snapshot.done(),
            snapshot.total_tasks,
            snapshot.completed,
            snapshot.failed,
            snapshot.in_flight,
            snapshot.pool_size
        )?;
        for line in plugin.totals_lines(&snapshot.totals) {
            writeln!(out, "{}", line)?;
        }
        for slot in &snapshot.slots {
            let detail = plugin.slot_detail(slot);
            if detail.is_empty() {
                writeln!(out, "  #{} {}", slot.index, slot.phase.as_str())?;
            } else {
                writeln!(out, "  #{} {} {}", slot.index, slot.phase.as_str(), detail)?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl<T, W: Write> Renderer<T> for ViewerRenderer<W> {
    fn render(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()> {
        let heading = if snapshot.draining { "cerrando" } else { "en curso" };
        self.write_block(snapshot, plugin, heading)
    }

    fn finish(&mut self, snapshot: &DashboardSnapshot<T>, plugin: &dyn DashboardPlugin<T>) -> Result<()> {
        self.write_block(snapshot, plugin, "final")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::{sample_snapshot, CountPlugin};

    fn rendered(finish: bool) -> String {
        let mut viewer = ViewerRenderer::with_writer(Vec::new());
        let snap = sample_snapshot();
        if finish {
            viewer.finish(&snap, &CountPlugin).unwrap();
        } else {
            viewer.render(&snap, &CountPlugin).unwrap();
        }
        String::from_utf8(viewer.into_inner()).unwrap()
    }

    #[test]
    fn bloque_periodico_muestra_contadores_y_slots() {
        let text = rendered(false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "== chunk-csv [01:02:05] en curso ==");
        assert_eq!(lines[1], "tareas 3/4 | ok 2 | fallidas 1 | en curso 1 | workers 2");
        assert_eq!(lines[2], "filas: 42");
        assert_eq!(lines[3], "  #0 ocupado ventas.csv 12.5K filas");
        assert_eq!(lines[4], "  #1 libre clientes.csv: 3 chunks");
    }

    #[test]
    fn bloque_final_se_marca() {
        let text = rendered(true);
        assert!(text.starts_with("== chunk-csv [01:02:05] final =="));
    }
}
