//! Export template application and the TXT/CSV writers.

use crate::core::{EngineError, ExportKind, ExportTemplate, Result, parser};
use crate::engine::TableEngine;
use crate::services::dedup_service::GroupReport;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Rows ready to be written, already filtered, sorted and projected
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    /// Apply `template` to the engine's current view. `selected` holds view positions
    /// and is only consulted for [`crate::core::ExportScope::SelectedRows`].
    pub fn from_template(engine: &TableEngine, template: &ExportTemplate, selected: &[usize]) -> Result<Self> {
        let (header, rows) = engine.export_rows(template, selected)?;
        Ok(Self { header, rows })
    }

    pub fn from_group(report: &GroupReport) -> Self {
        Self {
            header: report.header(),
            rows: report.to_records(),
        }
    }

    /// One line per row, cells joined by `delimiter`, no header
    pub fn render_txt(&self, delimiter: &str) -> String {
        parser::rows_to_text(&self.rows, delimiter)
    }

    /// UTF-8 without a byte-order mark
    pub fn write_txt<W: Write>(&self, mut out: W, delimiter: &str) -> Result<()> {
        let text = self.render_txt(delimiter);
        out.write_all(text.as_bytes())?;
        if !text.is_empty() {
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.header).map_err(std::io::Error::from)?;
        for row in &self.rows {
            wtr.write_record(row).map_err(std::io::Error::from)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_to_path(&self, path: &Path, kind: ExportKind, delimiter: &str) -> Result<()> {
        if kind == ExportKind::Xlsx {
            return Err(EngineError::invalid_operation("XLSX export is not supported"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        match kind {
            ExportKind::Csv => self.write_csv(file)?,
            _ => self.write_txt(file, delimiter)?,
        }
        info!("Exported {} rows as {} to {}", self.rows.len(), kind, path.display());
        Ok(())
    }
}

/// Pick the writer from a file extension: `.csv` is CSV, anything else TXT
pub fn kind_for_path(path: &Path) -> ExportKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportKind::Csv,
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => ExportKind::Xlsx,
        _ => ExportKind::Txt,
    }
}

/// Export the engine's view through `template` to `path`
pub fn export_view(engine: &TableEngine, template: &ExportTemplate, selected: &[usize], path: &Path) -> Result<usize> {
    let table = ExportTable::from_template(engine, template, selected)?;
    table.write_to_path(path, template.export_kind, &template.delimiter)?;
    Ok(table.rows.len())
}
