//! Report Builder
//!
//! Runs exactly once, after the target has terminated and no counter can
//! move: gathers records, drops everything never observed, applies the
//! documented total order, and renders the flat textual table. Rows are
//! value-semantics summaries sorted by an explicit key, so output is
//! deterministic across runs with identical dynamic behavior.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::debug;

use crate::registry::Registry;
use crate::{ProfError, ProfResult};

/// One rendered report line.
///
/// Field order is fixed: image name, image base, entity name, entity
/// address, primary count, secondary count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub image_name: String,
    pub image_base: u64,
    pub name: String,
    pub addr: u64,
    pub primary: u64,
    pub secondary: u64,
}

impl ReportRow {
    /// Comma-space separated, lowercase unpadded hex addresses.
    pub fn render(&self) -> String {
        format!(
            "{}, 0x{:x}, {}, 0x{:x}, {}, {}",
            self.image_name, self.image_base, self.name, self.addr, self.primary, self.secondary
        )
    }
}

/// Routine rows: primary = instruction count, secondary = call count,
/// sorted by primary descending with discovery order as the tiebreak.
pub fn routine_rows(registry: &Registry) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = registry
        .routines()
        .iter()
        .filter(|r| r.observed())
        .map(|r| ReportRow {
            image_name: r.image_name.clone(),
            image_base: r.image_base,
            name: r.name.clone(),
            addr: r.addr,
            primary: r.instructions(),
            secondary: r.calls(),
        })
        .collect();
    // Records start in discovery order; the stable sort keeps that order
    // among equal primary counts.
    rows.sort_by(|a, b| b.primary.cmp(&a.primary));
    rows
}

/// Block rows: primary = execution count, secondary = taken count.
/// Blocks carry no host-supplied symbol, so the name is derived from the
/// entry address; unresolved images render as `-`.
pub fn block_rows(registry: &Registry) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = registry
        .blocks()
        .iter()
        .filter(|b| b.observed())
        .map(|b| ReportRow {
            image_name: b
                .image
                .as_ref()
                .map(|i| i.name.clone())
                .unwrap_or_else(|| "-".to_string()),
            image_base: b.image.as_ref().map(|i| i.base).unwrap_or(0),
            name: format!("blk_{:x}", b.addr),
            addr: b.addr,
            primary: b.executions(),
            secondary: b.taken(),
        })
        .collect();
    rows.sort_by(|a, b| b.primary.cmp(&a.primary));
    rows
}

/// Render rows to a writer, one line per row, newline-terminated.
pub fn render<W: Write>(rows: &[ReportRow], w: &mut W) -> io::Result<()> {
    for row in rows {
        writeln!(w, "{}", row.render())?;
    }
    Ok(())
}

/// Write a report file, fully replacing any previous one.
///
/// The rows land in a temporary file first and only move to `path` once
/// complete, so an interrupted run leaves no report behind.
pub fn write_report(rows: &[ReportRow], path: &Path) -> ProfResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ProfError::Report)?;
        }
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).map_err(ProfError::Report)?;
    render(rows, &mut file).map_err(ProfError::Report)?;
    file.flush().map_err(ProfError::Report)?;
    drop(file);
    fs::rename(&tmp, path).map_err(ProfError::Report)?;

    debug!("[Report] wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
