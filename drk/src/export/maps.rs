//! Text artifacts: extent maps and per-page mismatch dumps

use crate::analysis::{render_map, Mismatch, MAP_HEADER};
use crate::domain::{Extent, ExportError};
use crate::pipeline::AttackOutcome;
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const KERNEL_MAP: &str = "kernel_map";
pub const MODULE_MAP: &str = "module_map";

/// One `0x<addr> <mapped> <exec> <derived> <expected> WRONG` line per page
#[must_use]
pub fn render_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches.iter().map(|m| format!("{m}\n")).collect()
}

/// Write a map file, replacing any previous one.
pub fn write_map(path: &Path, extents: &[Extent]) -> Result<(), ExportError> {
    write_file(path, &format!("{MAP_HEADER}\n{}", render_map(extents)))
}

pub fn write_mismatches(path: &Path, mismatches: &[Mismatch]) -> Result<(), ExportError> {
    write_file(path, &render_mismatches(mismatches))
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    let wrap = |error| ExportError::WriteFailed { path: path.to_path_buf(), error };
    let mut writer = BufWriter::new(File::create(path).map_err(wrap)?);
    writer.write_all(content.as_bytes()).map_err(wrap)?;
    writer.flush().map_err(wrap)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write both maps and a mismatch dump per scored category into `outdir`.
///
/// The module map is written even when no module region was found, so a
/// map from an earlier run is never left behind.
pub fn write_artifacts(outdir: &Path, outcome: &AttackOutcome) -> Result<Vec<PathBuf>, ExportError> {
    let mut written = Vec::new();

    let kernel_map = outdir.join(KERNEL_MAP);
    write_map(&kernel_map, &outcome.kernel.extents)?;
    written.push(kernel_map);

    let module_map = outdir.join(MODULE_MAP);
    write_map(&module_map, &outcome.modules.extents)?;
    written.push(module_map);

    if let Some(ref scores) = outcome.scores {
        for (name, report) in scores.categories() {
            let path = outdir.join(name);
            write_mismatches(&path, &report.mismatches)?;
            written.push(path);
        }
    }

    Ok(written)
}
