//! Dense page classification
//!
//! Labels are a pure function of the two timings and the two thresholds:
//!
//! ```text
//! mapped_time >= m_th  -> U
//! exec_time   >= x_th  -> NX
//! otherwise            -> X
//! ```
//!
//! A timing exactly on a threshold counts as the slower population
//! (unmapped, non-executable).

#![allow(clippy::cast_precision_loss)]

use crate::domain::{ClassifyMode, DrkError, PageLabel, PageRecord, ProbePoint, ScanRegion, Thresholds};
use crate::probe::ProbingPrimitive;
use log::info;

/// True when a mapped-test timing falls in the unmapped population.
#[must_use]
pub fn is_unmapped_timing(mapped_time: u64, m_th: f64) -> bool {
    mapped_time as f64 >= m_th
}

/// Label one page from its timings.
#[must_use]
pub fn derive_label(
    mapped_time: u64,
    exec_time: u64,
    thresholds: Thresholds,
    mode: ClassifyMode,
) -> PageLabel {
    if is_unmapped_timing(mapped_time, thresholds.mapped) {
        PageLabel::Unmapped
    } else if mode == ClassifyMode::MappedOnly || exec_time as f64 >= thresholds.exec {
        PageLabel::NonExecutable
    } else {
        PageLabel::Executable
    }
}

/// Attach labels to raw probe points, which must be strictly ascending.
pub fn label_points(
    points: &[ProbePoint],
    thresholds: Thresholds,
    mode: ClassifyMode,
) -> Result<Vec<PageRecord>, DrkError> {
    if let Some(pair) = points.windows(2).find(|w| w[1].address <= w[0].address) {
        return Err(DrkError::UnorderedProbeOutput(pair[1].address));
    }

    Ok(points
        .iter()
        .map(|p| PageRecord {
            address: p.address,
            mapped_time: p.mapped_time,
            exec_time: p.exec_time,
            label: derive_label(p.mapped_time, p.exec_time, thresholds, mode),
        })
        .collect())
}

/// Recompute the labels of already classified records.
#[must_use]
pub fn relabel(records: &[PageRecord], thresholds: Thresholds, mode: ClassifyMode) -> Vec<PageRecord> {
    records
        .iter()
        .map(|r| PageRecord { label: derive_label(r.mapped_time, r.exec_time, thresholds, mode), ..*r })
        .collect()
}

/// Probe every page of `regions` in one pass and label the results.
///
/// Regions are swept in address order whatever order they are given in.
/// Pages that were not probed are absent from the output.
pub fn classify<P: ProbingPrimitive + ?Sized>(
    prober: &P,
    name: &str,
    regions: &[ScanRegion],
    thresholds: Thresholds,
    mode: ClassifyMode,
    iterations: u32,
) -> Result<Vec<PageRecord>, DrkError> {
    let mut ordered = regions.to_vec();
    ordered.sort_by_key(|r| r.start);
    for region in &ordered {
        region.validate()?;
    }

    let points = prober.sweep(name, &ordered, iterations)?;
    let records = label_points(&points, thresholds, mode)?;

    let count = |label| records.iter().filter(|r| r.label == label).count();
    info!(
        "{name}: {} pages, {} X, {} NX, {} U",
        records.len(),
        count(PageLabel::Executable),
        count(PageLabel::NonExecutable),
        count(PageLabel::Unmapped)
    );
    Ok(records)
}
