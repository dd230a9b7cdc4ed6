//! Region boundary detection
//!
//! One coarse sweep over a candidate window. The first point whose mapped
//! timing falls below `m_th` is the region start; the first later point back
//! at or above `m_th` is its end.

use super::classify::is_unmapped_timing;
use crate::config::PlatformLayout;
use crate::domain::{DrkError, ProbePoint, RegionKind, ScanRegion};
use crate::probe::ProbingPrimitive;
use log::{info, warn};
use serde::Serialize;

/// Discovered `[start, end)` of a mapped region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionBounds {
    pub start: u64,
    pub end: u64,
}

/// Find the first mapped run in `points` (ascending addresses).
///
/// A run still mapped at the last probed point ends at `window_end`.
#[must_use]
pub fn find_bounds(points: &[ProbePoint], m_th: f64, window_end: u64) -> Option<RegionBounds> {
    let first = points.iter().position(|p| !is_unmapped_timing(p.mapped_time, m_th))?;
    let start = points[first].address;
    let end = points[first + 1..]
        .iter()
        .find(|p| is_unmapped_timing(p.mapped_time, m_th))
        .map_or(window_end, |p| p.address);
    Some(RegionBounds { start, end })
}

/// Sweep the window of `kind` and return the mapped region inside it.
///
/// The kernel image must exist, so not finding it is an error. A missing
/// module area is reported as `None`, after one retry at page granularity
/// when the configured window is coarser than that.
pub fn locate<P: ProbingPrimitive + ?Sized>(
    prober: &P,
    layout: &PlatformLayout,
    kind: RegionKind,
    m_th: f64,
    iterations: u32,
) -> Result<Option<RegionBounds>, DrkError> {
    let window = layout.window(kind);
    window.validate()?;

    let name = format!("{kind}_scan");
    let points = prober.sweep(&name, &[window], iterations)?;
    let mut bounds = find_bounds(&points, m_th, window.end);

    if bounds.is_none() && kind == RegionKind::Module && window.align > layout.page_align {
        warn!("No module mapping at 0x{:x} steps, retrying page by page", window.align);
        let fine = ScanRegion { align: layout.page_align, ..window };
        let points = prober.sweep(&name, &[fine], iterations)?;
        bounds = find_bounds(&points, m_th, fine.end);
    }

    match (kind, bounds) {
        (_, Some(b)) => {
            info!("{kind} region 0x{:x} - 0x{:x}", b.start, b.end);
            Ok(Some(b))
        }
        (RegionKind::Kernel, None) => Err(DrkError::RegionNotFound(kind)),
        (RegionKind::Module, None) => {
            warn!("No module region found in {window}");
            Ok(None)
        }
    }
}
