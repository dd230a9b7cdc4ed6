//! Attack orchestration
//!
//! Runs the stages in order over the two primitives and collects everything
//! the artifacts are written from. Nothing here touches the filesystem
//! beyond what the primitives do.

use crate::analysis::{
    build_map, calibrate, classify, evaluate, locate, match_modules, AccuracyReport, Calibration,
    MatchOutcome, RegionBounds, SignatureTable, ThresholdOverrides,
};
use crate::config::{PlatformLayout, RunConfig};
use crate::domain::{ClassifyMode, DrkError, Extent, PageRecord, RegionKind};
use crate::ground_truth::{GroundTruthMap, PageTableDump};
use crate::probe::{MeasurementPrimitive, ProbingPrimitive};
use log::info;
use std::time::{Duration, Instant};

/// Everything the pipeline needs besides the primitives
#[derive(Debug, Clone)]
pub struct AttackSettings {
    pub iterations: u32,
    pub repeats: u32,
    pub overrides: ThresholdOverrides,
    pub layout: PlatformLayout,
}

impl From<&RunConfig> for AttackSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            iterations: config.iterations,
            repeats: config.repeats,
            overrides: ThresholdOverrides { mapped: config.m_threshold, exec: config.x_threshold },
            layout: config.layout.clone(),
        }
    }
}

/// Dense scan result of one region
#[derive(Debug, Clone)]
pub struct RegionScan {
    pub kind: RegionKind,
    pub bounds: RegionBounds,
    pub records: Vec<PageRecord>,
    pub extents: Vec<Extent>,
}

/// Accuracy of each region at both granularities
#[derive(Debug, Clone, Default)]
pub struct Scores {
    pub kernel_m: Option<AccuracyReport>,
    pub kernel_x: Option<AccuracyReport>,
    pub module_m: Option<AccuracyReport>,
    pub module_x: Option<AccuracyReport>,
}

impl Scores {
    /// `(artifact name, report)` for every category that was scored
    #[must_use]
    pub fn categories(&self) -> Vec<(&'static str, &AccuracyReport)> {
        [
            ("kernel_m", &self.kernel_m),
            ("kernel_x", &self.kernel_x),
            ("module_m", &self.module_m),
            ("module_x", &self.module_x),
        ]
        .into_iter()
        .filter_map(|(name, report)| report.as_ref().map(|r| (name, r)))
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AttackOutcome {
    pub calibration: Calibration,
    pub kernel: RegionScan,
    /// `None` when no module is loaded in the module window
    pub module: Option<RegionScan>,
    pub modules: MatchOutcome,
    /// `None` when no ground truth was available
    pub scores: Option<Scores>,
    /// Wall time from the first locator sweep to the last dense scan
    pub scan_elapsed: Duration,
}

/// Calibrate, locate, classify, build maps, identify modules and, given a
/// page-table dump, score the result.
///
/// Only the module map is matched against `signatures`; kernel extents are
/// not module-shaped.
pub fn run_attack<M, P>(
    measure: &M,
    prober: &P,
    settings: &AttackSettings,
    signatures: Option<&SignatureTable>,
    ground_truth: Option<&PageTableDump>,
) -> Result<AttackOutcome, DrkError>
where
    M: MeasurementPrimitive + ?Sized,
    P: ProbingPrimitive + ?Sized,
{
    let calibration = calibrate(measure, settings.iterations, settings.repeats, settings.overrides)?;
    let thresholds = calibration.thresholds;
    let iterations = calibration.iterations;
    let layout = &settings.layout;

    let scan_start = Instant::now();

    let kernel_bounds = locate(prober, layout, RegionKind::Kernel, thresholds.mapped, iterations)?
        .ok_or(DrkError::RegionNotFound(RegionKind::Kernel))?;
    let module_bounds = locate(prober, layout, RegionKind::Module, thresholds.mapped, iterations)?;

    let kernel_regions = layout.kernel_dense_regions(kernel_bounds.start, kernel_bounds.end);
    let records =
        classify(prober, "kernel", &kernel_regions, thresholds, ClassifyMode::Full, iterations)?;
    let kernel = RegionScan {
        kind: RegionKind::Kernel,
        bounds: kernel_bounds,
        extents: build_map(&records),
        records,
    };

    let module = module_bounds
        .map(|found| -> Result<RegionScan, DrkError> {
            let bounds =
                RegionBounds { start: found.start, end: layout.module_scan_end(found.start) };
            let regions = layout.module_dense_regions(bounds.start);
            let records =
                classify(prober, "module", &regions, thresholds, ClassifyMode::Full, iterations)?;
            Ok(RegionScan {
                kind: RegionKind::Module,
                bounds,
                extents: build_map(&records),
                records,
            })
        })
        .transpose()?;

    let scan_elapsed = scan_start.elapsed();
    info!("Page scan took {} ms", scan_elapsed.as_millis());

    let modules = match (module.as_ref(), signatures) {
        (Some(scan), Some(table)) => match_modules(&scan.extents, table),
        (Some(scan), None) => MatchOutcome { extents: scan.extents.clone(), unique: Vec::new() },
        (None, _) => MatchOutcome::default(),
    };

    let scores = ground_truth
        .map(|dump| score(&kernel, module.as_ref(), dump))
        .transpose()?;

    Ok(AttackOutcome { calibration, kernel, module, modules, scores, scan_elapsed })
}

/// Score both regions at both granularities against `dump`.
pub fn score(
    kernel: &RegionScan,
    module: Option<&RegionScan>,
    dump: &PageTableDump,
) -> Result<Scores, DrkError> {
    let kernel_truth = GroundTruthMap::new(&dump.kernel);
    let mut scores = Scores {
        kernel_m: Some(evaluate(&kernel.records, &kernel_truth, ClassifyMode::MappedOnly)?),
        kernel_x: Some(evaluate(&kernel.records, &kernel_truth, ClassifyMode::Full)?),
        ..Scores::default()
    };

    if let Some(module) = module {
        let module_truth = GroundTruthMap::new(&dump.modules);
        scores.module_m = Some(evaluate(&module.records, &module_truth, ClassifyMode::MappedOnly)?);
        scores.module_x = Some(evaluate(&module.records, &module_truth, ClassifyMode::Full)?);
    }

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PageLabel;

    fn scan(kind: RegionKind, labels: &[PageLabel]) -> RegionScan {
        let records: Vec<PageRecord> = labels
            .iter()
            .zip(1u64..)
            .map(|(&label, i)| PageRecord { address: i * 0x1000, mapped_time: 0, exec_time: 0, label })
            .collect();
        RegionScan {
            kind,
            bounds: RegionBounds { start: 0x1000, end: 0x1000 * (labels.len() as u64 + 1) },
            extents: build_map(&records),
            records,
        }
    }

    #[test]
    fn test_score_without_module_region() {
        let dump = PageTableDump {
            kernel: vec![crate::ground_truth::GroundTruthArea {
                start: 0x1000,
                end: 0x3000,
                perm: PageLabel::Executable,
            }],
            modules: Vec::new(),
        };
        let kernel = scan(RegionKind::Kernel, &[PageLabel::Executable, PageLabel::NonExecutable]);
        let scores = score(&kernel, None, &dump).unwrap();

        let cats = scores.categories();
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[0].0, "kernel_m");
        assert_eq!(cats[0].1.wrong, 0);
        assert_eq!(cats[1].1.wrong, 1);
        assert!(scores.module_x.is_none());
    }
}
