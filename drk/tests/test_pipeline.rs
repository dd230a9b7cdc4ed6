use drk::analysis::{SignatureTable, ThresholdOverrides};
use drk::config::PlatformLayout;
use drk::domain::{
    AccessMode, DrkError, PageLabel, ProbePoint, ProbeTarget, RegionKind, ScanRegion, TimingSample,
};
use drk::export::{write_artifacts, SummaryReport};
use drk::ground_truth::{GroundTruthArea, PageTableDump};
use drk::pipeline::{run_attack, AttackSettings};
use drk::probe::{MeasurementPrimitive, ProbingPrimitive};
use std::cell::RefCell;
use std::time::Duration;

const KERNEL_BASE: u64 = 0xffff_ffff_8100_0000;
const KERNEL_END: u64 = 0xffff_ffff_81a0_0000;
const KERNEL_TEXT_END: u64 = 0xffff_ffff_8140_0000;
const MODULE_BASE: u64 = 0xffff_ffff_c000_3000;

/// Fixture timings giving m_th = 200 and x_th = 100
struct FixtureMeasure;

impl MeasurementPrimitive for FixtureMeasure {
    fn measure(
        &self,
        target: ProbeTarget,
        mode: AccessMode,
        _iterations: u32,
    ) -> Result<TimingSample, DrkError> {
        let elapsed_cycles = match (target, mode) {
            (ProbeTarget::NonExecutable, AccessMode::WriteMem) => 150,
            (ProbeTarget::Unmapped, AccessMode::WriteMem) => 250,
            (ProbeTarget::Executable, AccessMode::Jump) => 50,
            (ProbeTarget::Unmapped, AccessMode::Jump) => 150,
            other => panic!("unexpected fixture {other:?}"),
        };
        Ok(TimingSample { address: 0, elapsed_cycles, mode })
    }
}

/// Address space with a kernel image and, optionally, one module
struct SimulatedKernel {
    with_module: bool,
    sweeps: RefCell<Vec<(String, Vec<ScanRegion>)>>,
}

impl SimulatedKernel {
    fn new(with_module: bool) -> Self {
        Self { with_module, sweeps: RefCell::new(Vec::new()) }
    }

    fn label_of(&self, addr: u64) -> PageLabel {
        match addr {
            a if (KERNEL_BASE..KERNEL_TEXT_END).contains(&a) => PageLabel::Executable,
            a if (KERNEL_TEXT_END..KERNEL_END).contains(&a) => PageLabel::NonExecutable,
            a if self.with_module && a == MODULE_BASE => PageLabel::Executable,
            a if self.with_module && (MODULE_BASE + 0x1000..MODULE_BASE + 0x3000).contains(&a) => {
                PageLabel::NonExecutable
            }
            _ => PageLabel::Unmapped,
        }
    }
}

impl ProbingPrimitive for SimulatedKernel {
    fn sweep(
        &self,
        name: &str,
        regions: &[ScanRegion],
        _iterations: u32,
    ) -> Result<Vec<ProbePoint>, DrkError> {
        self.sweeps.borrow_mut().push((name.to_string(), regions.to_vec()));
        Ok(regions
            .iter()
            .flat_map(ScanRegion::points)
            .map(|address| {
                let (mapped_time, exec_time) = match self.label_of(address) {
                    PageLabel::Executable => (150, 50),
                    PageLabel::NonExecutable => (150, 500),
                    PageLabel::Unmapped => (300, 300),
                };
                ProbePoint { address, mapped_time, exec_time }
            })
            .collect())
    }
}

fn settings() -> AttackSettings {
    AttackSettings {
        iterations: 1000,
        repeats: 3,
        overrides: ThresholdOverrides::default(),
        layout: PlatformLayout::default(),
    }
}

fn area(start: u64, end: u64, perm: PageLabel) -> GroundTruthArea {
    GroundTruthArea { start, end, perm }
}

fn exact_ground_truth() -> PageTableDump {
    PageTableDump {
        kernel: vec![
            area(0xffff_ffff_8000_0000, KERNEL_BASE, PageLabel::Unmapped),
            area(KERNEL_BASE, KERNEL_TEXT_END, PageLabel::Executable),
            area(KERNEL_TEXT_END, KERNEL_END, PageLabel::NonExecutable),
            area(KERNEL_END, 0xffff_ffff_c000_0000, PageLabel::Unmapped),
        ],
        modules: vec![
            area(0xffff_ffff_c000_0000, MODULE_BASE, PageLabel::Unmapped),
            area(MODULE_BASE, MODULE_BASE + 0x1000, PageLabel::Executable),
            area(MODULE_BASE + 0x1000, MODULE_BASE + 0x3000, PageLabel::NonExecutable),
            area(MODULE_BASE + 0x3000, 0xffff_ffff_ff00_0000, PageLabel::Unmapped),
        ],
    }
}

#[test]
fn test_full_attack_is_exact() {
    let prober = SimulatedKernel::new(true);
    let table = SignatureTable::parse(r#"{"1000 2000": ["moduleA"]}"#).unwrap();
    let dump = exact_ground_truth();

    let outcome = run_attack(&FixtureMeasure, &prober, &settings(), Some(&table), Some(&dump)).unwrap();

    assert!((outcome.calibration.thresholds.mapped - 200.0).abs() < f64::EPSILON);
    assert!((outcome.calibration.thresholds.exec - 100.0).abs() < f64::EPSILON);

    assert_eq!(outcome.kernel.bounds.start, KERNEL_BASE);
    assert_eq!(outcome.kernel.bounds.end, KERNEL_END);
    assert_eq!(outcome.kernel.extents.len(), 2);
    assert_eq!(outcome.kernel.extents[0].start, KERNEL_BASE);
    assert_eq!(outcome.kernel.extents[0].end, KERNEL_TEXT_END);
    assert_eq!(outcome.kernel.extents[1].label, PageLabel::NonExecutable);

    let module = outcome.module.as_ref().unwrap();
    assert_eq!(module.bounds.start, MODULE_BASE);
    assert_eq!(module.bounds.end, MODULE_BASE + 0xc0_0000);

    assert_eq!(outcome.modules.unique, vec!["moduleA".to_string()]);
    assert_eq!(outcome.modules.extents[0].annotation.as_deref(), Some("moduleA"));

    let scores = outcome.scores.as_ref().unwrap();
    for (name, report) in scores.categories() {
        assert_eq!(report.wrong, 0, "{name} has mismatches");
        assert_eq!(report.correct, report.total);
        assert!((report.accuracy_pct - 100.0).abs() < f64::EPSILON);
    }
    assert_eq!(scores.categories().len(), 4);
}

#[test]
fn test_sweep_order_and_shape() {
    let prober = SimulatedKernel::new(true);
    run_attack(&FixtureMeasure, &prober, &settings(), None, None).unwrap();

    let sweeps = prober.sweeps.borrow();
    let names: Vec<&str> = sweeps.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["kernel_scan", "module_scan", "kernel", "module"]);

    // kernel: first 0x600000 bytes at 2 MiB, then page by page
    let kernel = &sweeps[2].1;
    assert_eq!(kernel[0], ScanRegion::new(KERNEL_BASE, KERNEL_BASE + 0x60_0000, 0x20_0000));
    assert_eq!(kernel[1], ScanRegion::new(KERNEL_BASE + 0x60_0000, KERNEL_END, 0x1000));
    assert_eq!(sweeps[3].1, vec![ScanRegion::new(MODULE_BASE, MODULE_BASE + 0xc0_0000, 0x1000)]);
}

#[test]
fn test_no_module_still_maps_kernel() {
    let prober = SimulatedKernel::new(false);
    let dump = exact_ground_truth();
    let outcome = run_attack(&FixtureMeasure, &prober, &settings(), None, Some(&dump)).unwrap();

    assert!(outcome.module.is_none());
    assert!(outcome.modules.extents.is_empty());
    let scores = outcome.scores.unwrap();
    assert!(scores.kernel_x.is_some());
    assert!(scores.module_x.is_none());
}

#[test]
fn test_threshold_overrides_skip_calibration() {
    struct NoMeasure;
    impl MeasurementPrimitive for NoMeasure {
        fn measure(&self, _: ProbeTarget, _: AccessMode, _: u32) -> Result<TimingSample, DrkError> {
            Err(DrkError::MalformedRecord("should not be called".to_string()))
        }
    }

    let mut s = settings();
    s.overrides = ThresholdOverrides { mapped: Some(200.0), exec: Some(100.0) };
    let outcome = run_attack(&NoMeasure, &SimulatedKernel::new(true), &s, None, None).unwrap();
    assert_eq!(outcome.kernel.bounds.start, KERNEL_BASE);
    assert!(outcome.scores.is_none());
}

#[test]
fn test_missing_kernel_aborts() {
    struct Empty;
    impl ProbingPrimitive for Empty {
        fn sweep(&self, _: &str, regions: &[ScanRegion], _: u32) -> Result<Vec<ProbePoint>, DrkError> {
            Ok(regions
                .iter()
                .flat_map(ScanRegion::points)
                .map(|address| ProbePoint { address, mapped_time: 400, exec_time: 400 })
                .collect())
        }
    }

    let err = run_attack(&FixtureMeasure, &Empty, &settings(), None, None).unwrap_err();
    assert!(matches!(err, DrkError::RegionNotFound(RegionKind::Kernel)));
}

#[test]
fn test_wrong_ground_truth_is_reported() {
    let prober = SimulatedKernel::new(true);
    let mut dump = exact_ground_truth();
    // claim the module code page is data
    dump.modules[1].perm = PageLabel::NonExecutable;

    let outcome = run_attack(&FixtureMeasure, &prober, &settings(), None, Some(&dump)).unwrap();
    let scores = outcome.scores.unwrap();

    let module_x = scores.module_x.unwrap();
    assert_eq!(module_x.wrong, 1);
    assert_eq!(module_x.mismatches[0].record.address, MODULE_BASE);
    assert_eq!(module_x.mismatches[0].derived, PageLabel::Executable);
    assert_eq!(module_x.mismatches[0].expected, PageLabel::NonExecutable);
    assert_eq!(scores.module_m.unwrap().wrong, 0);
}

#[test]
fn test_ground_truth_gap_is_fatal() {
    let prober = SimulatedKernel::new(true);
    let mut dump = exact_ground_truth();
    dump.modules.pop();

    let err = run_attack(&FixtureMeasure, &prober, &settings(), None, Some(&dump)).unwrap_err();
    assert!(matches!(err, DrkError::GroundTruthMissing(a) if a == MODULE_BASE + 0x3000));
}

#[test]
fn test_artifacts_written() {
    let prober = SimulatedKernel::new(true);
    let table = SignatureTable::parse(r#"{"1000 2000": ["moduleA"]}"#).unwrap();
    let dump = exact_ground_truth();
    let outcome = run_attack(&FixtureMeasure, &prober, &settings(), Some(&table), Some(&dump)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = write_artifacts(dir.path(), &outcome).unwrap();
    assert_eq!(written.len(), 6);

    let kernel_map = std::fs::read_to_string(dir.path().join("kernel_map")).unwrap();
    assert_eq!(
        kernel_map,
        "Generated by DrK\n\
         0xffffffff81000000-0xffffffff81400000 X\n\
         0xffffffff81400000-0xffffffff819ff000 NX\n"
    );

    let module_map = std::fs::read_to_string(dir.path().join("module_map")).unwrap();
    assert!(module_map.contains("0xffffffffc0003000-0xffffffffc0004000 X moduleA\n"));

    for name in ["kernel_m", "kernel_x", "module_m", "module_x"] {
        assert_eq!(std::fs::read_to_string(dir.path().join(name)).unwrap(), "");
    }

    let summary = SummaryReport::new(&outcome, Duration::from_secs(3));
    assert_eq!(summary.unique_modules, vec!["moduleA".to_string()]);
    assert_eq!(summary.accuracy.len(), 4);
}
