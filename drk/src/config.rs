//! Run configuration and platform layout constants
//!
//! `PlatformLayout` carries the address-space windows the locator sweeps and
//! the shape of the dense scans. The defaults are the Linux x86-64 values;
//! a JSON file can override any subset of them.

use crate::cli::AttackArgs;
use crate::domain::{ConfigError, RegionKind, ScanRegion, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Calibration never runs with fewer accesses per measurement than this
pub const MIN_ITERATIONS: u32 = 1000;

/// Signature table looked up when `--data` is not given
pub const DEFAULT_SIGNATURE_TABLE: &str = "modules_size.json";

/// Debugfs page-table dump used as ground truth
pub const DEFAULT_GROUND_TRUTH: &str = "/sys/kernel/debug/kernel_page_tables";

/// Core the probing primitives are pinned to by default
pub const DEFAULT_PROBE_CPU: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformLayout {
    /// Window swept to find the kernel image (2 MiB aligned)
    pub kernel_window: ScanRegion,
    /// Window swept to find the first loaded module
    pub module_window: ScanRegion,
    /// Bytes past the kernel base probed at `kernel_coarse_align`
    pub kernel_coarse_span: u64,
    pub kernel_coarse_align: u64,
    /// Bytes past the module base covered by the dense module scan
    pub module_scan_span: u64,
    /// Step of every fine-grained scan
    pub page_align: u64,
}

impl Default for PlatformLayout {
    fn default() -> Self {
        Self {
            kernel_window: ScanRegion::new(0xffff_ffff_8000_0000, 0xffff_ffff_c000_0000, 0x20_0000),
            module_window: ScanRegion::new(0xffff_ffff_c000_0000, 0xffff_ffff_c040_0000, PAGE_SIZE),
            kernel_coarse_span: 0x60_0000,
            kernel_coarse_align: 0x20_0000,
            module_scan_span: 0xc0_0000,
            page_align: PAGE_SIZE,
        }
    }
}

impl PlatformLayout {
    /// Load a layout override; fields absent from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidLayout {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let layout: PlatformLayout = serde_json::from_str(&content).map_err(|e| {
            ConfigError::InvalidLayout { path: path.to_path_buf(), reason: e.to_string() }
        })?;
        layout.validate().map_err(|reason| ConfigError::InvalidLayout {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(layout)
    }

    fn validate(&self) -> Result<(), String> {
        for (name, window) in [("kernel_window", self.kernel_window), ("module_window", self.module_window)]
        {
            window.validate().map_err(|e| format!("{name}: {e}"))?;
        }
        if self.kernel_coarse_align == 0 || self.page_align == 0 {
            return Err("alignments must be non-zero".to_string());
        }
        Ok(())
    }

    /// Coarse window the locator sweeps for `kind`
    #[must_use]
    pub fn window(&self, kind: RegionKind) -> ScanRegion {
        match kind {
            RegionKind::Kernel => self.kernel_window,
            RegionKind::Module => self.module_window,
        }
    }

    /// Dense scan of the kernel image: the first few large pages at 2 MiB
    /// granularity, the rest page by page.
    #[must_use]
    pub fn kernel_dense_regions(&self, base: u64, end: u64) -> Vec<ScanRegion> {
        let coarse_end = base.saturating_add(self.kernel_coarse_span).min(end);
        let mut regions = vec![ScanRegion::new(base, coarse_end, self.kernel_coarse_align)];
        if coarse_end < end {
            regions.push(ScanRegion::new(coarse_end, end, self.page_align));
        }
        regions
    }

    /// Dense scan of the module area starting at the first loaded module.
    #[must_use]
    pub fn module_dense_regions(&self, base: u64) -> Vec<ScanRegion> {
        vec![ScanRegion::new(base, base.saturating_add(self.module_scan_span), self.page_align)]
    }

    /// End of the module area covered by the dense scan
    #[must_use]
    pub fn module_scan_end(&self, base: u64) -> u64 {
        base.saturating_add(self.module_scan_span)
    }
}

/// Parse a threshold override given on the command line.
pub fn parse_threshold(s: &str) -> Result<f64, ConfigError> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::InvalidThreshold(s.to_string())),
    }
}

/// Locations of the external binaries
#[derive(Debug, Clone)]
pub struct Binaries {
    pub measure: PathBuf,
    pub prober: PathBuf,
    pub busy_loop: PathBuf,
}

impl Binaries {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            measure: dir.join("measure"),
            prober: dir.join("drk-probing"),
            busy_loop: dir.join("loop"),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.measure, &self.prober, &self.busy_loop]
    }
}

/// Validated configuration of one attack run, fixed before measuring
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub iterations: u32,
    pub repeats: u32,
    pub m_threshold: Option<f64>,
    pub x_threshold: Option<f64>,
    pub outdir: PathBuf,
    pub loops: usize,
    pub signature_table: Option<PathBuf>,
    pub binaries: Binaries,
    pub probe_cpu: Option<u32>,
    pub ground_truth: PathBuf,
    pub layout: PlatformLayout,
    pub skip_preflight: bool,
    pub quiet: bool,
}

impl RunConfig {
    /// Build the run configuration, surfacing every configuration error
    /// before any measurement starts.
    ///
    /// `default_loops` is used when `--loops` was not given.
    pub fn from_args(args: &AttackArgs, default_loops: usize) -> Result<Self, ConfigError> {
        if args.iter == 0 {
            return Err(ConfigError::InvalidIterations(args.iter));
        }

        let signature_table = match args.data {
            Some(ref path) if !path.is_file() => {
                return Err(ConfigError::SignatureTableMissing(path.clone()));
            }
            Some(ref path) => Some(path.clone()),
            None => {
                let default = PathBuf::from(DEFAULT_SIGNATURE_TABLE);
                if default.is_file() {
                    Some(default)
                } else {
                    log::warn!(
                        "{DEFAULT_SIGNATURE_TABLE} not found, module map will not be annotated"
                    );
                    None
                }
            }
        };

        let layout = match args.layout {
            Some(ref path) => PlatformLayout::load(path)?,
            None => PlatformLayout::default(),
        };

        Ok(Self {
            iterations: args.iter,
            repeats: args.repeats.max(1),
            m_threshold: args.m_threshold,
            x_threshold: args.x_threshold,
            outdir: args.outdir.clone(),
            loops: args.loops.unwrap_or(default_loops),
            signature_table,
            binaries: Binaries::in_dir(&args.bin_dir),
            probe_cpu: if args.no_pin { None } else { Some(args.probe_cpu) },
            ground_truth: args.ground_truth.clone(),
            layout,
            skip_preflight: args.skip_preflight,
            quiet: args.quiet,
        })
    }

    /// Path of an output artifact inside the output directory
    #[must_use]
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.outdir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_layout_matches_linux() {
        let layout = PlatformLayout::default();
        assert_eq!(layout.window(RegionKind::Kernel).start, 0xffff_ffff_8000_0000);
        assert_eq!(layout.window(RegionKind::Kernel).align, 0x20_0000);
        assert_eq!(layout.window(RegionKind::Module).end, 0xffff_ffff_c040_0000);
        assert_eq!(layout.window(RegionKind::Module).align, 0x1000);
    }

    #[test]
    fn test_kernel_dense_regions() {
        let layout = PlatformLayout::default();
        let regions = layout.kernel_dense_regions(0xffff_ffff_8100_0000, 0xffff_ffff_8300_0000);
        assert_eq!(
            regions,
            vec![
                ScanRegion::new(0xffff_ffff_8100_0000, 0xffff_ffff_8160_0000, 0x20_0000),
                ScanRegion::new(0xffff_ffff_8160_0000, 0xffff_ffff_8300_0000, 0x1000),
            ]
        );
    }

    #[test]
    fn test_kernel_dense_regions_short_image() {
        let layout = PlatformLayout::default();
        let regions = layout.kernel_dense_regions(0xffff_ffff_8100_0000, 0xffff_ffff_8120_0000);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].end, 0xffff_ffff_8120_0000);
    }

    #[test]
    fn test_module_dense_regions() {
        let layout = PlatformLayout::default();
        let regions = layout.module_dense_regions(0xffff_ffff_c000_2000);
        assert_eq!(regions, vec![ScanRegion::new(0xffff_ffff_c000_2000, 0xffff_ffff_c0c0_2000, 0x1000)]);
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("180").unwrap(), 180.0);
        assert_eq!(parse_threshold("212.5").unwrap(), 212.5);
        assert!(parse_threshold("0").is_err());
        assert!(parse_threshold("-4").is_err());
        assert!(parse_threshold("fast").is_err());
        assert!(parse_threshold("NaN").is_err());
    }

    #[test]
    fn test_layout_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"module_scan_span": 4096}}"#).unwrap();
        let layout = PlatformLayout::load(file.path()).unwrap();
        assert_eq!(layout.module_scan_span, 4096);
        assert_eq!(layout.kernel_coarse_span, 0x60_0000);
    }

    #[test]
    fn test_layout_rejects_unknown_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"kernel_span": 4096}}"#).unwrap();
        assert!(PlatformLayout::load(file.path()).is_err());
    }

    #[test]
    fn test_layout_missing_file_is_invalid_layout() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlatformLayout::load(&dir.path().join("layout.json")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLayout { .. }));
        assert!(err.to_string().starts_with("Invalid layout file"));
    }

    #[test]
    fn test_layout_rejects_zero_align() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"page_align": 0}}"#).unwrap();
        assert!(PlatformLayout::load(file.path()).is_err());
    }

    fn attack_args(extra: &[&str]) -> AttackArgs {
        use crate::cli::{Args, Command};
        use clap::Parser;

        let argv = ["drk", "attack"].into_iter().chain(extra.iter().copied());
        match Args::try_parse_from(argv).unwrap().command {
            Command::Attack(args) => args,
            Command::Signatures(_) => panic!("expected attack subcommand"),
        }
    }

    #[test]
    fn test_run_config_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("sigs.json");
        std::fs::write(&table, "{}").unwrap();

        let args = attack_args(&["-d", table.to_str().unwrap(), "--no-pin", "-o", "out"]);
        let config = RunConfig::from_args(&args, 2).unwrap();
        assert_eq!(config.signature_table.as_deref(), Some(table.as_path()));
        assert_eq!(config.probe_cpu, None);
        assert_eq!(config.loops, 2);
        assert_eq!(config.artifact("kernel_map"), PathBuf::from("out/kernel_map"));
    }

    #[test]
    fn test_run_config_missing_table_is_error() {
        let args = attack_args(&["-d", "/nonexistent/modules_size.json"]);
        let err = RunConfig::from_args(&args, 2).unwrap_err();
        assert!(matches!(err, ConfigError::SignatureTableMissing(_)));
    }

    #[test]
    fn test_run_config_zero_iterations() {
        let err = RunConfig::from_args(&attack_args(&["--iter", "0"]), 2).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIterations(0)));
    }
}
