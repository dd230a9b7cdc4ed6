//! Batch probing primitive
//!
//! `drk-probing` reads a scan description (three hex lines per region:
//! start, end, step) and writes `<basename>_<iterations>_<run>` with a
//! header line followed by `address mapped_time exec_time` per probed point.

use super::{pinned_command, run_to_completion, ProbingPrimitive};
use crate::domain::{DrkError, ProbePoint, ScanRegion};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// `drk-probing` binary driven through `std::process::Command`
#[derive(Debug, Clone)]
pub struct CommandProber {
    binary: PathBuf,
    cpu: Option<u32>,
    workdir: PathBuf,
}

impl CommandProber {
    /// Scan descriptions and probe outputs are written into `workdir`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, cpu: Option<u32>, workdir: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into(), cpu, workdir: workdir.into() }
    }

    /// Output file written by the first (and only) run of a pass
    #[must_use]
    pub fn output_path(&self, name: &str, iterations: u32) -> PathBuf {
        self.workdir.join(format!("{name}_{iterations}_0"))
    }
}

impl ProbingPrimitive for CommandProber {
    fn sweep(
        &self,
        name: &str,
        regions: &[ScanRegion],
        iterations: u32,
    ) -> Result<Vec<ProbePoint>, DrkError> {
        if !self.binary.is_file() {
            return Err(DrkError::BinaryNotFound(self.binary.clone()));
        }

        let scan_path = self.workdir.join(name);
        write_scan_file(&scan_path, regions)?;

        let output_path = self.output_path(name, iterations);
        // A stale file from an earlier run must never be mistaken for this one
        if output_path.exists() {
            fs::remove_file(&output_path)?;
        }

        let mut cmd = pinned_command(&self.binary, self.cpu);
        cmd.arg("-f")
            .arg(&scan_path)
            .arg("-r")
            .arg("1")
            .arg("-i")
            .arg(iterations.to_string())
            .arg("-o")
            .arg(&scan_path);

        let started = Instant::now();
        let stdout = run_to_completion(&mut cmd, &self.binary)?;
        debug!("{} stdout: {}", self.binary.display(), stdout.trim());
        info!("{name}: probed {} regions in {} ms", regions.len(), started.elapsed().as_millis());

        let content = fs::read_to_string(&output_path)?;
        parse_probe_output(&output_path, &content)
    }
}

/// Write the scan description consumed by `drk-probing`.
pub fn write_scan_file(path: &Path, regions: &[ScanRegion]) -> Result<(), DrkError> {
    let content = regions
        .iter()
        .map(|region| {
            region.validate()?;
            Ok(format!("{:x}\n{:x}\n{:x}\n", region.start, region.end, region.align))
        })
        .collect::<Result<String, DrkError>>()?;
    fs::write(path, content)?;
    Ok(())
}

/// Parse a probe output file. The first line is a header and is discarded.
///
/// `path` only labels errors.
pub fn parse_probe_output(path: &Path, content: &str) -> Result<Vec<ProbePoint>, DrkError> {
    let mut points = Vec::new();

    for (idx, line) in content.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let bad = |reason: String| DrkError::MalformedProbeLine {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[addr, mapped, exec] = fields.as_slice() else {
            return Err(bad(format!("expected 3 fields, found {}", fields.len())));
        };

        let digits = addr.strip_prefix("0x").unwrap_or(addr);
        let address = u64::from_str_radix(digits, 16)
            .map_err(|e| bad(format!("address '{addr}': {e}")))?;
        let mapped_time =
            mapped.parse::<u64>().map_err(|e| bad(format!("mapped time '{mapped}': {e}")))?;
        let exec_time = exec.parse::<u64>().map_err(|e| bad(format!("exec time '{exec}': {e}")))?;

        points.push(ProbePoint { address, mapped_time, exec_time });
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_scan_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_kernel");
        let regions = [
            ScanRegion::new(0xffff_ffff_8100_0000, 0xffff_ffff_8160_0000, 0x20_0000),
            ScanRegion::new(0xffff_ffff_8160_0000, 0xffff_ffff_8300_0000, 0x1000),
        ];
        write_scan_file(&path, &regions).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "ffffffff81000000\nffffffff81600000\n200000\n\
             ffffffff81600000\nffffffff83000000\n1000\n"
        );
    }

    #[test]
    fn test_write_scan_file_rejects_zero_step() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_scan_file(&dir.path().join("scan"), &[ScanRegion::new(0, 0x1000, 0)])
            .unwrap_err();
        assert!(matches!(err, DrkError::InvalidScanRegion(_)));
    }

    #[test]
    fn test_parse_probe_output() {
        let content = "Elapsed Time: 123456\n\
                       0xffffffffc0000000 310 305\n\
                       0xffffffffc0001000 182 171\n\
                       ffffffffc0002000 180 240\n\n";
        let points = parse_probe_output(Path::new("scan_module_1000_0"), content).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(
            points[1],
            ProbePoint { address: 0xffff_ffff_c000_1000, mapped_time: 182, exec_time: 171 }
        );
        assert_eq!(points[2].address, 0xffff_ffff_c000_2000);
    }

    #[test]
    fn test_parse_probe_output_header_only() {
        let points = parse_probe_output(Path::new("out"), "Elapsed Time: 5\n").unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_parse_probe_output_reports_line() {
        let content = "Elapsed Time: 1\n0x1000 10 20\n0x2000 ten 20\n";
        let err = parse_probe_output(Path::new("scan_kernel_1000_0"), content).unwrap_err();
        match err {
            DrkError::MalformedProbeLine { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_parse_probe_output_wrong_arity() {
        let content = "header\n0x1000 10\n";
        assert!(parse_probe_output(Path::new("out"), content).is_err());
    }

    #[test]
    fn test_missing_prober_binary() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CommandProber::new(dir.path().join("drk-probing"), None, dir.path());
        let err = prober.sweep("scan_module", &[], 1000).unwrap_err();
        assert!(matches!(err, DrkError::BinaryNotFound(_)));
    }

    #[test]
    fn test_output_path_naming() {
        let prober = CommandProber::new("drk-probing", None, "/tmp/run");
        assert_eq!(prober.output_path("scan_kernel", 1000), PathBuf::from("/tmp/run/scan_kernel_1000_0"));
    }
}
