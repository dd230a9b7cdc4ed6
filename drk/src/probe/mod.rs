//! External measurement plumbing
//!
//! The pipeline never touches the side channel itself. Two external binaries
//! do: `measure` times one fixture page, `drk-probing` sweeps address ranges.
//! This module wraps them behind traits so the analysis stages can be driven
//! by fakes in tests:
//! - `measure`: strict parser for single measurement records
//! - `sweep`: scan-description writer and probe output parser
//! - `noise`: busy-loop workers that keep the cores at full clock
//! - `cpu_utils`: online CPU discovery

pub mod cpu_utils;
pub mod measure;
pub mod noise;
pub mod sweep;

use crate::domain::{AccessMode, DrkError, ProbePoint, ProbeTarget, ScanRegion, TimingSample};
use std::path::Path;
use std::process::Command;

pub use cpu_utils::{default_worker_count, online_cpus, worker_cpus};
pub use measure::{parse_measure_record, CommandMeasure};
pub use noise::{worker_assignment, NoiseGuard};
pub use sweep::{parse_probe_output, write_scan_file, CommandProber};

/// Single-address timing primitive
pub trait MeasurementPrimitive {
    /// Time `iterations` accesses of kind `mode` against the fixture page
    /// `target` and return the fastest one.
    fn measure(
        &self,
        target: ProbeTarget,
        mode: AccessMode,
        iterations: u32,
    ) -> Result<TimingSample, DrkError>;
}

/// Batch page-sweep primitive
pub trait ProbingPrimitive {
    /// Probe every point of `regions` once, in the order given.
    ///
    /// `name` identifies the pass; command-backed implementations use it as
    /// the basename of their scan and output files.
    fn sweep(
        &self,
        name: &str,
        regions: &[ScanRegion],
        iterations: u32,
    ) -> Result<Vec<ProbePoint>, DrkError>;
}

/// Build a command for `program`, pinned to `cpu` through `taskset` when given.
pub(crate) fn pinned_command(program: &Path, cpu: Option<u32>) -> Command {
    match cpu {
        Some(cpu) => {
            let mut cmd = Command::new("taskset");
            cmd.arg("-c").arg(cpu.to_string()).arg(program);
            cmd
        }
        None => Command::new(program),
    }
}

/// Run `cmd` to completion and return its stdout.
pub(crate) fn run_to_completion(cmd: &mut Command, program: &Path) -> Result<String, DrkError> {
    let name = program.display().to_string();
    let output = cmd
        .output()
        .map_err(|e| DrkError::SpawnFailed { program: name.clone(), error: e.to_string() })?;

    if !output.status.success() {
        return Err(DrkError::PrimitiveFailed {
            program: name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
