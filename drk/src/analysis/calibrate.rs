//! Threshold calibration
//!
//! Each threshold is the midpoint between the fastest observed timing of two
//! fixture pages in opposite states:
//!
//! ```text
//! m_th = (writemem on mapped NX page + writemem on unmapped page) / 2
//! x_th = (jmp on executable page     + jmp on unmapped page)      / 2
//! ```
//!
//! Interrupts and contention only ever make an access slower, so the
//! minimum over repeated measurements is the value closest to the signal.

#![allow(clippy::cast_precision_loss)]

use crate::config::MIN_ITERATIONS;
use crate::domain::{AccessMode, DrkError, ProbeTarget, Thresholds, TimingSample};
use crate::probe::MeasurementPrimitive;
use log::{debug, info};

/// Caller-supplied thresholds that bypass measurement
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThresholdOverrides {
    pub mapped: Option<f64>,
    pub exec: Option<f64>,
}

/// Fastest sample of each fixture; `None` where an override skipped measuring
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationSamples {
    pub mapped_write: Option<TimingSample>,
    pub unmapped_write: Option<TimingSample>,
    pub exec_jump: Option<TimingSample>,
    pub unmapped_jump: Option<TimingSample>,
}

#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub thresholds: Thresholds,
    pub samples: CalibrationSamples,
    /// Accesses per measurement actually used
    pub iterations: u32,
}

/// Midpoint of two timings, exact for any pair of cycle counts below 2^53.
#[must_use]
pub fn midpoint(a: u64, b: u64) -> f64 {
    (a as f64 + b as f64) / 2.0
}

/// Fastest of `samples`; the earliest one wins a tie.
#[must_use]
pub fn select_minimum(samples: &[TimingSample]) -> Option<TimingSample> {
    samples.iter().copied().reduce(|best, s| if s.elapsed_cycles < best.elapsed_cycles { s } else { best })
}

/// Measure `target` `repeats` times and keep the fastest run.
pub fn min_of_repeats<M: MeasurementPrimitive + ?Sized>(
    primitive: &M,
    target: ProbeTarget,
    mode: AccessMode,
    iterations: u32,
    repeats: u32,
) -> Result<TimingSample, DrkError> {
    let samples = (0..repeats.max(1))
        .map(|_| primitive.measure(target, mode, iterations))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        "{target}/{mode}: {:?}",
        samples.iter().map(|s| s.elapsed_cycles).collect::<Vec<_>>()
    );
    select_minimum(&samples)
        .ok_or_else(|| DrkError::MalformedRecord(format!("no samples for {target}/{mode}")))
}

/// Derive both thresholds.
///
/// `iterations` below [`MIN_ITERATIONS`] is raised to it. A threshold with an
/// override is taken as is and its fixtures are never measured.
pub fn calibrate<M: MeasurementPrimitive + ?Sized>(
    primitive: &M,
    iterations: u32,
    repeats: u32,
    overrides: ThresholdOverrides,
) -> Result<Calibration, DrkError> {
    let iterations = if iterations < MIN_ITERATIONS {
        debug!("Raising calibration iterations from {iterations} to {MIN_ITERATIONS}");
        MIN_ITERATIONS
    } else {
        iterations
    };

    let mut samples = CalibrationSamples::default();

    let mapped = match overrides.mapped {
        Some(value) => {
            info!("Using M threshold override {value}");
            value
        }
        None => {
            let m = min_of_repeats(
                primitive,
                ProbeTarget::NonExecutable,
                AccessMode::WriteMem,
                iterations,
                repeats,
            )?;
            let u = min_of_repeats(
                primitive,
                ProbeTarget::Unmapped,
                AccessMode::WriteMem,
                iterations,
                repeats,
            )?;
            samples.mapped_write = Some(m);
            samples.unmapped_write = Some(u);
            midpoint(m.elapsed_cycles, u.elapsed_cycles)
        }
    };

    let exec = match overrides.exec {
        Some(value) => {
            info!("Using X threshold override {value}");
            value
        }
        None => {
            let x = min_of_repeats(
                primitive,
                ProbeTarget::Executable,
                AccessMode::Jump,
                iterations,
                repeats,
            )?;
            let u =
                min_of_repeats(primitive, ProbeTarget::Unmapped, AccessMode::Jump, iterations, repeats)?;
            samples.exec_jump = Some(x);
            samples.unmapped_jump = Some(u);
            midpoint(x.elapsed_cycles, u.elapsed_cycles)
        }
    };

    Ok(Calibration { thresholds: Thresholds { mapped, exec }, samples, iterations })
}
