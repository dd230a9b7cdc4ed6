//! Single measurement primitive
//!
//! `measure` prints one record per invocation:
//!
//! ```text
//! {
//!  'addr': 0x7f3c2a1f6000,
//!  'iter': 1000,
//!  'time': 212,
//!  'mode': 'writemem',
//! }
//! ```
//!
//! The record is parsed against a fixed schema. Unknown keys, repeated keys,
//! a missing `time` or `mode` and unparsable values are all errors; `addr`
//! and `iter` are informational.

use super::{pinned_command, run_to_completion, MeasurementPrimitive};
use crate::domain::{AccessMode, DrkError, ProbeTarget, TimingSample};
use log::debug;
use std::path::PathBuf;

/// `measure` binary driven through `std::process::Command`
#[derive(Debug, Clone)]
pub struct CommandMeasure {
    binary: PathBuf,
    cpu: Option<u32>,
}

impl CommandMeasure {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, cpu: Option<u32>) -> Self {
        Self { binary: binary.into(), cpu }
    }
}

impl MeasurementPrimitive for CommandMeasure {
    fn measure(
        &self,
        target: ProbeTarget,
        mode: AccessMode,
        iterations: u32,
    ) -> Result<TimingSample, DrkError> {
        if !self.binary.is_file() {
            return Err(DrkError::BinaryNotFound(self.binary.clone()));
        }

        let mut cmd = pinned_command(&self.binary, self.cpu);
        cmd.arg("-t")
            .arg(target.as_arg())
            .arg("-m")
            .arg(mode.as_arg())
            .arg("-i")
            .arg(iterations.to_string());
        debug!("measure -t {target} -m {mode} -i {iterations}");

        let stdout = run_to_completion(&mut cmd, &self.binary)?;
        let sample = parse_measure_record(&stdout)?;
        if sample.mode != mode {
            return Err(DrkError::MalformedRecord(format!(
                "requested mode {mode}, record reports {}",
                sample.mode
            )));
        }
        Ok(sample)
    }
}

/// Parse the record printed by `measure`.
pub fn parse_measure_record(text: &str) -> Result<TimingSample, DrkError> {
    let body = text
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| malformed("record is not enclosed in braces"))?;

    let mut addr = None;
    let mut time = None;
    let mut mode = None;
    let mut iter = None;

    for entry in body.split([',', '\n']).map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) =
            entry.split_once(':').ok_or_else(|| malformed(&format!("no ':' in '{entry}'")))?;
        let key = unquote(key.trim()).ok_or_else(|| malformed(&format!("unquoted key {key}")))?;
        let value = value.trim();

        let duplicate = match key {
            "addr" => addr.replace(parse_address(value)?).is_some(),
            "time" => time.replace(parse_decimal(key, value)?).is_some(),
            "iter" => iter.replace(parse_decimal(key, value)?).is_some(),
            "mode" => {
                let raw = unquote(value)
                    .ok_or_else(|| malformed(&format!("unquoted mode {value}")))?;
                mode.replace(raw.parse::<AccessMode>()?).is_some()
            }
            other => return Err(malformed(&format!("unknown key '{other}'"))),
        };
        if duplicate {
            return Err(malformed(&format!("duplicate key '{key}'")));
        }
    }

    Ok(TimingSample {
        address: addr.unwrap_or(0),
        elapsed_cycles: time.ok_or_else(|| malformed("missing 'time'"))?,
        mode: mode.ok_or_else(|| malformed("missing 'mode'"))?,
    })
}

fn malformed(reason: &str) -> DrkError {
    DrkError::MalformedRecord(reason.to_string())
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')))
}

/// `%p` output: `0x...` or `(nil)` for the null pointer
fn parse_address(value: &str) -> Result<u64, DrkError> {
    if value == "(nil)" {
        return Ok(0);
    }
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| malformed(&format!("address '{value}' lacks 0x prefix")))?;
    u64::from_str_radix(digits, 16).map_err(|e| malformed(&format!("address '{value}': {e}")))
}

fn parse_decimal(key: &str, value: &str) -> Result<u64, DrkError> {
    value.parse::<u64>().map_err(|e| malformed(&format!("'{key}' value '{value}': {e}")))
}
