//! Structured error types for drk
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{RegionKind, ScanRegion};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrkError {
    #[error("External binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("Failed to run {program}: {error}")]
    SpawnFailed { program: String, error: String },

    #[error("{program} exited with {status}: {stderr}")]
    PrimitiveFailed { program: String, status: String, stderr: String },

    #[error("Malformed measurement record: {0}")]
    MalformedRecord(String),

    #[error("Malformed probe output {}:{line}: {reason}", .path.display())]
    MalformedProbeLine { path: PathBuf, line: usize, reason: String },

    #[error("Probe output is not in ascending address order at 0x{0:x}")]
    UnorderedProbeOutput(u64),

    #[error("Invalid scan region {0}")]
    InvalidScanRegion(ScanRegion),

    #[error("No mapped {0} region found in the scan window")]
    RegionNotFound(RegionKind),

    #[error("Ground truth has no entry for page 0x{0:x}")]
    GroundTruthMissing(u64),

    #[error("Malformed page table dump line {line}: {reason}")]
    MalformedGroundTruth { line: usize, reason: String },

    #[error("Malformed map line {line}: {reason}")]
    MalformedMap { line: usize, reason: String },

    #[error("Page table dump lacks the {0} section marker")]
    MissingSection(&'static str),

    #[error("Cannot evaluate accuracy of an empty record set")]
    EmptyEvaluation,

    #[error("Unknown access mode: {0}")]
    UnknownAccessMode(String),

    #[error("Unknown page label: {0}")]
    UnknownLabel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid threshold override '{0}': expected a positive number of cycles")]
    InvalidThreshold(String),

    #[error("Signature table not found: {}", .0.display())]
    SignatureTableMissing(PathBuf),

    #[error("Malformed signature table: {0}")]
    MalformedSignatureTable(String),

    #[error("Invalid iteration count {0}: at least one access per measurement is needed")]
    InvalidIterations(u32),

    #[error("Invalid layout file {}: {reason}", .path.display())]
    InvalidLayout { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {}: {error}", .path.display())]
    WriteFailed { path: PathBuf, error: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
