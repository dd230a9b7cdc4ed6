//! Domain types shared by every pipeline stage
//!
//! Addresses and cycle counts stay plain `u64`; the enums and records below
//! carry the meaning. Everything here is immutable once built: stages take
//! slices and return fresh vectors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DrkError;

/// Page granularity of the probed address space
pub const PAGE_SIZE: u64 = 0x1000;

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Access performed by the measurement primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    ReadMem,
    WriteMem,
    Jump,
}

impl AccessMode {
    /// Spelling understood by the `measure` binary
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            AccessMode::ReadMem => "readmem",
            AccessMode::WriteMem => "writemem",
            AccessMode::Jump => "jmp",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for AccessMode {
    type Err = DrkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readmem" => Ok(AccessMode::ReadMem),
            "writemem" => Ok(AccessMode::WriteMem),
            "jmp" => Ok(AccessMode::Jump),
            other => Err(DrkError::UnknownAccessMode(other.to_string())),
        }
    }
}

/// Fixture page the measurement primitive selects by privilege class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeTarget {
    /// Freshly mapped RWX page filled with `ud2`
    Executable,
    /// Read-only, mapped, non-executable page
    NonExecutable,
    /// Kernel address that is never mapped
    Unmapped,
}

impl ProbeTarget {
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            ProbeTarget::Executable => "x",
            ProbeTarget::NonExecutable => "nx",
            ProbeTarget::Unmapped => "u",
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// One result of the single-address measurement primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    pub address: u64,
    pub elapsed_cycles: u64,
    pub mode: AccessMode,
}

/// The two calibrated decision thresholds, in cycles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Mapped / Unmapped boundary (`m_th`)
    pub mapped: f64,
    /// Executable / Non-executable boundary (`x_th`)
    pub exec: f64,
}

/// Ternary classification of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageLabel {
    #[serde(rename = "U")]
    Unmapped,
    #[serde(rename = "NX")]
    NonExecutable,
    #[serde(rename = "X")]
    Executable,
}

impl PageLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PageLabel::Unmapped => "U",
            PageLabel::NonExecutable => "NX",
            PageLabel::Executable => "X",
        }
    }

    /// Project a label onto the label space of `mode`.
    ///
    /// In mapped-only mode the executable bit is unknown, so `X` folds into `NX`.
    #[must_use]
    pub fn collapse(self, mode: ClassifyMode) -> PageLabel {
        match (mode, self) {
            (ClassifyMode::MappedOnly, PageLabel::Executable) => PageLabel::NonExecutable,
            (_, label) => label,
        }
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageLabel {
    type Err = DrkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "U" => Ok(PageLabel::Unmapped),
            "NX" => Ok(PageLabel::NonExecutable),
            "X" => Ok(PageLabel::Executable),
            other => Err(DrkError::UnknownLabel(other.to_string())),
        }
    }
}

/// Label space used when deriving or comparing labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyMode {
    /// `{U, NX, X}`
    #[default]
    Full,
    /// `{U, NX}`: the executable test is ignored
    MappedOnly,
}

/// Which part of the kernel address space a stage is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Kernel,
    Module,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Kernel => f.write_str("kernel"),
            RegionKind::Module => f.write_str("module"),
        }
    }
}

/// One contiguous span `[start, end)` probed every `align` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRegion {
    pub start: u64,
    pub end: u64,
    pub align: u64,
}

impl ScanRegion {
    #[must_use]
    pub fn new(start: u64, end: u64, align: u64) -> Self {
        Self { start, end, align }
    }

    /// Number of points the probing primitive will emit for this region
    #[must_use]
    pub fn probe_count(&self) -> u64 {
        if self.align == 0 || self.end <= self.start {
            return 0;
        }
        (self.end - self.start).div_ceil(self.align)
    }

    /// Addresses the probing primitive visits, in order
    pub fn points(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.probe_count()).map(move |i| self.start + i * self.align)
    }

    /// Reject regions the probing primitive would loop on or skip silently.
    pub fn validate(&self) -> Result<(), DrkError> {
        if self.align == 0 || self.end < self.start {
            return Err(DrkError::InvalidScanRegion(*self));
        }
        Ok(())
    }
}

impl fmt::Display for ScanRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}-0x{:x} step 0x{:x}", self.start, self.end, self.align)
    }
}

/// Raw per-point output of the probing primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePoint {
    pub address: u64,
    pub mapped_time: u64,
    pub exec_time: u64,
}

/// A probed page together with its derived label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub address: u64,
    pub mapped_time: u64,
    pub exec_time: u64,
    pub label: PageLabel,
}

/// Maximal run of equally labeled pages
///
/// `end` is the address of the first record of the next extent, or of the
/// last record for the final extent of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
    pub label: PageLabel,
    pub annotation: Option<String>,
}

impl Extent {
    #[must_use]
    pub fn new(start: u64, end: u64, label: PageLabel) -> Self {
        Self { start, end, label, annotation: None }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}-0x{:016x} {}", self.start, self.end, self.label)?;
        if let Some(ref names) = self.annotation {
            write!(f, " {names}")?;
        }
        Ok(())
    }
}
