//! Domain model for drk
//!
//! This module contains core domain types and errors that provide:
//! - Typed labels and access modes instead of loose strings
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{
    AccessMode, ClassifyMode, CpuId, Extent, PageLabel, PageRecord, ProbePoint, ProbeTarget,
    RegionKind, ScanRegion, Thresholds, TimingSample, PAGE_SIZE,
};

pub use errors::{ConfigError, DrkError, ExportError};
