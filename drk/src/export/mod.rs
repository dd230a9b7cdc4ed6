//! Run artifacts
//!
//! Everything lands in the output directory and replaces files of the same
//! name from earlier runs:
//! - `kernel_map`, `module_map`: rendered extent maps
//! - `kernel_m`, `kernel_x`, `module_m`, `module_x`: mismatching pages
//! - `summary.json`: thresholds, bounds, accuracy, identified modules

pub mod maps;
pub mod summary;

pub use maps::{render_mismatches, write_artifacts, write_map, write_mismatches};
pub use summary::{SummaryReport, SUMMARY_FILE};
