//! # drk - Kernel Address Space Mapping from TSX Timings
//!
//! drk turns raw TSX abort timings, taken against kernel virtual addresses,
//! into a map of the kernel address space: which pages are unmapped (U),
//! mapped but non-executable (NX), or executable (X). The map reveals the
//! KASLR slide of the kernel image and, through the sizes of code/data
//! pairs, which modules are loaded.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               External Probing Binaries (C, TSX)                │
//! │  • measure: one fixture page (nx / u / x), one access mode      │
//! │  • drk-probing: sweep of scan regions, 2 timings per page       │
//! │  • loop: busy loop pinned per core (frequency noise)            │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ records / probe output files
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       drk (This Crate)                          │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Calibrate   │──▶│    Locate    │──▶│   Classify   │         │
//! │  │ (thresholds) │   │   (bounds)   │   │   (pages)    │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │                  ┌────────────────────────────┼──────┐          │
//! │                  ▼                            ▼      │          │
//! │          ┌──────────────┐            ┌──────────────┐│          │
//! │          │   Extents    │───────────▶│  Signatures  ││          │
//! │          │    (maps)    │            │  (modules)   ││          │
//! │          └──────────────┘            └──────────────┘▼          │
//! │                                           ┌──────────────┐      │
//! │          ┌──────────────┐                 │   Accuracy   │      │
//! │          │ Ground truth │────────────────▶│  (scoring)   │      │
//! │          │ (page table) │                 └──────────────┘      │
//! │          └──────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`probe`]: the seam to the outside world
//!   - `MeasurementPrimitive` / `ProbingPrimitive` traits and their
//!     command-backed implementations
//!   - `NoiseGuard`: scoped ownership of the busy-loop workers
//!
//! - [`analysis`]: the interpretation stages, pure functions over the
//!   primitives' output
//!
//! - [`pipeline`]: runs the stages in order and collects the outcome
//!
//! - [`ground_truth`]: debugfs page-table dump and kallsyms parsing
//!
//! - [`export`]: map files, mismatch dumps and `summary.json`
//!
//! - [`config`], [`cli`], [`preflight`]: run configuration and checks
//!
//! - [`domain`]: core types (`PageLabel`, `ScanRegion`, `Extent`) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Map the kernel, write maps and score them against the page tables
//! sudo ./drk attack --bin-dir ./probes -d modules_size.json
//!
//! # Build a signature table on a machine you control
//! sudo ./drk signatures --kallsyms /proc/kallsyms -o modules_size.json
//! ```
//!
//! ## Key Concepts
//!
//! - **TSX abort timing**: a faulting access inside a transaction aborts
//!   without a trap; how long the abort takes depends on the page's state
//! - **Threshold**: cycle count separating two timing populations
//! - **Extent**: maximal run of pages sharing one label

pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod ground_truth;
pub mod pipeline;
pub mod preflight;
pub mod probe;
