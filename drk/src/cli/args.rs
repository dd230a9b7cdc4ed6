//! CLI argument definitions

use crate::config::{
    parse_threshold, DEFAULT_GROUND_TRUTH, DEFAULT_PROBE_CPU, MIN_ITERATIONS,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "drk",
    version,
    about = "Map the kernel address space from TSX abort timings",
    after_help = "\
EXAMPLES:
    sudo drk attack                              Calibrate, locate and classify
    sudo drk attack -i 4000 -M 210 -X 190        Fixed thresholds, more iterations
    drk signatures --kpt kpt --kallsyms kallsyms Build a module signature table"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full measurement and classification pipeline
    Attack(AttackArgs),
    /// Build a module signature table from a page-table dump and kallsyms
    Signatures(SignatureArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct AttackArgs {
    /// Accesses per measurement (calibration uses at least 1000)
    #[arg(short, long, default_value_t = MIN_ITERATIONS)]
    pub iter: u32,

    /// Calibration repeats; the fastest run is kept
    #[arg(long, default_value_t = 1)]
    pub repeats: u32,

    /// Mapped/Unmapped threshold in cycles (skips its calibration)
    #[arg(short = 'M', long, value_parser = parse_threshold)]
    pub m_threshold: Option<f64>,

    /// Executable/Non-executable threshold in cycles (skips its calibration)
    #[arg(short = 'X', long, value_parser = parse_threshold)]
    pub x_threshold: Option<f64>,

    /// Directory receiving maps, dumps and the summary
    #[arg(short, long, default_value = ".")]
    pub outdir: PathBuf,

    /// Busy-loop workers keeping the cores at full clock (default: online CPUs / 2)
    #[arg(short, long)]
    pub loops: Option<usize>,

    /// Module signature table (JSON or legacy dict format)
    #[arg(short, long, value_name = "FILE")]
    pub data: Option<PathBuf>,

    /// Directory holding the measure, drk-probing and loop binaries
    #[arg(long, default_value = ".")]
    pub bin_dir: PathBuf,

    /// Core the probing binaries are pinned to
    #[arg(long, default_value_t = DEFAULT_PROBE_CPU)]
    pub probe_cpu: u32,

    /// Run the probing binaries unpinned
    #[arg(long)]
    pub no_pin: bool,

    /// Kernel page-table dump used to score the result
    #[arg(long, default_value = DEFAULT_GROUND_TRUTH)]
    pub ground_truth: PathBuf,

    /// JSON override of the platform address-space layout
    #[arg(long, value_name = "FILE")]
    pub layout: Option<PathBuf>,

    /// Skip the TSX and KASLR checks
    #[arg(long)]
    pub skip_preflight: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SignatureArgs {
    /// Kernel page-table dump
    #[arg(long, default_value = DEFAULT_GROUND_TRUTH)]
    pub kpt: PathBuf,

    /// Copy of /proc/kallsyms read as root
    #[arg(long, default_value = "/proc/kallsyms")]
    pub kallsyms: PathBuf,

    /// Output signature table
    #[arg(short, long, default_value = "modules_size.json")]
    pub output: PathBuf,
}
