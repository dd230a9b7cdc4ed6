//! # drk - Main Entry Point
//!
//! Two subcommands:
//! - **attack**: calibrate thresholds, locate and classify the kernel and
//!   module areas, write maps, and score them when ground truth is readable
//! - **signatures**: build a module signature table from a page-table dump
//!   and kallsyms

use anyhow::{Context, Result};
use clap::Parser;
use drk::analysis::{generate_table, SignatureTable};
use drk::cli::{Args, AttackArgs, Command, SignatureArgs};
use drk::config::{PlatformLayout, RunConfig};
use drk::export::{write_artifacts, SummaryReport, SUMMARY_FILE};
use drk::ground_truth::{load_page_table, parse_kallsyms, PageTableDump};
use drk::pipeline::{run_attack, AttackSettings};
use drk::preflight::run_preflight_checks;
use drk::probe::{
    default_worker_count, online_cpus, worker_cpus, CommandMeasure, CommandProber, NoiseGuard,
};
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Time the busy loops get to bring the cores up to full clock
const NOISE_SETTLE: Duration = Duration::from_secs(2);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("invalid iteration") || msg.contains("invalid layout") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Attack(ref attack) => attack_command(attack),
        Command::Signatures(ref sig) => signatures_command(sig),
    }
}

fn attack_command(args: &AttackArgs) -> Result<()> {
    let started = Instant::now();

    let online = online_cpus().unwrap_or_else(|e| {
        warn!("{e:#}, busy loops will not be pinned");
        Vec::new()
    });
    let probe_cpu = (!args.no_pin).then_some(args.probe_cpu);
    let cpus = worker_cpus(&online, probe_cpu);
    let config = RunConfig::from_args(args, default_worker_count(&cpus))?;
    let quiet = config.quiet;

    run_preflight_checks(&config.binaries, &config.ground_truth, config.skip_preflight, quiet)?;

    // Configuration problems surface before anything is measured
    let signatures = config
        .signature_table
        .as_deref()
        .map(SignatureTable::load)
        .transpose()
        .context("Failed to load module signature table")?;
    let ground_truth: Option<PageTableDump> = load_page_table(&config.ground_truth)?;
    if ground_truth.is_none() && !quiet {
        eprintln!("warning: ground truth unavailable, accuracy will not be scored");
    }

    std::fs::create_dir_all(&config.outdir)
        .with_context(|| format!("Failed to create {}", config.outdir.display()))?;

    if !quiet {
        println!("drk v{}", env!("CARGO_PKG_VERSION"));
        println!("[*] Starting {} busy loops", config.loops);
    }
    let mut guard = NoiseGuard::start(&config.binaries.busy_loop, config.loops, &cpus)?;
    std::thread::sleep(NOISE_SETTLE);

    let measure = CommandMeasure::new(&config.binaries.measure, config.probe_cpu);
    let prober = CommandProber::new(&config.binaries.prober, config.probe_cpu, &config.outdir);

    if !quiet {
        println!("[*] Calibrating, locating and classifying");
    }
    let outcome = run_attack(
        &measure,
        &prober,
        &AttackSettings::from(&config),
        signatures.as_ref(),
        ground_truth.as_ref(),
    );
    guard.stop();
    let outcome = outcome.context("Attack failed")?;

    let written = write_artifacts(&config.outdir, &outcome).context("Failed to write artifacts")?;

    let summary = SummaryReport::new(&outcome, started.elapsed());
    let summary_path = config.artifact(SUMMARY_FILE);
    let file = File::create(&summary_path)
        .with_context(|| format!("Failed to create {}", summary_path.display()))?;
    summary.export(BufWriter::new(file)).context("Failed to write summary")?;
    info!("Wrote {} artifacts and {}", written.len(), summary_path.display());

    if !quiet {
        print!("{summary}");
        println!("saved: {}", config.outdir.display());
    }

    Ok(())
}

fn signatures_command(args: &SignatureArgs) -> Result<()> {
    let kpt = std::fs::read_to_string(&args.kpt)
        .with_context(|| format!("Failed to read {}", args.kpt.display()))?;
    let dump = PageTableDump::parse(&kpt)
        .with_context(|| format!("Failed to parse page table dump {}", args.kpt.display()))?;

    let kallsyms = std::fs::read_to_string(&args.kallsyms)
        .with_context(|| format!("Failed to read {}", args.kallsyms.display()))?;
    let module_base = dump
        .modules
        .first()
        .map_or(PlatformLayout::default().module_window.start, |area| area.start);
    let symbols = parse_kallsyms(&kallsyms, module_base)
        .with_context(|| format!("Failed to parse {}", args.kallsyms.display()))?;
    if symbols.is_empty() {
        warn!("No module symbols in {}; is it readable as root?", args.kallsyms.display());
    }

    let table = generate_table(&dump.modules, &symbols);
    std::fs::write(&args.output, table.to_json()?)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("saved: {} ({} signatures)", args.output.display(), table.len());
    Ok(())
}
