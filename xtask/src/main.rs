use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Binaries `drk attack` expects in its `--bin-dir`
const PROBE_BINARIES: [&str; 3] = ["measure", "drk-probing", "loop"];

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the C probing tools with make
    BuildProbes {
        /// Directory holding the probing sources and Makefile
        #[arg(long, default_value = "probes")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildProbes { dir } => build_probes(&dir)?,
    }

    Ok(())
}

fn build_probes(dir: &Path) -> Result<()> {
    if !dir.join("Makefile").is_file() {
        anyhow::bail!("No Makefile in {}", dir.display());
    }

    let status = Command::new("make")
        .current_dir(dir)
        .status()
        .with_context(|| format!("Failed to run make in {}", dir.display()))?;

    if !status.success() {
        anyhow::bail!("make failed in {} ({status})", dir.display());
    }

    let missing: Vec<&str> =
        PROBE_BINARIES.into_iter().filter(|name| !dir.join(name).is_file()).collect();
    if !missing.is_empty() {
        anyhow::bail!("make did not produce: {}", missing.join(", "));
    }

    println!("✓ probing tools built successfully");
    println!("  Directory: {}", dir.display());
    println!("  Run: sudo drk attack --bin-dir {}", dir.display());

    Ok(())
}
