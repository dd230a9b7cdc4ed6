//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use anyhow::{Context, Result};
use std::fs;

use crate::domain::CpuId;

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// Returns a vector of CPU IDs (e.g., [0, 1, 2, 3] for a 4-core system).
/// The format in /sys is like "0-3" or "0-3,8-11" for NUMA systems.
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")
        .context("Failed to read /sys/devices/system/cpu/online")?;
    parse_cpu_list(&content)
}

/// Parse a kernel CPU list such as `0-3,8-11` or `5`.
pub fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            let start: u32 = start.parse().with_context(|| format!("Bad CPU range '{range}'"))?;
            let end: u32 = end.parse().with_context(|| format!("Bad CPU range '{range}'"))?;
            for cpu in start..=end {
                cpus.push(CpuId(cpu));
            }
        } else {
            let cpu: u32 = range.parse().with_context(|| format!("Bad CPU id '{range}'"))?;
            cpus.push(CpuId(cpu));
        }
    }

    Ok(cpus)
}

/// Cores available to busy-loop workers: every online core except the one
/// the probes are pinned to.
#[must_use]
pub fn worker_cpus(online: &[CpuId], probe_cpu: Option<u32>) -> Vec<CpuId> {
    online.iter().copied().filter(|cpu| Some(cpu.0) != probe_cpu).collect()
}

/// Number of busy-loop workers to start when none was requested:
/// half of the cores in `cpus`.
#[must_use]
pub fn default_worker_count(cpus: &[CpuId]) -> usize {
    cpus.len() / 2
}
