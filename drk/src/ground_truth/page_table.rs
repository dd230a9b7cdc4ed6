//! Kernel page-table dump parsing
//!
//! Reads `/sys/kernel/debug/kernel_page_tables` (x86 `CONFIG_PTDUMP_DEBUGFS`):
//!
//! ```text
//! ---[ High Kernel Mapping ]---
//! 0xffffffff80000000-0xffffffff81000000          16M                           pmd
//! 0xffffffff81000000-0xffffffff81e00000          14M     ro         PSE     GLB x  pmd
//! 0xffffffff81e00000-0xffffffff82000000           2M     ro         PSE     GLB NX pmd
//! ---[ Modules ]---
//! ...
//! ---[ End Modules ]---
//! ```
//!
//! The token before the page level is `x` for executable mappings and `NX`
//! for non-executable ones; non-present ranges carry neither.

use crate::domain::{ClassifyMode, DrkError, PageLabel, PAGE_SIZE};
use std::collections::BTreeMap;

pub const HIGH_KERNEL_MARKER: &str = "---[ High Kernel Mapping ]---";
pub const MODULES_MARKER: &str = "---[ Modules ]---";
pub const END_MODULES_MARKER: &str = "---[ End Modules ]---";

/// One line of the dump: `[start, end)` with a single permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundTruthArea {
    pub start: u64,
    pub end: u64,
    pub perm: PageLabel,
}

/// Kernel image and module sections of a dump
#[derive(Debug, Clone, Default)]
pub struct PageTableDump {
    pub kernel: Vec<GroundTruthArea>,
    pub modules: Vec<GroundTruthArea>,
}

impl PageTableDump {
    /// Parse a full dump. Both sections must be present.
    pub fn parse(text: &str) -> Result<Self, DrkError> {
        let lines: Vec<&str> = text.lines().collect();

        let high = find_marker(&lines, HIGH_KERNEL_MARKER)?;
        let modules = find_marker(&lines, MODULES_MARKER)?;
        let end_modules = find_marker(&lines, END_MODULES_MARKER)?;

        Ok(Self {
            kernel: parse_section(&lines, high + 1, modules)?,
            modules: parse_section(&lines, modules + 1, end_modules)?,
        })
    }
}

fn find_marker(lines: &[&str], marker: &'static str) -> Result<usize, DrkError> {
    lines.iter().position(|l| l.trim() == marker).ok_or(DrkError::MissingSection(marker))
}

fn parse_section(lines: &[&str], from: usize, to: usize) -> Result<Vec<GroundTruthArea>, DrkError> {
    if from > to {
        return Ok(Vec::new());
    }
    lines[from..to]
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with("---["))
        .map(|(i, l)| parse_area_line(l, from + i + 1))
        .collect()
}

/// Parse one dump line; `line_no` is 1-based and only labels errors.
pub fn parse_area_line(line: &str, line_no: usize) -> Result<GroundTruthArea, DrkError> {
    let bad = |reason: String| DrkError::MalformedGroundTruth { line: line_no, reason };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let range = tokens.first().ok_or_else(|| bad("empty line".to_string()))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| bad(format!("'{range}' is not an address range")))?;
    let start = parse_hex(start).ok_or_else(|| bad(format!("bad start '{start}'")))?;
    let end = parse_hex(end).ok_or_else(|| bad(format!("bad end '{end}'")))?;
    if end < start {
        return Err(bad(format!("range 0x{start:x}-0x{end:x} is reversed")));
    }

    let perm = match tokens.len().checked_sub(2).map(|i| tokens[i]) {
        Some("x") => PageLabel::Executable,
        Some("NX") => PageLabel::NonExecutable,
        _ => PageLabel::Unmapped,
    };

    Ok(GroundTruthArea { start, end, perm })
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

/// Exact page lookups over a set of ground-truth areas
#[derive(Debug, Clone, Default)]
pub struct GroundTruthMap {
    areas: BTreeMap<u64, GroundTruthArea>,
}

impl GroundTruthMap {
    #[must_use]
    pub fn new(areas: &[GroundTruthArea]) -> Self {
        Self { areas: areas.iter().map(|a| (a.start, *a)).collect() }
    }

    /// Permission of the page at `addr`, or `None` when `addr` is not a page
    /// address covered by the dump.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<PageLabel> {
        if addr % PAGE_SIZE != 0 {
            return None;
        }
        self.areas
            .range(..=addr)
            .next_back()
            .filter(|(_, area)| addr < area.end)
            .map(|(_, area)| area.perm)
    }

    /// Permission of `addr` projected onto `mode`; a page the dump does not
    /// cover is an error.
    pub fn label_for(&self, addr: u64, mode: ClassifyMode) -> Result<PageLabel, DrkError> {
        self.lookup(addr).map(|p| p.collapse(mode)).ok_or(DrkError::GroundTruthMissing(addr))
    }
}
