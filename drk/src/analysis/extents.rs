//! Run-length encoding of labeled pages into extents
//!
//! Consecutive records with the same label collapse into one extent. An
//! extent ends where the next one starts; the last extent of a map ends at
//! the address of the last record.

use crate::domain::{DrkError, Extent, PageLabel, PageRecord};

/// Header line of every rendered map file
pub const MAP_HEADER: &str = "Generated by DrK";

/// Compress `records` (ascending) into maximal same-label extents.
#[must_use]
pub fn build_map(records: &[PageRecord]) -> Vec<Extent> {
    let Some(first) = records.first() else {
        return Vec::new();
    };

    let mut extents = Vec::new();
    let mut current = Extent::new(first.address, first.address, first.label);

    for record in &records[1..] {
        if record.label != current.label {
            current.end = record.address;
            let next = Extent::new(record.address, record.address, record.label);
            extents.push(std::mem::replace(&mut current, next));
        }
    }

    current.end = records[records.len() - 1].address;
    extents.push(current);
    extents
}

/// Merge touching extents that share a label. A no-op on `build_map` output.
///
/// Annotations of merged extents are joined with `,`.
#[must_use]
pub fn merge_extents(extents: &[Extent]) -> Vec<Extent> {
    let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
    for extent in extents {
        if let Some(prev) = merged.last_mut() {
            if prev.label == extent.label && prev.end == extent.start {
                prev.end = extent.end;
                prev.annotation = match (prev.annotation.take(), &extent.annotation) {
                    (Some(a), Some(b)) => Some(format!("{a},{b}")),
                    (a, b) => a.or_else(|| b.clone()),
                };
                continue;
            }
        }
        merged.push(extent.clone());
    }
    merged
}

/// One rendered line per extent.
#[must_use]
pub fn render_map(extents: &[Extent]) -> String {
    let mut out = String::new();
    for extent in extents {
        out.push_str(&extent.to_string());
        out.push('\n');
    }
    out
}

/// Parse text produced by [`render_map`], with or without the map header.
pub fn parse_map(text: &str) -> Result<Vec<Extent>, DrkError> {
    let mut extents = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || (idx == 0 && line == MAP_HEADER) {
            continue;
        }
        let bad = |reason: &str| DrkError::MalformedMap { line: idx + 1, reason: reason.to_string() };

        let mut fields = line.splitn(3, ' ');
        let range = fields.next().ok_or_else(|| bad("empty"))?;
        let label: PageLabel = fields.next().ok_or_else(|| bad("missing label"))?.parse()?;
        let annotation = fields.next().map(str::to_string);

        let (start, end) = range.split_once('-').ok_or_else(|| bad("missing '-'"))?;
        let start = parse_hex(start).ok_or_else(|| bad("bad start address"))?;
        let end = parse_hex(end).ok_or_else(|| bad("bad end address"))?;

        extents.push(Extent { start, end, label, annotation });
    }

    Ok(extents)
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok()
}
