//! Module identification by code/data size pairs
//!
//! A loaded module occupies an executable extent immediately followed by a
//! non-executable one. The pair of their sizes is distinctive enough to name
//! many modules, so a table keyed by `(x_size, nx_size)` maps observed pairs
//! back to candidate module names.

use super::extents::merge_extents;
use crate::domain::{ConfigError, Extent, PageLabel};
use crate::ground_truth::{GroundTruthArea, ModuleSymbols};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// Keys with this many candidates or more say nothing useful and are dropped
/// from generated tables.
pub const MAX_CANDIDATES: usize = 6;

/// `(exec_size, data_size)` to candidate module names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureTable {
    entries: BTreeMap<(u64, u64), Vec<String>>,
}

impl SignatureTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: (u64, u64), name: impl Into<String>) {
        self.entries.entry(key).or_default().push(name.into());
    }

    /// Add candidates under `key`; names already listed there are skipped,
    /// so keys spelled with different padding merge.
    fn extend(&mut self, key: (u64, u64), names: Vec<String>) {
        let candidates = self.entries.entry(key).or_default();
        for name in names {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }
    }

    #[must_use]
    pub fn get(&self, exec_size: u64, data_size: u64) -> Option<&[String]> {
        self.entries.get(&(exec_size, data_size)).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a table in JSON form, falling back to the legacy line format.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<BTreeMap<String, Vec<String>>>(text) {
            Ok(raw) => {
                let mut table = Self::new();
                for (key, names) in raw {
                    table.extend(parse_key(&key)?, names);
                }
                Ok(table)
            }
            Err(json_err) => {
                debug!("Signature table is not JSON ({json_err}), trying legacy format");
                parse_legacy(text)
            }
        }
    }

    /// Read and parse the table at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::SignatureTableMissing(path.to_path_buf()));
        }
        let table = Self::parse(&std::fs::read_to_string(path)?)?;
        info!("Loaded {} module signatures from {}", table.len(), path.display());
        Ok(table)
    }

    /// Pretty JSON with `"<x hex> <nx hex>"` keys
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let raw: BTreeMap<String, &Vec<String>> = self
            .entries
            .iter()
            .map(|((x, nx), names)| (format!("{x:x} {nx:x}"), names))
            .collect();
        Ok(serde_json::to_string_pretty(&raw)?)
    }
}

/// Parse a `"<x hex> <nx hex>"` key. Padding around either number is allowed.
pub fn parse_key(key: &str) -> Result<(u64, u64), ConfigError> {
    let bad = || ConfigError::MalformedSignatureTable(format!("bad key '{key}'"));
    let mut parts = key.split_whitespace();
    let (Some(x), Some(nx), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };
    let hex = |s: &str| u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|_| bad());
    Ok((hex(x)?, hex(nx)?))
}

/// `'<key>' : ["a", "b"],` lines, optionally wrapped in `{` `}`.
fn parse_legacy(text: &str) -> Result<SignatureTable, ConfigError> {
    let mut table = SignatureTable::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line == "{" || line == "}" {
            continue;
        }
        let bad = |reason: &str| {
            ConfigError::MalformedSignatureTable(format!("line {}: {reason}", idx + 1))
        };

        let (key, names) = line.split_once(':').ok_or_else(|| bad("missing ':'"))?;
        let key = key.trim().trim_matches(|c| c == '\'' || c == '"');
        let names = names.trim().trim_end_matches(',');
        let names: Vec<String> =
            serde_json::from_str(names).map_err(|e| bad(&format!("bad name list: {e}")))?;

        table.extend(parse_key(key)?, names);
    }

    Ok(table)
}

/// Extents annotated with module candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub extents: Vec<Extent>,
    /// Names of modules resolved to exactly one candidate, in address order
    pub unique: Vec<String>,
}

impl MatchOutcome {
    #[must_use]
    pub fn unique_count(&self) -> usize {
        self.unique.len()
    }
}

/// Annotate every X extent immediately followed by an NX extent whose size
/// pair is in `table`. Misses leave the extent untouched.
#[must_use]
pub fn match_modules(extents: &[Extent], table: &SignatureTable) -> MatchOutcome {
    let mut annotated = extents.to_vec();
    let mut unique = Vec::new();

    for i in 0..extents.len().saturating_sub(1) {
        let (code, data) = (&extents[i], &extents[i + 1]);
        if code.label != PageLabel::Executable || data.label != PageLabel::NonExecutable {
            continue;
        }
        let Some(names) = table.get(code.size(), data.size()) else {
            continue;
        };

        let joined = names.join(",");
        annotated[i].annotation = Some(match annotated[i].annotation.take() {
            Some(prev) => format!("{prev},{joined}"),
            None => joined,
        });
        if let [only] = names {
            unique.push(only.clone());
        }
    }

    info!("Found {} unique modules", unique.len());
    MatchOutcome { extents: annotated, unique }
}

/// Build a table from the module section of a page-table dump.
///
/// Contiguous areas with one permission are merged into extents, each
/// extent is named by the module owning its first page, and every named X
/// extent followed by an NX extent contributes its size pair.
#[must_use]
pub fn generate_table(module_areas: &[GroundTruthArea], symbols: &ModuleSymbols) -> SignatureTable {
    let extents: Vec<Extent> = module_areas
        .iter()
        .map(|a| Extent::new(a.start, a.end, a.perm))
        .collect();
    let extents = merge_extents(&extents);

    let mut table = SignatureTable::new();
    for pair in extents.windows(2) {
        let [code, data] = pair else { continue };
        if code.label != PageLabel::Executable || data.label != PageLabel::NonExecutable {
            continue;
        }
        if let Some(name) = symbols.name_at(code.start) {
            table.insert((code.size(), data.size()), name);
        }
    }

    let before = table.len();
    table.entries.retain(|_, names| names.len() < MAX_CANDIDATES);
    if table.len() < before {
        debug!("Dropped {} ambiguous signatures", before - table.len());
    }
    table
}
