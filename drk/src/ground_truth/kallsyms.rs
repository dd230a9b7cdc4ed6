//! `/proc/kallsyms` module symbol parsing
//!
//! Only symbols owned by a module (`[name]` column) inside the module area
//! are kept, keyed by the page they live on.

use crate::domain::{DrkError, PAGE_SIZE};
use log::warn;
use std::collections::BTreeMap;

/// Page address to owning module name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSymbols {
    pages: BTreeMap<u64, String>,
}

impl ModuleSymbols {
    /// Module owning the page at `page`, if any symbol lives there
    #[must_use]
    pub fn name_at(&self, page: u64) -> Option<&str> {
        self.pages.get(&page).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Parse kallsyms text, keeping module symbols at or above `module_base`.
///
/// When several modules have symbols on one page the highest symbol wins.
/// A dump whose addresses are all zero (read without privileges) yields an
/// empty table and a warning.
pub fn parse_kallsyms(text: &str, module_base: u64) -> Result<ModuleSymbols, DrkError> {
    let mut symbols = Vec::new();
    let mut all_zero = true;
    let mut seen = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 3 {
            return Err(DrkError::MalformedRecord(format!(
                "kallsyms line {}: expected 'address type name [module]'",
                idx + 1
            )));
        }

        let addr = u64::from_str_radix(fields[0], 16).map_err(|_| {
            DrkError::MalformedRecord(format!("kallsyms line {}: bad address '{}'", idx + 1, fields[0]))
        })?;
        seen += 1;
        all_zero &= addr == 0;

        let Some(module) = fields.get(3).and_then(|m| m.strip_prefix('[')?.strip_suffix(']')) else {
            continue;
        };
        if addr >= module_base {
            symbols.push((addr, module.to_string()));
        }
    }

    if seen > 0 && all_zero {
        warn!("kallsyms addresses are all zero; read it as root to resolve module names");
    }

    symbols.sort_by_key(|(addr, _)| *addr);
    let pages = symbols
        .into_iter()
        .map(|(addr, name)| (addr & !(PAGE_SIZE - 1), name))
        .collect();
    Ok(ModuleSymbols { pages })
}
