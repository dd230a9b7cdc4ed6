//! Reference data used to score and name classification results
//!
//! - `page_table`: the kernel's debug page-table dump, the permission oracle
//! - `kallsyms`: module symbol addresses, used to name module extents

pub mod kallsyms;
pub mod page_table;

pub use kallsyms::{parse_kallsyms, ModuleSymbols};
pub use page_table::{GroundTruthArea, GroundTruthMap, PageTableDump};

use std::path::Path;

/// Load and parse a page-table dump.
///
/// `Ok(None)` when the file cannot be read at all (no debugfs, not root);
/// a readable but malformed dump is an error.
pub fn load_page_table(path: &Path) -> anyhow::Result<Option<PageTableDump>> {
    use anyhow::Context;

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Ground truth {} unavailable: {e}", path.display());
            return Ok(None);
        }
    };
    let dump = PageTableDump::parse(&text)
        .with_context(|| format!("Failed to parse page table dump {}", path.display()))?;
    Ok(Some(dump))
}
