//! Run summary, as JSON and as operator-facing text

#![allow(clippy::cast_precision_loss)]

use crate::analysis::{AccuracyReport, RegionBounds};
use crate::domain::{ExportError, Thresholds};
use crate::pipeline::AttackOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::time::Duration;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub thresholds: Thresholds,
    pub iterations: u32,
    pub kernel: RegionBounds,
    pub module: Option<RegionBounds>,
    /// Keyed by category: `kernel_m`, `kernel_x`, `module_m`, `module_x`
    pub accuracy: BTreeMap<&'static str, AccuracyReport>,
    pub unique_modules: Vec<String>,
    pub scan_seconds: f64,
    pub total_seconds: f64,
}

impl SummaryReport {
    #[must_use]
    pub fn new(outcome: &AttackOutcome, total: Duration) -> Self {
        let accuracy = outcome
            .scores
            .as_ref()
            .map(|s| s.categories().into_iter().map(|(name, r)| (name, r.clone())).collect())
            .unwrap_or_default();

        Self {
            thresholds: outcome.calibration.thresholds,
            iterations: outcome.calibration.iterations,
            kernel: outcome.kernel.bounds,
            module: outcome.module.as_ref().map(|m| m.bounds),
            accuracy,
            unique_modules: outcome.modules.unique.clone(),
            scan_seconds: outcome.scan_elapsed.as_secs_f64(),
            total_seconds: total.as_secs_f64(),
        }
    }

    /// Write the summary as pretty JSON
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Multi-line text for the terminal
impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[+] M threshold {:.1} cycles", self.thresholds.mapped)?;
        writeln!(f, "[+] X threshold {:.1} cycles", self.thresholds.exec)?;
        writeln!(f, "[+] Kernel base 0x{:x}", self.kernel.start)?;
        writeln!(f, "[+] Kernel end 0x{:x}", self.kernel.end)?;
        match self.module {
            Some(m) => {
                writeln!(f, "[+] Module base 0x{:x}", m.start)?;
                writeln!(f, "[+] Module end 0x{:x}", m.end)?;
            }
            None => writeln!(f, "[x] No module region found")?,
        }

        writeln!(f, "[+] Found {} unique modules", self.unique_modules.len())?;
        for chunk in self.unique_modules.chunks(6) {
            writeln!(f, "    {}", chunk.join(", "))?;
        }

        for (name, report) in &self.accuracy {
            writeln!(
                f,
                "[+] {name}: total {} pages, correct {}, wrong {}, accuracy {:.2}%",
                report.total, report.correct, report.wrong, report.accuracy_pct
            )?;
        }
        if self.accuracy.is_empty() {
            writeln!(f, "[x] Ground truth unavailable, accuracy not scored")?;
        }

        writeln!(f, "[+] Page scan took {:.3}s, total {:.3}s", self.scan_seconds, self.total_seconds)
    }
}
