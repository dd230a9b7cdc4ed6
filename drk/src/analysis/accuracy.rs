//! Scoring classified pages against the page-table ground truth

#![allow(clippy::cast_precision_loss)]

use crate::domain::{ClassifyMode, DrkError, PageLabel, PageRecord};
use crate::ground_truth::GroundTruthMap;
use serde::Serialize;
use std::fmt;

/// A page whose derived label disagrees with the ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub record: PageRecord,
    pub derived: PageLabel,
    pub expected: PageLabel,
}

/// `0x<addr> <mapped> <exec> <derived> <expected> WRONG`
impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:x} {} {} {} {} WRONG",
            self.record.address, self.record.mapped_time, self.record.exec_time, self.derived, self.expected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub total: u64,
    pub correct: u64,
    pub wrong: u64,
    pub accuracy_pct: f64,
    /// In input order
    #[serde(skip)]
    pub mismatches: Vec<Mismatch>,
}

/// Compare every record with the ground-truth permission of its page.
///
/// In `MappedOnly` mode both sides collapse to U/NX first. Every record must
/// have a ground-truth entry; an empty record set is an error.
pub fn evaluate(
    records: &[PageRecord],
    ground_truth: &GroundTruthMap,
    mode: ClassifyMode,
) -> Result<AccuracyReport, DrkError> {
    if records.is_empty() {
        return Err(DrkError::EmptyEvaluation);
    }

    let mut correct = 0u64;
    let mut mismatches = Vec::new();

    for record in records {
        let expected = ground_truth.label_for(record.address, mode)?;
        let derived = record.label.collapse(mode);
        if derived == expected {
            correct += 1;
        } else {
            mismatches.push(Mismatch { record: *record, derived, expected });
        }
    }

    let total = records.len() as u64;
    Ok(AccuracyReport {
        total,
        correct,
        wrong: total - correct,
        accuracy_pct: correct as f64 / total as f64 * 100.0,
        mismatches,
    })
}
