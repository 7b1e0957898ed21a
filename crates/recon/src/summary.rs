//! Running totals over the reconciliation output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::model::{format_unsigned_amount, ReconTransaction};
use crate::pipeline;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconSummary {
    /// Both sides of every pair are counted.
    pub total_matched: u64,
    pub total_mismatched: u64,
    pub total_mismatch_by_source: BTreeMap<String, u64>,
    /// Saturates at `u64::MAX`.
    pub total_discrepancy_cents: u64,
}

impl ReconSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rt: &ReconTransaction) {
        if rt.is_matched {
            self.total_matched += 2;
            self.total_discrepancy_cents =
                self.total_discrepancy_cents.saturating_add(rt.discrepancy_cents());
        } else {
            self.total_mismatched += 1;
            *self
                .total_mismatch_by_source
                .entry(rt.transaction.source.clone())
                .or_default() += 1;
        }
    }

    pub fn has_mismatches(&self) -> bool {
        self.total_mismatched > 0
    }
}

impl fmt::Display for ReconSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "====== Reconciliation Summary ======")?;
        writeln!(f, "Total Matched Transactions: {}", self.total_matched)?;
        writeln!(f, "Total Mismatched Transactions: {}", self.total_mismatched)?;
        writeln!(f, "Total Mismatches by Source:")?;
        for (source, count) in &self.total_mismatch_by_source {
            writeln!(f, "  - {source}: {count} mismatches")?;
        }
        writeln!(
            f,
            "Total Discrepancy Amount: {}",
            format_unsigned_amount(self.total_discrepancy_cents)
        )?;
        write!(f, "====================================")
    }
}

/// Count every result into `summary` and forward it unchanged.
///
/// Read `summary` only after the returned receiver has been drained.
pub fn pass_through(
    input: Receiver<ReconTransaction>,
    summary: Arc<Mutex<ReconSummary>>,
) -> Receiver<ReconTransaction> {
    pipeline::transform(input, move |rt: ReconTransaction| {
        summary.lock().unwrap_or_else(PoisonError::into_inner).record(&rt);
        Some(rt)
    })
}
