//! Config-driven wiring of the full pipeline:
//!
//! ```text
//! csv -> parse workers ─┐
//! csv -> parse workers ─┼─ combine -> date filter -> reconcile -> summary -> mismatches
//! csv -> parse workers ─┘
//! ```

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ReconConfig;
use crate::engine::ReconService;
use crate::error::ReconError;
use crate::ingest::read_csv;
use crate::model::ReconTransaction;
use crate::pipeline;
use crate::summary::{self, ReconSummary};

/// A started reconciliation. Drain `mismatches`, then read the summary.
pub struct ReconRun {
    pub mismatches: Receiver<ReconTransaction>,
    summary: Arc<Mutex<ReconSummary>>,
}

impl ReconRun {
    /// Snapshot of the totals. Complete once `mismatches` is drained.
    pub fn summary(&self) -> ReconSummary {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Open every configured source (paths relative to `base_dir`) and start
/// the pipeline. File and registration errors surface here, before any
/// record flows.
pub fn start(config: &ReconConfig, base_dir: &Path) -> Result<ReconRun, ReconError> {
    let mut service = ReconService::new(config.recon_options())?;

    let (internal_name, internal) = config
        .internal_source()
        .ok_or(ReconError::InternalSourceMissing)?;

    let mut streams = Vec::with_capacity(config.sources.len());
    let records = read_csv(base_dir.join(&internal.file))?;
    streams.push(service.register_internal(
        internal_name,
        records,
        internal.record_parser().shared(),
    )?);

    for (name, source) in config.external_sources() {
        let records = read_csv(base_dir.join(&source.file))?;
        streams.push(service.register_external(name, records, source.record_parser().shared())?);
    }

    log::info!(
        "recon '{}': internal '{internal_name}', {} external source(s)",
        config.name,
        service.external_sources().len()
    );

    let merged = pipeline::combine(streams);
    let filtered = pipeline::transform(merged, service.date_filter());
    let results = service.reconcile(filtered)?;

    let totals = Arc::new(Mutex::new(ReconSummary::new()));
    let counted = summary::pass_through(results, Arc::clone(&totals));
    let mismatches = service.filter_mismatched(counted);

    Ok(ReconRun { mismatches, summary: totals })
}
