//! `tally-recon`: streaming ledger reconciliation.
//!
//! One internal ledger is matched against any number of external
//! statements. Records flow through bounded channels: per-source parse
//! workers, a fan-in merge, a date filter, the single-threaded matcher and
//! a summary pass-through. CSV and TOML adapters live here too so a binary
//! only has to wire them together.

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod run;
pub mod store;
pub mod summary;
pub mod trie;

pub use config::ReconConfig;
pub use engine::{ReconOptions, ReconService, Reconciler};
pub use error::ReconError;
pub use model::{OutputRow, RawRecord, ReconTransaction, Transaction};
pub use parser::{CsvRecordParser, ParserKind, RecordParser};
pub use run::{start, ReconRun};
pub use summary::ReconSummary;
