//! Streaming reconciliation: source registration, date filtering and the
//! three-tier matcher.
//!
//! Matching runs on a single consumer thread that owns both stores:
//!
//! 1. exact primary key (`date|type|id`) on the opposite side,
//! 2. otherwise any opposite-side record in the same `[date, type, amount]`
//!    bucket,
//! 3. after the input closes, a residual external record matches the only
//!    internal record of its `[date, type]` when it is also the only
//!    external one there.
//!
//! Everything left after the sweep is reported as unmatched.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;

use crate::error::ReconError;
use crate::model::{day_epoch_millis, RawRecord, ReconTransaction, Transaction};
use crate::parser::{parse_day, RecordParser};
use crate::pipeline::{self, CHANNEL_CAPACITY};
use crate::store::{DualKeyedStore, Indexed};

pub const DEFAULT_WORKERS: usize = 4;

pub const REMARK_NO_INTERNAL: &str = "No matching internal transaction found";
pub const REMARK_NO_EXTERNAL: &str = "No matching external transaction found";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Both bounds are `YYYY-MM-DD`; `start` must not be after `end`.
    pub fn parse(start: &str, end: &str) -> Result<Self, ReconError> {
        let invalid = |field: &str, value: &str| ReconError::InvalidDate {
            field: field.into(),
            value: value.into(),
        };
        let start_day = parse_day(start).map_err(|_| invalid("date_range.start", start))?;
        let end_day = parse_day(end).map_err(|_| invalid("date_range.end", end))?;
        if start_day > end_day {
            return Err(ReconError::ConfigValidation(format!(
                "date_range start {start} is after end {end}"
            )));
        }
        Ok(Self { start: start_day, end: end_day })
    }

    pub fn contains_epoch(&self, epoch_millis: i64) -> bool {
        (day_epoch_millis(self.start)..=day_epoch_millis(self.end)).contains(&epoch_millis)
    }
}

#[derive(Debug, Clone)]
pub struct ReconOptions {
    /// Inclusive `(start, end)` as `YYYY-MM-DD`. `None` keeps every record.
    pub date_range: Option<(String, String)>,
    /// Parse workers per registered source.
    pub workers: usize,
}

impl Default for ReconOptions {
    fn default() -> Self {
        Self { date_range: None, workers: DEFAULT_WORKERS }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Wires sources into the matcher. Registration happens up front; the
/// per-record work runs on the threads it spawns.
#[derive(Debug)]
pub struct ReconService {
    internal_source: Option<String>,
    external_sources: Vec<String>,
    date_range: Option<DateRange>,
    workers: usize,
}

impl ReconService {
    pub fn new(options: ReconOptions) -> Result<Self, ReconError> {
        let date_range = options
            .date_range
            .as_ref()
            .map(|(start, end)| DateRange::parse(start, end))
            .transpose()?;

        Ok(Self {
            internal_source: None,
            external_sources: Vec::new(),
            date_range,
            workers: options.workers.max(1),
        })
    }

    pub fn internal_source(&self) -> Option<&str> {
        self.internal_source.as_deref()
    }

    pub fn external_sources(&self) -> &[String] {
        &self.external_sources
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    /// Designate `source` as the internal ledger and start parsing it.
    pub fn register_internal(
        &mut self,
        source: &str,
        records: Receiver<RawRecord>,
        parser: Arc<dyn RecordParser>,
    ) -> Result<Receiver<Transaction>, ReconError> {
        if let Some(current) = &self.internal_source {
            return Err(ReconError::InternalSourceAlreadySet {
                current: current.clone(),
                requested: source.to_string(),
            });
        }
        self.check_unique(source)?;
        self.internal_source = Some(source.to_string());
        log::info!("registered internal source '{source}' ({} workers)", self.workers);
        Ok(self.parse_stream(source, records, parser))
    }

    /// Add an external source and start parsing it.
    pub fn register_external(
        &mut self,
        source: &str,
        records: Receiver<RawRecord>,
        parser: Arc<dyn RecordParser>,
    ) -> Result<Receiver<Transaction>, ReconError> {
        self.check_unique(source)?;
        self.external_sources.push(source.to_string());
        log::info!("registered external source '{source}' ({} workers)", self.workers);
        Ok(self.parse_stream(source, records, parser))
    }

    fn check_unique(&self, source: &str) -> Result<(), ReconError> {
        let taken = self.internal_source.as_deref() == Some(source)
            || self.external_sources.iter().any(|s| s == source);
        if taken {
            return Err(ReconError::DuplicateSource(source.to_string()));
        }
        Ok(())
    }

    fn parse_stream(
        &self,
        source: &str,
        records: Receiver<RawRecord>,
        parser: Arc<dyn RecordParser>,
    ) -> Receiver<Transaction> {
        let source = source.to_string();
        pipeline::spawn_workers(records, self.workers, move |record: RawRecord| {
            parser.parse(&source, &record)
        })
    }

    /// Keep `t` unless it parsed cleanly and falls outside the date range.
    pub fn filter_by_date(&self, t: &Transaction) -> bool {
        keep_in_range(self.date_range.as_ref(), t)
    }

    /// [`Self::filter_by_date`] as a stage closure for [`pipeline::transform`].
    pub fn date_filter(&self) -> impl FnMut(Transaction) -> Option<Transaction> + Send + 'static {
        let range = self.date_range;
        move |t| keep_in_range(range.as_ref(), &t).then_some(t)
    }

    /// Start the matcher over the merged transaction stream.
    pub fn reconcile(
        &self,
        input: Receiver<Transaction>,
    ) -> Result<Receiver<ReconTransaction>, ReconError> {
        let internal = self
            .internal_source
            .clone()
            .ok_or(ReconError::InternalSourceMissing)?;

        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        thread::spawn(move || {
            let mut reconciler = Reconciler::new(internal);
            for t in input {
                let Some(result) = reconciler.process(t) else { continue };
                if tx.send(result).is_err() {
                    log::warn!("reconcile: downstream closed, stopping");
                    return;
                }
            }

            let (internal_left, external_left) = reconciler.pending();
            log::info!(
                "reconcile: input closed, sweeping {internal_left} internal and \
                 {external_left} external residual record(s)"
            );
            for result in reconciler.sweep() {
                if tx.send(result).is_err() {
                    log::warn!("reconcile: downstream closed during sweep");
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Forward only results that did not match (errors included).
    pub fn filter_mismatched(
        &self,
        input: Receiver<ReconTransaction>,
    ) -> Receiver<ReconTransaction> {
        pipeline::transform(input, |rt: ReconTransaction| (!rt.is_matched).then_some(rt))
    }
}

fn keep_in_range(range: Option<&DateRange>, t: &Transaction) -> bool {
    match range {
        Some(range) => !t.is_valid() || range.contains_epoch(t.date_epoch),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// The synchronous matching state machine behind [`ReconService::reconcile`].
#[derive(Debug)]
pub struct Reconciler {
    internal_source: String,
    internal: DualKeyedStore<Transaction>,
    external: DualKeyedStore<Transaction>,
}

impl Reconciler {
    pub fn new(internal_source: impl Into<String>) -> Self {
        Self {
            internal_source: internal_source.into(),
            internal: DualKeyedStore::new(),
            external: DualKeyedStore::new(),
        }
    }

    /// Number of unmatched `(internal, external)` records held so far.
    pub fn pending(&self) -> (usize, usize) {
        (self.internal.len(), self.external.len())
    }

    /// Handle one arrival. Returns a result when the record is an error or
    /// pairs with something already seen on the other side.
    pub fn process(&mut self, t: Transaction) -> Option<ReconTransaction> {
        if !t.is_valid() {
            log::debug!("{}:{} parse error", t.source, t.id);
            return Some(ReconTransaction::error(t));
        }

        if t.source == self.internal_source {
            pair_up(&mut self.internal, &mut self.external, t)
        } else {
            pair_up(&mut self.external, &mut self.internal, t)
        }
    }

    /// Drain what is left once the input has closed.
    pub fn sweep(mut self) -> Vec<ReconTransaction> {
        let mut out = Vec::with_capacity(self.internal.len() + self.external.len());

        for ext in sorted(&self.external) {
            let path = ext.date_path();
            let candidate = self
                .internal
                .single_value(&path)
                .filter(|_| self.external.single_value(&path).is_some())
                .and_then(|key| self.internal.get_by_id(key))
                .cloned();

            match candidate {
                Some(int) => {
                    log::debug!(
                        "{}:{} matched {}:{} by date",
                        ext.source,
                        ext.id,
                        int.source,
                        int.id
                    );
                    self.internal.remove(&int);
                    self.external.remove(&ext);
                    out.push(ReconTransaction::matched(ext, int));
                }
                None => out.push(ReconTransaction::unmatched(ext, REMARK_NO_INTERNAL)),
            }
        }

        for int in sorted(&self.internal) {
            out.push(ReconTransaction::unmatched(int, REMARK_NO_EXTERNAL));
        }

        out
    }
}

/// Store `incoming` on its own side, then look for a partner on the other.
fn pair_up(
    own: &mut DualKeyedStore<Transaction>,
    other: &mut DualKeyedStore<Transaction>,
    incoming: Transaction,
) -> Option<ReconTransaction> {
    own.put(incoming.clone());

    let partner = match other.get_by_id(&incoming.primary_key()) {
        Some(found) => {
            log::debug!("{}:{} matched by key", incoming.source, incoming.id);
            found.clone()
        }
        None => {
            let found = other.first_match_by_path(&incoming.amount_path())?.clone();
            log::debug!(
                "{}:{} matched {}:{} by amount",
                incoming.source,
                incoming.id,
                found.source,
                found.id
            );
            found
        }
    };

    own.remove(&incoming);
    other.remove(&partner);
    Some(ReconTransaction::matched(incoming, partner))
}

fn sorted(store: &DualKeyedStore<Transaction>) -> Vec<Transaction> {
    let mut records: Vec<Transaction> = store.values().cloned().collect();
    records.sort_by_cached_key(|t| t.primary_key());
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{CsvRecordParser, ParserKind};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn int(id: &str, cents: i64, d: u32) -> Transaction {
        Transaction::new("ledger", id, "", cents, day(d))
    }

    fn ext(id: &str, cents: i64, d: u32) -> Transaction {
        Transaction::new("bank", id, "", cents, day(d))
    }

    fn run(input: Vec<Transaction>) -> Vec<ReconTransaction> {
        let mut r = Reconciler::new("ledger");
        let mut out: Vec<_> = input.into_iter().filter_map(|t| r.process(t)).collect();
        out.extend(r.sweep());
        out
    }

    #[test]
    fn matches_by_id_and_keeps_discrepancy() {
        let out = run(vec![int("txn_1", 1000, 1), ext("txn_1", 100, 1)]);
        assert_eq!(out.len(), 1);
        let rt = &out[0];
        assert!(rt.is_matched);
        assert_eq!(rt.transaction.source, "bank");
        assert_eq!(rt.other.as_ref().map(|o| o.source.as_str()), Some("ledger"));
        assert_eq!(rt.discrepancy_cents(), 900);
    }

    #[test]
    fn matches_by_amount_bucket() {
        let out = run(vec![ext("ext_1", 1000, 1), int("txn_1", 1000, 1)]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_matched);
        assert_eq!(out[0].transaction.id, "txn_1");
        assert_eq!(out[0].discrepancy_cents(), 0);
    }

    #[test]
    fn matches_by_unique_date_in_sweep() {
        let out = run(vec![int("txn_1", 1000, 1), ext("ext_1", 1500, 1)]);
        assert_eq!(out.len(), 1);
        let rt = &out[0];
        assert!(rt.is_matched);
        assert_eq!(rt.transaction.id, "ext_1");
        assert_eq!(rt.other.as_ref().map(|o| o.id.as_str()), Some("txn_1"));
        assert_eq!(rt.discrepancy_cents(), 500);
    }

    #[test]
    fn ambiguous_date_leaves_everything_unmatched() {
        let out = run(vec![int("txn_1", 1000, 1), ext("ext_1", 100, 1), ext("ext_2", 500, 1)]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|rt| !rt.is_matched));
        assert_eq!(out[0].remark, REMARK_NO_INTERNAL);
        assert_eq!(out[1].remark, REMARK_NO_INTERNAL);
        assert_eq!(out[2].remark, REMARK_NO_EXTERNAL);
        assert_eq!(out[2].transaction.id, "txn_1");
    }

    #[test]
    fn ambiguous_internal_side_leaves_everything_unmatched() {
        let out = run(vec![int("txn_1", 1000, 1), int("txn_2", 2000, 1), ext("ext_1", 500, 1)]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|rt| !rt.is_matched));
        assert_eq!(out[0].transaction.id, "ext_1");
        assert_eq!(out[0].remark, REMARK_NO_INTERNAL);
        assert_eq!(out[1].transaction.id, "txn_1");
        assert_eq!(out[2].transaction.id, "txn_2");
        assert!(out[1..].iter().all(|rt| rt.remark == REMARK_NO_EXTERNAL));
    }

    #[test]
    fn extreme_amounts_match_without_overflow() {
        let ledger = CsvRecordParser::new(ParserKind::Ledger);
        let bank = CsvRecordParser::new(ParserKind::TypedStatement);
        let row = |id: &str, amount: &str, date: &str| -> RawRecord {
            [("id", id), ("ext_id", id), ("type", "DEBIT"), ("amount", amount), ("date", date)]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        let internal =
            ledger.parse("ledger", &row("t1", "-92233720368547758.07", "2025-01-01 09:00:00"));
        let external = bank.parse("bank", &row("t1", "1.00", "2025-01-01"));
        assert!(internal.is_valid(), "{:?}", internal.parse_error);
        assert!(external.is_valid(), "{:?}", external.parse_error);

        let out = run(vec![internal, external]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_matched);
        assert_eq!(out[0].discrepancy_cents(), i64::MAX as u64 + 100);
    }

    #[test]
    fn different_days_do_not_match() {
        let out = run(vec![int("txn_1", 1000, 1), ext("ext_1", 1000, 2)]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|rt| !rt.is_matched));
    }

    #[test]
    fn two_externals_in_one_bucket_pair_once() {
        let out = run(vec![int("txn_1", 1000, 1), ext("ext_1", 1500, 1), ext("ext_2", 1500, 1)]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|rt| !rt.is_matched));

        // Same bucket amounts pair immediately; the leftover stays unmatched.
        let out = run(vec![ext("ext_1", 1000, 1), ext("ext_2", 1000, 1), int("txn_1", 1000, 1)]);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_matched);
        assert_eq!(out[0].other.as_ref().map(|o| o.id.as_str()), Some("ext_1"));
        assert!(!out[1].is_matched);
        assert_eq!(out[1].transaction.id, "ext_2");
    }

    #[test]
    fn same_side_never_pairs() {
        let out = run(vec![int("txn_1", 1000, 1), int("txn_2", 1000, 1)]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|rt| rt.remark == REMARK_NO_EXTERNAL));
    }

    #[test]
    fn parse_errors_pass_straight_through() {
        let bad = ext("ext_1", 0, 1).with_parse_error("negative amount provided");
        let out = run(vec![bad, int("txn_1", 1000, 1)]);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_error);
        assert_eq!(out[0].remark, "negative amount provided");
        assert_eq!(out[1].remark, REMARK_NO_EXTERNAL);
    }

    #[test]
    fn date_range_validation() {
        let r = DateRange::parse("2025-01-01", "2025-01-10").unwrap();
        assert!(r.contains_epoch(1_735_689_600_000));
        assert!(r.contains_epoch(1_736_467_200_000));
        assert!(!r.contains_epoch(1_736_467_200_000 + 86_400_000));

        assert!(matches!(
            DateRange::parse("2025-13-01", "2025-01-10"),
            Err(ReconError::InvalidDate { .. })
        ));
        assert!(matches!(
            DateRange::parse("2025-02-01", "2025-01-10"),
            Err(ReconError::ConfigValidation(_))
        ));
    }

    #[test]
    fn date_filter_keeps_errors_and_in_range() {
        let service = ReconService::new(ReconOptions {
            date_range: Some(("2025-01-02".into(), "2025-01-03".into())),
            ..Default::default()
        })
        .unwrap();
        assert!(!service.filter_by_date(&int("a", 1, 1)));
        assert!(service.filter_by_date(&int("b", 1, 2)));
        assert!(service.filter_by_date(&int("c", 1, 3)));
        assert!(!service.filter_by_date(&int("d", 1, 4)));
        assert!(service.filter_by_date(&int("e", 1, 4).with_parse_error("x")));

        let mut keep = service.date_filter();
        assert!(keep(int("f", 1, 1)).is_none());
        assert!(keep(int("g", 1, 2)).is_some());

        let open = ReconService::new(ReconOptions::default()).unwrap();
        assert!(open.filter_by_date(&int("h", 1, 31)));
    }

    #[test]
    fn registration_rules() {
        let parser = CsvRecordParser::new(ParserKind::Ledger).shared();
        let mut service = ReconService::new(ReconOptions::default()).unwrap();

        let (_tx, rx) = mpsc::sync_channel::<RawRecord>(1);
        assert!(matches!(
            service.reconcile(mpsc::sync_channel(1).1),
            Err(ReconError::InternalSourceMissing)
        ));

        service.register_internal("ledger", rx, Arc::clone(&parser)).unwrap();
        let err = service
            .register_internal("other", mpsc::sync_channel(1).1, Arc::clone(&parser))
            .unwrap_err();
        assert_eq!(
            err,
            ReconError::InternalSourceAlreadySet {
                current: "ledger".into(),
                requested: "other".into()
            }
        );

        service.register_external("bank", mpsc::sync_channel(1).1, Arc::clone(&parser)).unwrap();
        let err = service
            .register_external("bank", mpsc::sync_channel(1).1, Arc::clone(&parser))
            .unwrap_err();
        assert_eq!(err, ReconError::DuplicateSource("bank".into()));
        let err = service
            .register_external("ledger", mpsc::sync_channel(1).1, parser)
            .unwrap_err();
        assert_eq!(err, ReconError::DuplicateSource("ledger".into()));

        assert_eq!(service.internal_source(), Some("ledger"));
        assert_eq!(service.external_sources(), ["bank".to_string()]);
    }

    #[test]
    fn reconcile_and_filter_over_channels() {
        let mut service = ReconService::new(ReconOptions::default()).unwrap();
        let parser = CsvRecordParser::new(ParserKind::Ledger).shared();
        service
            .register_internal("ledger", mpsc::sync_channel(1).1, parser)
            .unwrap();

        let input = pipeline::from_iter(vec![
            int("txn_1", 1000, 1),
            ext("txn_1", 1000, 1),
            int("txn_2", 700, 5),
        ]);
        let results = service.reconcile(input).unwrap();
        let mismatched: Vec<_> = service.filter_mismatched(results).iter().collect();
        assert_eq!(mismatched.len(), 1);
        assert_eq!(mismatched[0].transaction.id, "txn_2");
        assert_eq!(mismatched[0].remark, REMARK_NO_EXTERNAL);
    }
}
