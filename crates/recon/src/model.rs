use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::store::Indexed;

/// One decoded CSV row, keyed by header name.
pub type RawRecord = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A single normalized transaction from any source.
///
/// Produced once by a [`crate::parser::RecordParser`] and never mutated
/// afterwards. A record with `parse_error` set is reported but never matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub source: String,
    pub id: String,
    /// Category, e.g. `CREDIT` / `DEBIT`.
    #[serde(rename = "type")]
    pub kind: String,
    pub amount_cents: i64,
    /// Calendar day. `None` only when the date failed to parse.
    pub date: Option<NaiveDate>,
    /// Milliseconds since the epoch at UTC midnight of `date`.
    pub date_epoch: i64,
    pub parse_error: Option<String>,
}

impl Transaction {
    pub fn new(
        source: impl Into<String>,
        id: impl Into<String>,
        kind: impl Into<String>,
        amount_cents: i64,
        date: NaiveDate,
    ) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
            kind: kind.into(),
            amount_cents,
            date: Some(date),
            date_epoch: day_epoch_millis(date),
            parse_error: None,
        }
    }

    pub fn with_parse_error(mut self, err: impl Into<String>) -> Self {
        self.parse_error = Some(err.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.parse_error.is_none()
    }

    /// `YYYY-MM-DD`, or empty when the date is unknown.
    pub fn date_label(&self) -> String {
        self.date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
    }

    pub fn amount_label(&self) -> String {
        format_amount(self.amount_cents)
    }

    /// Amount bucket: `[date, type, amount]`.
    pub fn amount_path(&self) -> Vec<String> {
        vec![self.date_label(), self.kind.clone(), self.amount_label()]
    }

    /// Day bucket used by the end-of-stream sweep: `[date, type]`.
    pub fn date_path(&self) -> Vec<String> {
        vec![self.date_label(), self.kind.clone()]
    }
}

impl Indexed for Transaction {
    /// `date|type|id`
    fn primary_key(&self) -> String {
        format!("{}|{}|{}", self.date_label(), self.kind, self.id)
    }

    fn index_path(&self) -> Vec<String> {
        let mut path = self.amount_path();
        path.push(self.id.clone());
        path
    }
}

/// Epoch milliseconds at UTC midnight of `date`.
pub fn day_epoch_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Format minor units with two fractional digits (`-12.05`).
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{}", format_unsigned_amount(cents.unsigned_abs()))
}

pub fn format_unsigned_amount(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

// ---------------------------------------------------------------------------
// Reconciliation output
// ---------------------------------------------------------------------------

/// A match / mismatch decision for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconTransaction {
    pub transaction: Transaction,
    /// The counterpart from the opposite side, when matched.
    pub other: Option<Transaction>,
    pub is_matched: bool,
    pub is_error: bool,
    pub remark: String,
}

impl ReconTransaction {
    pub fn matched(transaction: Transaction, other: Transaction) -> Self {
        Self {
            transaction,
            other: Some(other),
            is_matched: true,
            is_error: false,
            remark: String::new(),
        }
    }

    pub fn unmatched(transaction: Transaction, remark: impl Into<String>) -> Self {
        Self {
            transaction,
            other: None,
            is_matched: false,
            is_error: false,
            remark: remark.into(),
        }
    }

    pub fn error(transaction: Transaction) -> Self {
        let remark = transaction.parse_error.clone().unwrap_or_default();
        Self {
            transaction,
            other: None,
            is_matched: false,
            is_error: true,
            remark,
        }
    }

    /// Absolute amount difference between the two sides (0 when unmatched).
    pub fn discrepancy_cents(&self) -> u64 {
        match &self.other {
            Some(other) => self.transaction.amount_cents.abs_diff(other.amount_cents),
            None => 0,
        }
    }
}

/// Flat row written to the mismatch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub source: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: String,
    pub date: String,
    pub remark: String,
    #[serde(skip)]
    pub is_matched: bool,
}

impl From<&ReconTransaction> for OutputRow {
    fn from(rt: &ReconTransaction) -> Self {
        let t = &rt.transaction;
        Self {
            source: t.source.clone(),
            id: t.id.clone(),
            kind: t.kind.clone(),
            amount: t.amount_label(),
            date: t.date_label(),
            remark: rt.remark.clone(),
            is_matched: rt.is_matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn keys_and_paths() {
        let t = Transaction::new("ledger", "txn_1", "DEBIT", 500, date("2025-01-01"));
        assert_eq!(t.primary_key(), "2025-01-01|DEBIT|txn_1");
        assert_eq!(t.amount_path(), vec!["2025-01-01", "DEBIT", "5.00"]);
        assert_eq!(t.date_path(), vec!["2025-01-01", "DEBIT"]);
        assert_eq!(t.index_path(), vec!["2025-01-01", "DEBIT", "5.00", "txn_1"]);
    }

    #[test]
    fn epoch_is_utc_midnight() {
        assert_eq!(day_epoch_millis(date("2025-01-01")), 1_735_689_600_000);
        assert_eq!(day_epoch_millis(date("2025-01-10")), 1_736_467_200_000);
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(1000), "10.00");
        assert_eq!(format_amount(-1205), "-12.05");
    }

    #[test]
    fn error_carries_parse_message() {
        let t = Transaction::default().with_parse_error("bad date");
        let rt = ReconTransaction::error(t);
        assert!(rt.is_error);
        assert!(!rt.is_matched);
        assert_eq!(rt.remark, "bad date");
    }

    #[test]
    fn output_row_flattens_transaction() {
        let t = Transaction::new("bank", "ext_1", "CREDIT", 1234, date("2025-03-04"));
        let row = OutputRow::from(&ReconTransaction::unmatched(t, "nope"));
        assert_eq!(row.amount, "12.34");
        assert_eq!(row.date, "2025-03-04");
        assert_eq!(row.kind, "CREDIT");
        assert_eq!(row.remark, "nope");
        assert!(!row.is_matched);
    }

    #[test]
    fn discrepancy_is_absolute() {
        let d = date("2025-01-01");
        let a = Transaction::new("ledger", "txn_1", "", 1000, d);
        let b = Transaction::new("bank", "txn_1", "", 100, d);
        assert_eq!(ReconTransaction::matched(b.clone(), a.clone()).discrepancy_cents(), 900);
        assert_eq!(ReconTransaction::matched(a, b).discrepancy_cents(), 900);
    }

    #[test]
    fn discrepancy_spans_full_amount_range() {
        let d = date("2025-01-01");
        let low = Transaction::new("ledger", "txn_1", "", i64::MIN, d);
        let high = Transaction::new("bank", "txn_1", "", i64::MAX, d);
        assert_eq!(ReconTransaction::matched(high, low).discrepancy_cents(), u64::MAX);
    }
}
