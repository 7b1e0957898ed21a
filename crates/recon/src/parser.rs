//! Source-specific record parsers: turn a [`RawRecord`] into a [`Transaction`].
//!
//! Parsing never fails outright. Any problem is written to
//! `Transaction::parse_error` (first problem wins) and the record flows on
//! so it can be reported.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::model::{day_epoch_millis, RawRecord, Transaction};

pub const CREDIT: &str = "CREDIT";
pub const DEBIT: &str = "DEBIT";

/// Converts one raw row from `source` into a transaction.
pub trait RecordParser: Send + Sync {
    fn parse(&self, source: &str, record: &RawRecord) -> Transaction;
}

// ---------------------------------------------------------------------------
// Parser kinds + columns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Internal ledger: explicit type, timestamp date, amount as-is.
    Ledger,
    /// Bank statement with a type column; amounts must be non-negative.
    TypedStatement,
    /// Bank statement where the amount sign carries the type.
    SignedStatement,
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ledger => write!(f, "ledger"),
            Self::TypedStatement => write!(f, "typed_statement"),
            Self::SignedStatement => write!(f, "signed_statement"),
        }
    }
}

/// Optional per-source column renames, as written in the run config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnOverrides {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub amount: Option<String>,
    pub date: Option<String>,
}

/// Resolved header names for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub id: String,
    /// `None` when the type is derived rather than read.
    pub kind: Option<String>,
    pub amount: String,
    pub date: String,
}

impl Columns {
    pub fn defaults(kind: ParserKind) -> Self {
        match kind {
            ParserKind::Ledger => Self {
                id: "id".into(),
                kind: Some("type".into()),
                amount: "amount".into(),
                date: "date".into(),
            },
            ParserKind::TypedStatement => Self {
                id: "ext_id".into(),
                kind: Some("type".into()),
                amount: "amount".into(),
                date: "date".into(),
            },
            ParserKind::SignedStatement => Self {
                id: "ext_id".into(),
                kind: None,
                amount: "amount".into(),
                date: "date".into(),
            },
        }
    }

    pub fn with_overrides(mut self, overrides: &ColumnOverrides) -> Self {
        if let Some(id) = &overrides.id {
            self.id = id.clone();
        }
        if let (Some(kind), Some(col)) = (&overrides.kind, self.kind.as_mut()) {
            *col = kind.clone();
        }
        if let Some(amount) = &overrides.amount {
            self.amount = amount.clone();
        }
        if let Some(date) = &overrides.date {
            self.date = date.clone();
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CsvRecordParser {
    kind: ParserKind,
    columns: Columns,
}

impl CsvRecordParser {
    pub fn new(kind: ParserKind) -> Self {
        Self { kind, columns: Columns::defaults(kind) }
    }

    pub fn with_columns(kind: ParserKind, overrides: &ColumnOverrides) -> Self {
        Self { kind, columns: Columns::defaults(kind).with_overrides(overrides) }
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn shared(self) -> Arc<dyn RecordParser> {
        Arc::new(self)
    }
}

impl RecordParser for CsvRecordParser {
    fn parse(&self, source: &str, record: &RawRecord) -> Transaction {
        let mut problems = Problems::default();

        let id = problems.check(field(record, &self.columns.id)).to_string();
        let kind = match &self.columns.kind {
            Some(col) => problems.check(field(record, col)).to_string(),
            None => String::new(),
        };

        let raw_date = problems.check(field(record, &self.columns.date));
        let parsed_date = match self.kind {
            ParserKind::Ledger => parse_timestamp_day(raw_date),
            ParserKind::TypedStatement | ParserKind::SignedStatement => parse_day(raw_date),
        };
        let date = problems.check(parsed_date.map(Some));

        let raw_amount = problems.check(field(record, &self.columns.amount));
        let mut amount_cents = problems.check(parse_amount(raw_amount));

        let kind = match self.kind {
            ParserKind::Ledger => kind,
            ParserKind::TypedStatement => {
                if amount_cents < 0 {
                    problems.note("negative amount provided".into());
                }
                kind
            }
            ParserKind::SignedStatement => {
                let derived = if amount_cents < 0 { DEBIT } else { CREDIT };
                amount_cents = amount_cents.abs();
                derived.to_string()
            }
        };

        Transaction {
            source: source.to_string(),
            id,
            kind,
            amount_cents,
            date,
            date_epoch: date.map(day_epoch_millis).unwrap_or(0),
            parse_error: problems.0,
        }
    }
}

/// Keeps the first problem seen while parsing one record.
#[derive(Default)]
struct Problems(Option<String>);

impl Problems {
    fn note(&mut self, msg: String) {
        self.0.get_or_insert(msg);
    }

    fn check<T: Default>(&mut self, result: Result<T, String>) -> T {
        result.unwrap_or_else(|msg| {
            self.note(msg);
            T::default()
        })
    }
}

fn field<'a>(record: &'a RawRecord, column: &str) -> Result<&'a str, String> {
    record
        .get(column)
        .map(|v| v.trim())
        .ok_or_else(|| format!("missing column '{column}'"))
}

/// `YYYY-MM-DD`.
pub fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("cannot parse date '{s}': {e}"))
}

/// `YYYY-MM-DD HH:MM:SS` (or RFC 3339), truncated to the calendar day.
pub fn parse_timestamp_day(s: &str) -> Result<NaiveDate, String> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.date());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .map_err(|e| format!("cannot parse timestamp '{s}': {e}"))
}

/// Parse a decimal string ("-1234.5") into signed minor units.
///
/// At most two fractional digits are accepted.
pub fn parse_amount(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty amount".into());
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (units, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if (units.is_empty() && frac.is_empty()) || !units.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("bad amount: {s}"));
    }

    let units: i64 = if units.is_empty() {
        0
    } else {
        units.parse().map_err(|e| format!("bad amount '{s}': {e}"))?
    };
    let cents: i64 = match frac.len() {
        0 => 0,
        1 | 2 if frac.bytes().all(|b| b.is_ascii_digit()) => {
            let c: i64 = frac.parse().map_err(|e| format!("bad cents '{s}': {e}"))?;
            if frac.len() == 1 { c * 10 } else { c }
        }
        1 | 2 => return Err(format!("bad cents: {s}")),
        _ => return Err(format!("too many decimal places: {s}")),
    };

    let minor = units
        .checked_mul(100)
        .and_then(|u| u.checked_add(cents))
        .ok_or_else(|| format!("amount out of range: {s}"))?;
    Ok(if negative { -minor } else { minor })
}
