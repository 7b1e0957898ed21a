use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::{DateRange, ReconOptions, DEFAULT_WORKERS};
use crate::error::ReconError;
use crate::parser::{ColumnOverrides, CsvRecordParser, ParserKind};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    pub name: String,
    /// Parse workers per source.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Mismatch report path, relative to the config file.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub filter: FilterConfig,
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Inclusive `["YYYY-MM-DD", "YYYY-MM-DD"]`.
    #[serde(default)]
    pub date_range: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub role: SourceRole,
    pub file: String,
    pub parser: ParserKind,
    #[serde(default)]
    pub columns: ColumnOverrides,
}

impl SourceConfig {
    pub fn record_parser(&self) -> CsvRecordParser {
        CsvRecordParser::with_columns(self.parser, &self.columns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Internal,
    External,
}

impl std::fmt::Display for SourceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.sources.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one source is required".into(),
            ));
        }

        let internal: Vec<&str> = self
            .sources
            .iter()
            .filter(|(_, s)| s.role == SourceRole::Internal)
            .map(|(name, _)| name.as_str())
            .collect();
        match internal.len() {
            1 => {}
            0 => {
                return Err(ReconError::ConfigValidation(
                    "exactly one internal source is required, found none".into(),
                ))
            }
            n => {
                return Err(ReconError::ConfigValidation(format!(
                    "exactly one internal source is required, found {n}: {}",
                    internal.join(", ")
                )))
            }
        }

        for (name, source) in &self.sources {
            if name.trim().is_empty() {
                return Err(ReconError::ConfigValidation("source name must not be empty".into()));
            }
            if source.file.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "source '{name}': file must not be empty"
                )));
            }
        }

        if self.workers == 0 {
            return Err(ReconError::ConfigValidation("workers must be at least 1".into()));
        }

        self.date_range()?;
        Ok(())
    }

    /// The parsed `[filter] date_range`, if configured.
    pub fn date_range(&self) -> Result<Option<DateRange>, ReconError> {
        match self.filter.date_range.as_deref() {
            None => Ok(None),
            Some([start, end]) => DateRange::parse(start, end).map(Some),
            Some(other) => Err(ReconError::ConfigValidation(format!(
                "date_range needs exactly 2 dates, got {}",
                other.len()
            ))),
        }
    }

    pub fn internal_source(&self) -> Option<(&str, &SourceConfig)> {
        self.sources
            .iter()
            .find(|(_, s)| s.role == SourceRole::Internal)
            .map(|(name, s)| (name.as_str(), s))
    }

    /// External sources in name order.
    pub fn external_sources(&self) -> impl Iterator<Item = (&str, &SourceConfig)> {
        self.sources
            .iter()
            .filter(|(_, s)| s.role == SourceRole::External)
            .map(|(name, s)| (name.as_str(), s))
    }

    pub fn recon_options(&self) -> ReconOptions {
        let date_range = match self.filter.date_range.as_deref() {
            Some([start, end]) => Some((start.clone(), end.clone())),
            _ => None,
        };
        ReconOptions { date_range, workers: self.workers }
    }
}
