//! # Table Loading and Join Module
//!
//! Reads the primary table and the long-format group table, validates the columns a call
//! needs, and joins group memberships onto outcomes by identifier.
//!
//! - All columns are read as text. Identifiers such as ZIP codes keep their leading zeros;
//!   numeric columns are parsed on demand.
//! - The outcome column decides the scoring path: numeric outcomes go to regression, binary
//!   ones to classification.
//! - The join is an inner join. Observations without an outcome and memberships pointing at
//!   unknown identifiers are dropped and counted.

use crate::config::OutcomeKind;
use crate::select::ConfigurationError;
use crate::types::{JoinedObservation, ScoringMethod};
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const PRIMARY_TABLE: &str = "primary";
pub const LONG_TABLE: &str = "long";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing values were found in the column '{0}'. Identifiers in the primary table must be complete."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. Numeric outcomes must be finite."
    )]
    NonFiniteValuesFound(String),
}

/// The column names a call works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub identifier: String,
    pub grouping_attribute: String,
    pub outcome: String,
}

impl ColumnRoles {
    pub fn new(
        identifier: impl Into<String>,
        grouping_attribute: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            grouping_attribute: grouping_attribute.into(),
            outcome: outcome.into(),
        }
    }
}

/// A named table backed by a polars `DataFrame`.
#[derive(Debug, Clone)]
pub struct Table {
    name: &'static str,
    frame: DataFrame,
}

impl Table {
    pub fn new(name: &'static str, frame: DataFrame) -> Self {
        Self { name, frame }
    }

    /// Reads a delimited file with a header row. Every column is loaded as text.
    pub fn read(name: &'static str, path: &Path, separator: u8) -> Result<Self, DataError> {
        log::info!("Loading {name} table from '{}'", path.display());
        let frame = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(Some(0))
                    .with_parse_options(CsvParseOptions::default().with_separator(separator)),
            )
            .finish()?;
        log::debug!(
            "Loaded {} rows and {} columns from '{}'",
            frame.height(),
            frame.width(),
            path.display()
        );
        Ok(Self { name, frame })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.frame
            .get_column_names()
            .iter()
            .any(|c| c.as_str() == column)
    }

    pub fn require_column(&self, column: &str) -> Result<(), ConfigurationError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(ConfigurationError::MissingColumn {
                table: self.name,
                column: column.to_string(),
            })
        }
    }

    /// Reads a column as text; nulls stay `None`.
    pub fn string_column(&self, column: &str) -> Result<Vec<Option<String>>, DataError> {
        self.require_column(column)?;
        let casted = self.frame.column(column)?.cast(&DataType::String)?;
        Ok(casted
            .str()?
            .into_iter()
            .map(|value| value.map(str::to_string))
            .collect())
    }

    /// Reads a column as text and requires every value to be present.
    pub fn complete_string_column(&self, column: &str) -> Result<Vec<String>, DataError> {
        let values = self.string_column(column)?;
        if values.iter().any(Option::is_none) {
            return Err(DataError::MissingValuesFound(column.to_string()));
        }
        Ok(values.into_iter().flatten().collect())
    }

    /// Parses a column as `f64`. Nulls stay `None`; any non-null value that does not parse is
    /// an error.
    pub fn optional_numeric_column(&self, column: &str) -> Result<Vec<Option<f64>>, DataError> {
        self.require_column(column)?;
        let series = self.frame.column(column)?;
        let wrong_type = || DataError::ColumnWrongType {
            column_name: column.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        };

        let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > series.null_count() {
            return Err(wrong_type());
        }
        Ok(casted.f64()?.into_iter().collect())
    }
}

/// Joined rows typed by scoring path.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinedOutcomes {
    Numeric(Vec<JoinedObservation<f64>>),
    Binary {
        rows: Vec<JoinedObservation<bool>>,
        positive_class: String,
    },
}

/// Bookkeeping from the join, logged at debug level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Distinct primary identifiers with an outcome.
    pub observations_with_outcome: usize,
    /// Distinct primary identifiers whose outcome is missing.
    pub observations_missing_outcome: usize,
    /// Long-table rows whose identifier is not in the primary table.
    pub unmatched_memberships: usize,
    /// Long-table rows repeating an (identifier, group) pair already joined.
    pub duplicate_memberships: usize,
    /// Long-table rows with a null identifier or group.
    pub incomplete_memberships: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub outcomes: JoinedOutcomes,
    pub summary: JoinSummary,
}

impl JoinedTable {
    pub fn method(&self) -> ScoringMethod {
        match self.outcomes {
            JoinedOutcomes::Numeric(_) => ScoringMethod::Regression,
            JoinedOutcomes::Binary { .. } => ScoringMethod::Classification,
        }
    }

    pub fn len(&self) -> usize {
        match &self.outcomes {
            JoinedOutcomes::Numeric(rows) => rows.len(),
            JoinedOutcomes::Binary { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct groups that made it through the join.
    pub fn distinct_groups(&self) -> usize {
        match &self.outcomes {
            JoinedOutcomes::Numeric(rows) => count_groups(rows),
            JoinedOutcomes::Binary { rows, .. } => count_groups(rows),
        }
    }
}

fn count_groups<Y>(rows: &[JoinedObservation<Y>]) -> usize {
    rows.iter()
        .map(|row| row.group.as_str())
        .collect::<AHashSet<_>>()
        .len()
}

/// Joins long-table memberships onto primary-table outcomes.
pub fn join(
    primary: &Table,
    long: &Table,
    roles: &ColumnRoles,
    kind: OutcomeKind,
    positive_class: Option<&str>,
) -> Result<JoinedTable, DataError> {
    primary.require_column(&roles.identifier)?;
    primary.require_column(&roles.outcome)?;
    long.require_column(&roles.identifier)?;
    long.require_column(&roles.grouping_attribute)?;

    let primary_ids = primary.string_column(&roles.identifier)?;
    let long_ids = long.string_column(&roles.identifier)?;
    let long_groups = long.string_column(&roles.grouping_attribute)?;

    let joined = match resolve_outcome(primary, &roles.outcome, kind, positive_class)? {
        ResolvedOutcome::Numeric(values) => {
            let (rows, summary) = join_rows(&primary_ids, &values, &long_ids, &long_groups);
            JoinedTable {
                outcomes: JoinedOutcomes::Numeric(rows),
                summary,
            }
        }
        ResolvedOutcome::Binary {
            values,
            positive_class,
        } => {
            let (rows, summary) = join_rows(&primary_ids, &values, &long_ids, &long_groups);
            JoinedTable {
                outcomes: JoinedOutcomes::Binary {
                    rows,
                    positive_class,
                },
                summary,
            }
        }
    };

    log::debug!(
        "Joined {} memberships ({} observations with outcome, {} missing outcome, {} unmatched, {} duplicate, {} incomplete)",
        joined.len(),
        joined.summary.observations_with_outcome,
        joined.summary.observations_missing_outcome,
        joined.summary.unmatched_memberships,
        joined.summary.duplicate_memberships,
        joined.summary.incomplete_memberships
    );
    Ok(joined)
}

enum ResolvedOutcome {
    Numeric(Vec<Option<f64>>),
    Binary {
        values: Vec<Option<bool>>,
        positive_class: String,
    },
}

fn resolve_outcome(
    table: &Table,
    column: &str,
    kind: OutcomeKind,
    positive_class: Option<&str>,
) -> Result<ResolvedOutcome, DataError> {
    // Numeric labels compare by value, so `1` and `1.0` are one class.
    let numeric = table.optional_numeric_column(column).ok();
    let (labels, distinct): (Vec<Option<String>>, Vec<String>) = match &numeric {
        Some(values) => (
            values.iter().map(|v| v.map(numeric_label)).collect(),
            values
                .iter()
                .flatten()
                .map(|&v| v + 0.0)
                .sorted_by(f64::total_cmp)
                .dedup_by(|a, b| a.total_cmp(b).is_eq())
                .map(numeric_label)
                .collect(),
        ),
        None => {
            let labels = table.string_column(column)?;
            let distinct = labels
                .iter()
                .flatten()
                .unique()
                .sorted_by(|a, b| natord::compare(a, b))
                .cloned()
                .collect();
            (labels, distinct)
        }
    };

    let method = match kind {
        OutcomeKind::Regression => ScoringMethod::Regression,
        OutcomeKind::Classification => ScoringMethod::Classification,
        OutcomeKind::Auto => {
            if distinct.len() != 2 && numeric.is_some() {
                ScoringMethod::Regression
            } else {
                ScoringMethod::Classification
            }
        }
    };
    log::debug!("Outcome column '{column}' scored with the {method} statistic");

    match method {
        ScoringMethod::Regression => {
            let values = table.optional_numeric_column(column)?;
            if values.iter().flatten().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(column.to_string()));
            }
            Ok(ResolvedOutcome::Numeric(values))
        }
        ScoringMethod::Classification => {
            if distinct.len() > 2 {
                return Err(ConfigurationError::TooManyClasses {
                    column: column.to_string(),
                    found: distinct.len(),
                    examples: distinct.iter().take(5).join(", "),
                }
                .into());
            }
            let requested = positive_class.map(|label| match (&numeric, label.parse::<f64>()) {
                (Some(_), Ok(value)) => numeric_label(value),
                _ => label.to_string(),
            });
            let positive = match requested {
                Some(label) if distinct.contains(&label) => label,
                Some(label) => {
                    return Err(ConfigurationError::UnknownPositiveClass {
                        label,
                        observed: distinct.join(", "),
                    }
                    .into());
                }
                None => distinct.last().cloned().unwrap_or_default(),
            };
            let values = labels
                .iter()
                .map(|label| label.as_deref().map(|l| l == positive))
                .collect();
            Ok(ResolvedOutcome::Binary {
                values,
                positive_class: positive,
            })
        }
    }
}

/// Canonical text of a numeric class label; `-0` folds into `0`.
fn numeric_label(value: f64) -> String {
    (value + 0.0).to_string()
}

fn join_rows<Y: Copy>(
    primary_ids: &[Option<String>],
    outcomes: &[Option<Y>],
    long_ids: &[Option<String>],
    long_groups: &[Option<String>],
) -> (Vec<JoinedObservation<Y>>, JoinSummary) {
    let mut summary = JoinSummary::default();

    // First occurrence wins when an identifier repeats in the primary table.
    let mut outcome_by_id: AHashMap<&str, Option<Y>> = AHashMap::with_capacity(primary_ids.len());
    for (id, outcome) in primary_ids.iter().zip(outcomes) {
        if let Some(id) = id {
            outcome_by_id.entry(id.as_str()).or_insert(*outcome);
        }
    }
    summary.observations_with_outcome = outcome_by_id.values().filter(|o| o.is_some()).count();
    summary.observations_missing_outcome = outcome_by_id.len() - summary.observations_with_outcome;

    let mut seen: AHashSet<(&str, &str)> = AHashSet::with_capacity(long_ids.len());
    let mut rows = Vec::with_capacity(long_ids.len());
    for (id, group) in long_ids.iter().zip(long_groups) {
        let (Some(id), Some(group)) = (id, group) else {
            summary.incomplete_memberships += 1;
            continue;
        };
        let Some(outcome) = outcome_by_id.get(id.as_str()) else {
            summary.unmatched_memberships += 1;
            continue;
        };
        if !seen.insert((id.as_str(), group.as_str())) {
            summary.duplicate_memberships += 1;
            continue;
        }
        if let Some(outcome) = outcome {
            rows.push(JoinedObservation::new(id.as_str(), group.as_str(), *outcome));
        }
    }
    (rows, summary)
}
