//! # Encoder Module
//!
//! Turns a stored level set into wide columns on the primary table: one column per
//! selected level, in level-set order, filled from the long table's memberships.
//!
//! Which columns exist is decided only by the level set, and their names only by the fill
//! stored with it; a caller's fill can change cell values but never column names. Groups in
//! the data that the set
//! does not name are ignored, and named groups absent from the data produce a column holding
//! nothing but the missing fill. Training and deployment tables therefore always carry the
//! same columns.

use crate::data::{DataError, Table};
use crate::select::ConfigurationError;
use crate::store::LevelStoreArtifact;
use ahash::AHashMap;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// How repeated (identifier, group) memberships are combined into one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    First,
    /// Number of memberships, ignoring values.
    Count,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::First => "first",
            Aggregation::Count => "count",
        };
        write!(f, "{name}")
    }
}

fn default_present_value() -> f64 {
    1.0
}

/// Cell values for the encoded columns.
///
/// Without a value column every membership contributes `present_value` and repeats of a
/// membership do not add up, unless the aggregation is `Count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfig {
    /// Long-table column holding the value to place in the cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_present_value")]
    pub present_value: f64,
    /// Value for observations without a membership in the column's level.
    #[serde(default)]
    pub missing_value: f64,
    /// Defaults to `{grouping_attribute}_`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_prefix: Option<String>,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            value_column: None,
            aggregation: Aggregation::Sum,
            present_value: default_present_value(),
            missing_value: 0.0,
            column_prefix: None,
        }
    }
}

impl fmt::Display for FillConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value_column, self.aggregation) {
            (_, Aggregation::Count) => write!(f, "membership counts")?,
            (Some(column), aggregation) => {
                write!(f, "'{column}' values aggregated by {aggregation}")?
            }
            (None, _) => write!(f, "{} for each membership", self.present_value)?,
        }
        write!(f, ", {} where absent", self.missing_value)
    }
}

impl FillConfig {
    pub fn column_name(&self, grouping_attribute: &str, group: &str) -> String {
        match &self.column_prefix {
            Some(prefix) => format!("{prefix}{group}"),
            None => format!("{grouping_attribute}_{group}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The encoded column '{0}' already exists in the primary table.")]
    ColumnCollision(String),
    #[error(
        "The encoded table has {encoded} rows but the primary table has {primary}; encode and augment the same table."
    )]
    RowCountMismatch { encoded: usize, primary: usize },
}

/// Wide encoding of one primary table, carrying the level store it was built from.
#[derive(Debug, Clone)]
pub struct EncodedTable {
    /// Primary-table identifiers in row order.
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    /// Shape: [primary rows, selected levels].
    pub values: Array2<f64>,
    pub artifact: LevelStoreArtifact,
}

impl EncodedTable {
    /// Appends the encoded columns to `primary`.
    pub fn augment(&self, primary: &Table) -> Result<DataFrame, EncodeError> {
        if primary.height() != self.ids.len() {
            return Err(EncodeError::RowCountMismatch {
                encoded: self.ids.len(),
                primary: primary.height(),
            });
        }
        let columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(j, name)| Column::new(name.as_str().into(), self.values.column(j).to_vec()))
            .collect();
        Ok(primary.frame().hstack(&columns)?)
    }

    /// Writes the augmented primary table as TSV.
    pub fn write_tsv(&self, primary: &Table, path: &Path) -> Result<(), EncodeError> {
        let mut frame = self.augment(primary)?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b'\t')
            .finish(&mut frame)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct CellAccumulator {
    sum: f64,
    count: usize,
    min: f64,
    max: f64,
    first: f64,
}

impl CellAccumulator {
    fn new(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
            first: value,
        }
    }

    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::First => self.first,
            Aggregation::Count => self.count as f64,
        }
    }
}

/// Builds one column per level in `artifact` for every row of `primary`.
///
/// Column names follow `artifact.fill()`; `fill` decides what goes in the cells.
pub fn encode(
    primary: &Table,
    long: &Table,
    identifier: &str,
    artifact: &LevelStoreArtifact,
    fill: &FillConfig,
) -> Result<EncodedTable, EncodeError> {
    let grouping_attribute = artifact.grouping_attribute();
    primary.require_column(identifier)?;
    long.require_column(identifier)?;
    long.require_column(grouping_attribute)?;

    let columns: Vec<String> = artifact
        .levels()
        .groups()
        .map(|group| artifact.fill().column_name(grouping_attribute, group))
        .collect();
    if let Some(existing) = columns.iter().find(|name| primary.has_column(name)) {
        return Err(EncodeError::ColumnCollision(existing.clone()));
    }
    let column_of: AHashMap<&str, usize> = artifact
        .levels()
        .groups()
        .enumerate()
        .map(|(j, group)| (group, j))
        .collect();

    let ids = primary.complete_string_column(identifier)?;
    let mut rows_of: AHashMap<&str, Vec<usize>> = AHashMap::with_capacity(ids.len());
    for (row, id) in ids.iter().enumerate() {
        rows_of.entry(id.as_str()).or_default().push(row);
    }

    let long_ids = long.string_column(identifier)?;
    let long_groups = long.string_column(grouping_attribute)?;
    let long_values = match &fill.value_column {
        Some(column) => Some(long.optional_numeric_column(column)?),
        None => None,
    };
    let counts_repeats = fill.value_column.is_some() || fill.aggregation == Aggregation::Count;

    let mut cells: AHashMap<(&str, usize), CellAccumulator> = AHashMap::new();
    let mut ignored_groups = 0usize;
    for (k, (id, group)) in long_ids.iter().zip(&long_groups).enumerate() {
        let (Some(id), Some(group)) = (id, group) else {
            continue;
        };
        let Some(&column) = column_of.get(group.as_str()) else {
            ignored_groups += 1;
            continue;
        };
        if !rows_of.contains_key(id.as_str()) {
            continue;
        }
        let value = match &long_values {
            Some(values) => match values[k] {
                Some(value) => value,
                None => continue,
            },
            None => fill.present_value,
        };
        cells
            .entry((id.as_str(), column))
            .and_modify(|cell| {
                if counts_repeats {
                    cell.push(value)
                }
            })
            .or_insert_with(|| CellAccumulator::new(value));
    }

    let mut values = Array2::from_elem((ids.len(), columns.len()), fill.missing_value);
    let mut filled_columns = vec![false; columns.len()];
    for ((id, column), cell) in &cells {
        let value = cell.finish(fill.aggregation);
        for &row in &rows_of[id] {
            values[[row, *column]] = value;
        }
        filled_columns[*column] = true;
    }

    let empty_columns = filled_columns.iter().filter(|&&filled| !filled).count();
    log::info!(
        "Encoded {} levels of '{grouping_attribute}' for {} rows using {fill}",
        columns.len(),
        ids.len()
    );
    if empty_columns > 0 {
        log::info!(
            "{empty_columns} selected levels do not occur in this data and hold only the missing fill"
        );
    }
    if ignored_groups > 0 {
        log::debug!("Ignored {ignored_groups} memberships in levels outside the stored set");
    }

    Ok(EncodedTable {
        ids,
        columns,
        values,
        artifact: artifact.clone(),
    })
}
