//! # Selection Orchestrator
//!
//! One entry point for both lifecycles of a level set:
//!
//! - **Train**: join the tables, score every group, select a fresh level set and wrap it in
//!   a new `LevelStoreArtifact`.
//! - **Replay**: take a previously produced level set (bare, stored, or embedded in an
//!   encoded table), check it belongs to this grouping attribute, and hand it back untouched.
//!
//! Replay never looks at outcomes, so it can only fail validation, never scoring.

use crate::config::SelectionConfig;
use crate::data::{self, ColumnRoles, DataError, JoinedOutcomes, JoinedTable, Table};
use crate::encode::{EncodedTable, FillConfig};
use crate::scoring::{self, DataQualityError};
use crate::select::{self, ConfigurationError, LevelSelection, SelectionWarning};
use crate::store::LevelStoreArtifact;
use crate::types::SelectedLevelSet;
use thiserror::Error;

/// A previously produced level set in any of its interchangeable forms.
#[derive(Debug, Clone)]
pub enum ReplaySource {
    Levels(SelectedLevelSet),
    Artifact(LevelStoreArtifact),
    Encoded(EncodedTable),
}

impl From<SelectedLevelSet> for ReplaySource {
    fn from(levels: SelectedLevelSet) -> Self {
        ReplaySource::Levels(levels)
    }
}

impl From<LevelStoreArtifact> for ReplaySource {
    fn from(artifact: LevelStoreArtifact) -> Self {
        ReplaySource::Artifact(artifact)
    }
}

impl From<EncodedTable> for ReplaySource {
    fn from(table: EncodedTable) -> Self {
        ReplaySource::Encoded(table)
    }
}

#[derive(Debug, Clone, Default)]
pub enum SelectionMode {
    #[default]
    Train,
    Replay(ReplaySource),
}

impl SelectionMode {
    pub fn replay(source: impl Into<ReplaySource>) -> Self {
        SelectionMode::Replay(source.into())
    }
}

/// Which path a call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Replay,
}

#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub columns: ColumnRoles,
    pub config: SelectionConfig,
    pub fill: FillConfig,
    pub mode: SelectionMode,
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub mode: RunMode,
    pub artifact: LevelStoreArtifact,
    pub warnings: Vec<SelectionWarning>,
}

impl SelectionOutcome {
    pub fn levels(&self) -> &SelectedLevelSet {
        self.artifact.levels()
    }
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Data quality error: {0}")]
    DataQuality(#[from] DataQualityError),
    #[error(transparent)]
    Data(DataError),
}

impl From<DataError> for SelectionError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::Configuration(config) => SelectionError::Configuration(config),
            other => SelectionError::Data(other),
        }
    }
}

/// Trains a fresh level set or replays a stored one, as `request.mode` says.
pub fn run_selection(
    primary: &Table,
    long: &Table,
    request: SelectionRequest,
) -> Result<SelectionOutcome, SelectionError> {
    let SelectionRequest {
        columns,
        config,
        fill,
        mode,
    } = request;
    primary.require_column(&columns.identifier)?;
    long.require_column(&columns.identifier)?;
    long.require_column(&columns.grouping_attribute)?;

    match mode {
        SelectionMode::Train => train(primary, long, columns, config, fill),
        SelectionMode::Replay(source) => replay(source, columns, config, fill),
    }
}

fn train(
    primary: &Table,
    long: &Table,
    columns: ColumnRoles,
    config: SelectionConfig,
    fill: FillConfig,
) -> Result<SelectionOutcome, SelectionError> {
    config.validate()?;
    let joined = data::join(
        primary,
        long,
        &columns,
        config.outcome_kind,
        config.positive_class.as_deref(),
    )?;
    let selection = select_from_joined(&joined, &config)?;
    log::info!(
        "Training mode: selected {} of {} requested levels of '{}' for outcome '{}'",
        selection.levels.len(),
        config.n_levels,
        columns.grouping_attribute,
        columns.outcome
    );
    log::info!("Encoded columns will hold {fill}");

    Ok(SelectionOutcome {
        mode: RunMode::Train,
        artifact: LevelStoreArtifact::new(columns, config, fill, selection.levels),
        warnings: selection.warnings,
    })
}

fn replay(
    source: ReplaySource,
    columns: ColumnRoles,
    config: SelectionConfig,
    fill: FillConfig,
) -> Result<SelectionOutcome, SelectionError> {
    let artifact = match source {
        ReplaySource::Levels(levels) => {
            log::debug!("Replaying a bare level set; it carries no grouping attribute to check");
            LevelStoreArtifact::new(columns, config, fill, levels)
        }
        ReplaySource::Artifact(artifact) => {
            artifact.check_grouping_attribute(&columns.grouping_attribute)?;
            artifact
        }
        ReplaySource::Encoded(table) => {
            table
                .artifact
                .check_grouping_attribute(&columns.grouping_attribute)?;
            table.artifact
        }
    };
    log::info!(
        "Replay mode: reusing {} stored levels of '{}'",
        artifact.levels().len(),
        artifact.grouping_attribute()
    );
    Ok(SelectionOutcome {
        mode: RunMode::Replay,
        artifact,
        warnings: Vec::new(),
    })
}

/// Scores and selects levels from an already joined table.
///
/// The level count is checked against the groups present before any scoring happens.
pub fn select_from_joined(
    joined: &JoinedTable,
    config: &SelectionConfig,
) -> Result<LevelSelection, SelectionError> {
    config.validate()?;
    if joined.is_empty() {
        return Err(DataQualityError::NoScorableRows.into());
    }
    select::check_level_count(config.n_levels, joined.distinct_groups())?;

    let scores = match &joined.outcomes {
        JoinedOutcomes::Numeric(rows) => scoring::score_regression(rows, config.zero_variance)?,
        JoinedOutcomes::Binary { rows, .. } => {
            scoring::score_classification(rows, config.cohesion_weight)?
        }
    };
    Ok(select::select_levels(
        scores,
        joined.method(),
        config.n_levels,
    )?)
}
