//! # Level Selector
//!
//! Ranks scored groups, splits the budget between positively and negatively associated
//! levels and truncates to the requested count.

use crate::types::{
    AssociationSign, LevelScore, ScoringMethod, SelectedLevel, SelectedLevelSet, rank_order,
};
use std::fmt;
use thiserror::Error;

/// Input errors. These always surface before any scoring work is done.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("The number of levels to select must be positive.")]
    NonPositiveLevelCount,
    #[error(
        "Requested {requested} levels, but only {available} distinct groups are present; at most {max} levels may be requested.",
        max = 2 * .available
    )]
    TooManyLevels { requested: usize, available: usize },
    #[error(
        "The outcome column '{column}' has {found} distinct classes ({examples}); classification supports at most two."
    )]
    TooManyClasses {
        column: String,
        found: usize,
        examples: String,
    },
    #[error(
        "The positive class '{label}' does not occur in the outcome column (observed: {observed})."
    )]
    UnknownPositiveClass { label: String, observed: String },
    #[error("The required column '{column}' was not found in the {table} table.")]
    MissingColumn { table: &'static str, column: String },
    #[error(
        "The stored level set was built for grouping attribute '{stored}', but this call groups by '{requested}'."
    )]
    GroupingAttributeMismatch { stored: String, requested: String },
    #[error("The cohesion weight must be a finite positive number, got {0}.")]
    InvalidCohesionWeight(f64),
    #[error("The zero-variance cap must be a finite positive number, got {0}.")]
    InvalidZeroVarianceCap(f64),
    #[error("The level '{0}' appears more than once in the level set.")]
    DuplicateLevel(String),
}

/// Non-fatal conditions reported alongside a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionWarning {
    /// Fewer groups were eligible than requested; every eligible group was returned.
    Shortfall { requested: usize, selected: usize },
    /// One sign ran out of candidates, so the other sign filled its slots.
    Unbalanced { positive: usize, negative: usize },
}

impl fmt::Display for SelectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionWarning::Shortfall {
                requested,
                selected,
            } => write!(
                f,
                "requested {requested} levels but only {selected} groups were eligible"
            ),
            SelectionWarning::Unbalanced { positive, negative } => write!(
                f,
                "could not balance signs: selected {positive} positive and {negative} negative levels"
            ),
        }
    }
}

/// A fresh selection and whatever went less than perfectly while making it.
#[derive(Debug, Clone)]
pub struct LevelSelection {
    pub levels: SelectedLevelSet,
    pub warnings: Vec<SelectionWarning>,
}

/// Rejects level counts that can never be satisfied by `available` groups.
pub fn check_level_count(requested: usize, available: usize) -> Result<(), ConfigurationError> {
    if requested == 0 {
        return Err(ConfigurationError::NonPositiveLevelCount);
    }
    if requested > 2 * available {
        return Err(ConfigurationError::TooManyLevels {
            requested,
            available,
        });
    }
    Ok(())
}

/// Picks up to `n_levels` groups, half from each sign where possible.
///
/// The extra slot of an odd budget goes to whichever sign's next candidate ranks better.
/// When a sign runs short, the other sign fills in. The result is listed in rank order.
pub fn select_levels(
    scores: Vec<LevelScore>,
    method: ScoringMethod,
    n_levels: usize,
) -> Result<LevelSelection, ConfigurationError> {
    check_level_count(n_levels, scores.len())?;

    let (mut positive, mut negative): (Vec<LevelScore>, Vec<LevelScore>) = scores
        .into_iter()
        .partition(|score| score.sign == AssociationSign::Positive);
    positive.sort_by(|a, b| rank_order(method, a, b));
    negative.sort_by(|a, b| rank_order(method, a, b));

    let (positive_quota, negative_quota) =
        allocate_quotas(method, &positive, &negative, n_levels);
    log::debug!(
        "Allocating {positive_quota} positive and {negative_quota} negative slots from {} and {} candidates",
        positive.len(),
        negative.len()
    );

    let mut warnings = Vec::new();
    let selected_count = positive_quota + negative_quota;
    if selected_count < n_levels {
        warnings.push(SelectionWarning::Shortfall {
            requested: n_levels,
            selected: selected_count,
        });
    }
    if positive_quota.abs_diff(negative_quota) > 1 {
        warnings.push(SelectionWarning::Unbalanced {
            positive: positive_quota,
            negative: negative_quota,
        });
    }
    for warning in &warnings {
        log::warn!("Level selection: {warning}");
    }

    positive.truncate(positive_quota);
    negative.truncate(negative_quota);
    let mut chosen: Vec<LevelScore> = positive.into_iter().chain(negative).collect();
    chosen.sort_by(|a, b| rank_order(method, a, b));

    let levels = SelectedLevelSet::new(
        method,
        chosen.into_iter().map(SelectedLevel::from).collect(),
    )?;
    Ok(LevelSelection { levels, warnings })
}

/// Splits `n_levels` into per-sign quotas that never exceed the available candidates.
fn allocate_quotas(
    method: ScoringMethod,
    positive: &[LevelScore],
    negative: &[LevelScore],
    n_levels: usize,
) -> (usize, usize) {
    let half = n_levels / 2;
    let (mut pos_quota, mut neg_quota) = (half, half);
    if n_levels % 2 == 1 {
        match (positive.get(half), negative.get(half)) {
            (Some(p), Some(n)) if rank_order(method, p, n).is_lt() => pos_quota += 1,
            (Some(_), None) => pos_quota += 1,
            _ => neg_quota += 1,
        }
    }

    if positive.len() < pos_quota {
        neg_quota += pos_quota - positive.len();
        pos_quota = positive.len();
    }
    if negative.len() < neg_quota {
        pos_quota += neg_quota - negative.len();
        neg_quota = negative.len();
    }
    (pos_quota.min(positive.len()), neg_quota)
}
