//! # Association Scorer
//!
//! Computes one informativeness statistic (Ω) per distinct group from joined
//! (observation, group, outcome) rows.
//!
//! - Regression: `Ω_j = (ȳ_j − ȳ) / sqrt(σ²_j / n_j)`, larger magnitude is better.
//! - Classification: `Ω_j = purity_j^ξ × −ln(n_j / n)`, smaller is better.
//!
//! Per-group reductions run in parallel with one task per group. Each reduction walks its
//! rows in input order, so results are bit-identical from run to run.

use crate::types::{
    AssociationSign, ClassStatistics, GroupStatistics, JoinedObservation, LevelScore,
};
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default exponent on the class-purity factor of the classification statistic.
pub const DEFAULT_COHESION_WEIGHT: f64 = 2.0;

/// Distance a pure group's positive count is moved away from the boundary.
const CONTINUITY_SHIFT: f64 = 0.5;

/// What a regression group with zero within-group variance scores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ZeroVariancePolicy {
    /// Score is ±∞. Saturated groups rank ahead of all finite scores and are ordered among
    /// themselves by distance from the global mean, then support, then identifier.
    #[default]
    Saturate,
    /// Score is ±cap.
    Cap(f64),
    /// Fail with `DataQualityError::ZeroVariance`.
    Reject,
}

impl fmt::Display for ZeroVariancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroVariancePolicy::Saturate => write!(f, "saturate"),
            ZeroVariancePolicy::Cap(cap) => write!(f, "cap({cap})"),
            ZeroVariancePolicy::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataQualityError {
    #[error(
        "Group '{group}' has zero outcome variance across {n} observations and the zero-variance policy is 'reject'. Choose 'saturate' or 'cap' to score it."
    )]
    ZeroVariance { group: String, n: usize },
    #[error(
        "No observations remained after joining group memberships to outcomes. Check that the identifier columns share values and that outcomes are present."
    )]
    NoScorableRows,
    #[error("The outcome for observation '{0}' is not finite (NaN or Infinity).")]
    NonFiniteOutcome(String),
}

/// Proportion of positives in a group of `n`, moved half a count away from 0 and 1.
///
/// `n` must be positive. A singleton lands on exactly 0.5 either way.
pub fn continuity_corrected_proportion(positives: usize, n: usize) -> f64 {
    let n = n as f64;
    let positives = positives as f64;
    if positives <= 0.0 {
        CONTINUITY_SHIFT / n
    } else if positives >= n {
        (n - CONTINUITY_SHIFT) / n
    } else {
        positives / n
    }
}

/// Scores every group against a numeric outcome.
pub fn score_regression(
    rows: &[JoinedObservation<f64>],
    policy: ZeroVariancePolicy,
) -> Result<Vec<LevelScore>, DataQualityError> {
    if rows.is_empty() {
        return Err(DataQualityError::NoScorableRows);
    }
    if let Some(row) = rows.iter().find(|row| !row.outcome.is_finite()) {
        return Err(DataQualityError::NonFiniteOutcome(row.observation.clone()));
    }

    let global_mean = rows.iter().map(|row| row.outcome).sum::<f64>() / rows.len() as f64;
    let buckets = bucket_by_group(rows);
    log::debug!(
        "Scoring {} groups against a global mean of {global_mean:.6}",
        buckets.len()
    );

    buckets
        .par_iter()
        .map(|(group, outcomes)| {
            let stats = regression_statistics(outcomes);
            let omega = regression_omega(group, &stats, global_mean, policy)?;
            let sign = if stats.mean > global_mean {
                AssociationSign::Positive
            } else {
                AssociationSign::Negative
            };
            Ok(LevelScore {
                group: (*group).to_string(),
                n: stats.n,
                omega,
                sign,
                effect: stats.mean - global_mean,
            })
        })
        .collect()
}

/// Scores every group against a binary outcome (`true` = positive class).
pub fn score_classification(
    rows: &[JoinedObservation<bool>],
    cohesion_weight: f64,
) -> Result<Vec<LevelScore>, DataQualityError> {
    if rows.is_empty() {
        return Err(DataQualityError::NoScorableRows);
    }

    let total = rows
        .iter()
        .map(|row| row.observation.as_str())
        .collect::<AHashSet<_>>()
        .len();
    let buckets = bucket_by_group(rows);
    let stats: Vec<(&str, ClassStatistics)> = buckets
        .par_iter()
        .map(|(group, outcomes)| {
            let positives = outcomes.iter().filter(|&&positive| positive).count();
            (
                *group,
                ClassStatistics {
                    n: outcomes.len(),
                    positives,
                },
            )
        })
        .collect();

    let reference = median(stats.iter().map(|(_, s)| s.proportion()).collect());
    log::debug!(
        "Scoring {} groups over {total} observations; median positive proportion {reference:.4}",
        stats.len()
    );

    Ok(stats
        .par_iter()
        .map(|(group, s)| {
            let leans_positive = s.proportion() > reference;
            LevelScore {
                group: (*group).to_string(),
                n: s.n,
                omega: classification_omega(s, total, leans_positive, cohesion_weight),
                sign: if leans_positive {
                    AssociationSign::Positive
                } else {
                    AssociationSign::Negative
                },
                effect: s.proportion() - reference,
            }
        })
        .collect())
}

/// Groups outcomes by group id, keeping first-seen group order and input row order.
fn bucket_by_group<Y: Copy>(rows: &[JoinedObservation<Y>]) -> Vec<(&str, Vec<Y>)> {
    let mut index: AHashMap<&str, usize> = AHashMap::new();
    let mut buckets: Vec<(&str, Vec<Y>)> = Vec::new();
    for row in rows {
        let slot = *index.entry(row.group.as_str()).or_insert_with(|| {
            buckets.push((row.group.as_str(), Vec::new()));
            buckets.len() - 1
        });
        buckets[slot].1.push(row.outcome);
    }
    buckets
}

fn regression_statistics(outcomes: &[f64]) -> GroupStatistics {
    let n = outcomes.len();
    let mean = outcomes.iter().sum::<f64>() / n as f64;
    // Identical outcomes are detected exactly; the squared-deviation sum can leave a
    // rounding residue when the mean is not representable.
    let homogeneous = outcomes.iter().all(|&y| y == outcomes[0]);
    let variance = if n < 2 || homogeneous {
        0.0
    } else {
        outcomes.iter().map(|&y| (y - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    };
    GroupStatistics { n, mean, variance }
}

fn regression_omega(
    group: &str,
    stats: &GroupStatistics,
    global_mean: f64,
    policy: ZeroVariancePolicy,
) -> Result<f64, DataQualityError> {
    let difference = stats.mean - global_mean;
    if stats.variance > 0.0 {
        return Ok(difference / (stats.variance / stats.n as f64).sqrt());
    }
    if difference == 0.0 {
        return Ok(0.0);
    }
    match policy {
        ZeroVariancePolicy::Saturate => Ok(f64::INFINITY.copysign(difference)),
        ZeroVariancePolicy::Cap(cap) => Ok(cap.abs().copysign(difference)),
        ZeroVariancePolicy::Reject => Err(DataQualityError::ZeroVariance {
            group: group.to_string(),
            n: stats.n,
        }),
    }
}

fn classification_omega(
    stats: &ClassStatistics,
    total: usize,
    leans_positive: bool,
    cohesion_weight: f64,
) -> f64 {
    let p = continuity_corrected_proportion(stats.positives, stats.n);
    let purity = if leans_positive { -p.ln() } else { -(1.0 - p).ln() };
    // ln(n / n_j) rather than −ln(n_j / n) so a group covering everything scores +0.
    let frequency = (total as f64 / stats.n as f64).ln();
    purity.powf(cohesion_weight) * frequency
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn numeric(rows: &[(&str, &str, f64)]) -> Vec<JoinedObservation<f64>> {
        rows.iter()
            .map(|&(id, group, y)| JoinedObservation::new(id, group, y))
            .collect()
    }

    fn find<'a>(scores: &'a [LevelScore], group: &str) -> &'a LevelScore {
        scores.iter().find(|s| s.group == group).unwrap()
    }

    #[test]
    fn continuity_correction_at_boundaries() {
        assert_abs_diff_eq!(continuity_corrected_proportion(0, 10), 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(continuity_corrected_proportion(10, 10), 0.95, epsilon = 1e-12);
        assert_abs_diff_eq!(continuity_corrected_proportion(3, 10), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(continuity_corrected_proportion(0, 1), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(continuity_corrected_proportion(1, 1), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn regression_matches_hand_computed_statistic() {
        // Global mean 3.0; group a = {4, 6}: mean 5, variance 2, n 2 → (5 − 3) / sqrt(1) = 2.
        let rows = numeric(&[
            ("1", "a", 4.0),
            ("2", "a", 6.0),
            ("3", "b", 1.0),
            ("4", "b", 1.5),
            ("5", "b", 2.5),
        ]);
        let scores = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
        let a = find(&scores, "a");
        assert_eq!(a.n, 2);
        assert_eq!(a.sign, AssociationSign::Positive);
        assert_abs_diff_eq!(a.omega, 2.0, epsilon = 1e-12);
        assert_eq!(find(&scores, "b").sign, AssociationSign::Negative);
    }

    #[test]
    fn zero_variance_follows_policy() {
        let rows = numeric(&[
            ("1", "flat", 5.0),
            ("2", "flat", 5.0),
            ("3", "spread", 1.0),
            ("4", "spread", 2.0),
        ]);

        let saturated = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
        assert_eq!(find(&saturated, "flat").omega, f64::INFINITY);

        let capped = score_regression(&rows, ZeroVariancePolicy::Cap(25.0)).unwrap();
        assert_abs_diff_eq!(find(&capped, "flat").omega, 25.0, epsilon = 1e-12);

        let err = score_regression(&rows, ZeroVariancePolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            DataQualityError::ZeroVariance {
                group: "flat".to_string(),
                n: 2
            }
        );
    }

    #[test]
    fn zero_variance_at_global_mean_scores_zero() {
        let rows = numeric(&[("1", "only", 3.0), ("2", "only", 3.0)]);
        let scores = score_regression(&rows, ZeroVariancePolicy::Reject).unwrap();
        assert_eq!(scores[0].omega, 0.0);
    }

    #[test]
    fn singleton_is_treated_as_zero_variance() {
        let rows = numeric(&[("1", "solo", -2.0), ("2", "pair", 1.0), ("3", "pair", 2.0)]);
        let scores = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
        assert_eq!(find(&scores, "solo").omega, f64::NEG_INFINITY);
        assert_eq!(find(&scores, "solo").sign, AssociationSign::Negative);
    }

    #[test]
    fn non_finite_outcomes_are_rejected() {
        let rows = numeric(&[("1", "a", 1.0), ("2", "a", f64::NAN)]);
        let err = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap_err();
        assert_eq!(err, DataQualityError::NonFiniteOutcome("2".to_string()));
    }

    #[test]
    fn empty_input_has_nothing_to_score() {
        assert_eq!(
            score_classification(&[], DEFAULT_COHESION_WEIGHT).unwrap_err(),
            DataQualityError::NoScorableRows
        );
    }

    #[test]
    fn classification_matches_hand_computed_statistic() {
        // Three groups of four over twelve observations. Proportions 1.0, 0.5, 0.25;
        // median 0.5. Group "hi" leans positive with corrected p = 3.5 / 4.
        let mut rows = Vec::new();
        let layout = [("hi", 4), ("mid", 2), ("lo", 1)];
        let mut id = 0;
        for (group, positives) in layout {
            for k in 0..4 {
                rows.push(JoinedObservation::new(id.to_string(), group, k < positives));
                id += 1;
            }
        }
        let scores = score_classification(&rows, 2.0).unwrap();

        let frequency = 3.0_f64.ln();
        let hi = find(&scores, "hi");
        assert_eq!(hi.sign, AssociationSign::Positive);
        assert_abs_diff_eq!(hi.omega, (-(0.875_f64).ln()).powi(2) * frequency, epsilon = 1e-12);

        let lo = find(&scores, "lo");
        assert_eq!(lo.sign, AssociationSign::Negative);
        assert_abs_diff_eq!(lo.omega, (-(0.75_f64).ln()).powi(2) * frequency, epsilon = 1e-12);

        // At the median the group does not lean positive.
        assert_eq!(find(&scores, "mid").sign, AssociationSign::Negative);
    }

    #[test]
    fn pure_groups_stay_finite() {
        let mut rows = Vec::new();
        for k in 0..10 {
            rows.push(JoinedObservation::new(format!("p{k}"), "pure", true));
            rows.push(JoinedObservation::new(format!("n{k}"), "none", false));
        }
        let scores = score_classification(&rows, DEFAULT_COHESION_WEIGHT).unwrap();
        assert!(scores.iter().all(|s| s.omega.is_finite()));
    }

    #[test]
    fn group_covering_every_observation_scores_zero() {
        let rows = vec![
            JoinedObservation::new("1", "all", true),
            JoinedObservation::new("2", "all", false),
        ];
        let scores = score_classification(&rows, DEFAULT_COHESION_WEIGHT).unwrap();
        assert_eq!(scores[0].omega, 0.0);
        assert!(scores[0].omega.is_sign_positive());
    }
}
