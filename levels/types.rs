//! # Core Level Types
//!
//! Plain data shared by the scorer, the selector, the level store and the encoder.
//! Nothing in here touches tables or files; the joined observations arrive already
//! flattened into (observation, group, outcome) triples.

use crate::select::ConfigurationError;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of one level of the categorical attribute (e.g. one medication name).
pub type GroupId = String;

/// Which way a level pulls the outcome relative to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationSign {
    Positive,
    Negative,
}

impl fmt::Display for AssociationSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationSign::Positive => write!(f, "positive"),
            AssociationSign::Negative => write!(f, "negative"),
        }
    }
}

/// The scoring statistic used for a selection. Fixed per outcome: a numeric outcome is
/// scored with the standardized mean difference, a binary outcome with the
/// purity-times-frequency statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    Regression,
    Classification,
}

impl ScoringMethod {
    /// Orders two scores so that the stronger one comes first.
    ///
    /// Regression scores are strong when large in magnitude, classification scores when
    /// small. `total_cmp` keeps saturated (infinite) regression scores well ordered.
    pub fn compare_scores(self, a: f64, b: f64) -> Ordering {
        match self {
            ScoringMethod::Regression => b.abs().total_cmp(&a.abs()),
            ScoringMethod::Classification => a.total_cmp(&b),
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringMethod::Regression => write!(f, "regression"),
            ScoringMethod::Classification => write!(f, "classification"),
        }
    }
}

/// One (observation, group) membership carrying the observation's outcome.
///
/// `Y` is `f64` for numeric outcomes and `bool` (membership in the positive class) for
/// binary outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedObservation<Y> {
    pub observation: String,
    pub group: GroupId,
    pub outcome: Y,
}

impl<Y> JoinedObservation<Y> {
    pub fn new(observation: impl Into<String>, group: impl Into<GroupId>, outcome: Y) -> Self {
        Self {
            observation: observation.into(),
            group: group.into(),
            outcome,
        }
    }
}

/// Per-group summary of a numeric outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStatistics {
    pub n: usize,
    pub mean: f64,
    /// Sample variance with an `n - 1` denominator; zero for singletons and for groups whose
    /// outcomes are all identical.
    pub variance: f64,
}

/// Per-group summary of a binary outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassStatistics {
    pub n: usize,
    pub positives: usize,
}

impl ClassStatistics {
    /// Uncorrected fraction of the group in the positive class.
    pub fn proportion(&self) -> f64 {
        self.positives as f64 / self.n as f64
    }
}

/// The scorer's verdict on one group.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelScore {
    pub group: GroupId,
    pub n: usize,
    pub omega: f64,
    pub sign: AssociationSign,
    /// Signed distance from the reference: `ȳ_j − ȳ` for regression, `p_j − median` for
    /// classification.
    pub effect: f64,
}

/// The full ranking order used by the selector: score, then distance from the reference,
/// then larger support, then the natural order of the identifier, then its byte order.
///
/// Distance only matters when scores tie, which in practice means saturated regression
/// scores: two homogeneous groups both score ±∞ and the one farther from the mean wins.
pub fn rank_order(method: ScoringMethod, a: &LevelScore, b: &LevelScore) -> Ordering {
    method
        .compare_scores(a.omega, b.omega)
        .then_with(|| b.effect.abs().total_cmp(&a.effect.abs()))
        .then_with(|| b.n.cmp(&a.n))
        .then_with(|| natord::compare(&a.group, &b.group))
        .then_with(|| a.group.cmp(&b.group))
}

/// One retained level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedLevel {
    pub group: GroupId,
    pub sign: AssociationSign,
    /// Number of scored observations in the group at selection time.
    #[serde(default)]
    pub n: usize,
    /// The group's score at selection time. Saturated regression scores are infinite.
    #[serde(default)]
    pub omega: f64,
}

impl From<LevelScore> for SelectedLevel {
    fn from(score: LevelScore) -> Self {
        Self {
            group: score.group,
            sign: score.sign,
            n: score.n,
            omega: score.omega,
        }
    }
}

/// An ordered, immutable set of selected levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredLevelSet")]
pub struct SelectedLevelSet {
    method: ScoringMethod,
    levels: Vec<SelectedLevel>,
}

/// Wire form of `SelectedLevelSet`; deserialization goes through `SelectedLevelSet::new`.
#[derive(Deserialize)]
struct StoredLevelSet {
    method: ScoringMethod,
    levels: Vec<SelectedLevel>,
}

impl TryFrom<StoredLevelSet> for SelectedLevelSet {
    type Error = ConfigurationError;

    fn try_from(stored: StoredLevelSet) -> Result<Self, Self::Error> {
        Self::new(stored.method, stored.levels)
    }
}

impl SelectedLevelSet {
    /// Builds a set from already ordered levels. Identifiers must be unique because each
    /// one becomes a column downstream.
    pub fn new(
        method: ScoringMethod,
        levels: Vec<SelectedLevel>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = AHashSet::with_capacity(levels.len());
        for level in &levels {
            if !seen.insert(level.group.as_str()) {
                return Err(ConfigurationError::DuplicateLevel(level.group.clone()));
            }
        }
        Ok(Self { method, levels })
    }

    pub fn method(&self) -> ScoringMethod {
        self.method
    }

    pub fn levels(&self) -> &[SelectedLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Group identifiers in selection order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(|level| level.group.as_str())
    }

    pub fn contains(&self, group: &str) -> bool {
        self.levels.iter().any(|level| level.group == group)
    }

    pub fn count_with_sign(&self, sign: AssociationSign) -> usize {
        self.levels.iter().filter(|level| level.sign == sign).count()
    }
}
