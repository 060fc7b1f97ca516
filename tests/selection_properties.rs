use levelset::config::SelectionConfig;
use levelset::data::{ColumnRoles, LONG_TABLE, PRIMARY_TABLE, Table};
use levelset::encode::{FillConfig, encode};
use levelset::orchestrate::{
    RunMode, SelectionError, SelectionMode, SelectionRequest, run_selection,
};
use levelset::scoring::{
    DEFAULT_COHESION_WEIGHT, ZeroVariancePolicy, score_classification, score_regression,
};
use levelset::select::{ConfigurationError, select_levels};
use levelset::types::{AssociationSign, JoinedObservation, ScoringMethod};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Builds a primary table of (id, outcome) and a long table of (id, medication).
fn tables(memberships: &[(String, String)], outcomes: &[(String, f64)]) -> (Table, Table) {
    let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    let values: Vec<f64> = outcomes.iter().map(|(_, y)| *y).collect();
    let primary = Table::new(
        PRIMARY_TABLE,
        df!("patient_id" => ids, "outcome" => values).unwrap(),
    );
    let long_ids: Vec<&str> = memberships.iter().map(|(id, _)| id.as_str()).collect();
    let groups: Vec<&str> = memberships.iter().map(|(_, g)| g.as_str()).collect();
    let long = Table::new(
        LONG_TABLE,
        df!("patient_id" => long_ids, "medication" => groups).unwrap(),
    );
    (primary, long)
}

/// Six medications with known probabilities of the positive class, 100 patients each.
fn medication_cohort() -> (Vec<(String, String)>, Vec<(String, f64)>) {
    let cohort = [
        ("insulin", 99),
        ("metformin", 95),
        ("prednisone", 25),
        ("metoprolol", 20),
        ("nexium", 50),
        ("tiotropium", 50),
    ];
    let mut memberships = Vec::new();
    let mut outcomes = Vec::new();
    for (medication, positives) in cohort {
        for k in 0..100 {
            let id = format!("{medication}-{k}");
            memberships.push((id.clone(), medication.to_string()));
            outcomes.push((id, if k < positives { 1.0 } else { 0.0 }));
        }
    }
    (memberships, outcomes)
}

/// Random regression data: each group has its own offset and spread.
fn random_cohort(seed: u64, groups: usize) -> (Vec<(String, String)>, Vec<(String, f64)>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut memberships = Vec::new();
    let mut outcomes = Vec::new();
    for g in 0..groups {
        let offset: f64 = rng.gen_range(-5.0..5.0);
        let spread: f64 = rng.gen_range(0.5..3.0);
        let size = rng.gen_range(3..40);
        for k in 0..size {
            let id = format!("g{g}-{k}");
            memberships.push((id.clone(), format!("code{g}")));
            outcomes.push((id, offset + spread * rng.gen_range(-1.0..1.0)));
        }
    }
    (memberships, outcomes)
}

fn train_request(n_levels: usize) -> SelectionRequest {
    SelectionRequest {
        columns: ColumnRoles::new("patient_id", "medication", "outcome"),
        config: SelectionConfig::with_levels(n_levels),
        fill: FillConfig::default(),
        mode: SelectionMode::Train,
    }
}

#[test]
fn classification_keeps_strongest_levels_and_drops_neutral_ones() {
    let (memberships, outcomes) = medication_cohort();
    let (primary, long) = tables(&memberships, &outcomes);
    let result = run_selection(&primary, &long, train_request(4)).unwrap();

    let levels = result.levels();
    assert_eq!(levels.method(), ScoringMethod::Classification);
    let selected: Vec<(&str, AssociationSign)> = levels
        .levels()
        .iter()
        .map(|level| (level.group.as_str(), level.sign))
        .collect();
    assert_eq!(
        selected,
        vec![
            ("insulin", AssociationSign::Positive),
            ("metformin", AssociationSign::Positive),
            ("metoprolol", AssociationSign::Negative),
            ("prednisone", AssociationSign::Negative),
        ]
    );
    assert!(!levels.contains("nexium"));
    assert!(!levels.contains("tiotropium"));
    assert!(result.warnings.is_empty());
}

#[test]
fn selection_never_exceeds_budget_and_balances_when_possible() {
    for seed in 0..8 {
        let (memberships, outcomes) = random_cohort(seed, 30);
        let rows: Vec<JoinedObservation<f64>> = memberships
            .iter()
            .zip(&outcomes)
            .map(|((id, group), (_, y))| JoinedObservation::new(id.as_str(), group.as_str(), *y))
            .collect();
        let scores = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
        let positives = scores
            .iter()
            .filter(|s| s.sign == AssociationSign::Positive)
            .count();
        let negatives = scores.len() - positives;

        for n_levels in [1, 2, 5, 8, 13, 20] {
            let selection =
                select_levels(scores.clone(), ScoringMethod::Regression, n_levels).unwrap();
            let set = &selection.levels;
            assert!(set.len() <= n_levels);
            let half = n_levels / 2;
            if n_levels % 2 == 0 && positives >= half && negatives >= half {
                assert_eq!(set.count_with_sign(AssociationSign::Positive), half);
                assert_eq!(set.count_with_sign(AssociationSign::Negative), half);
            }
        }
    }
}

#[test]
fn training_twice_gives_identical_levels() {
    let (memberships, outcomes) = random_cohort(7, 25);
    let (primary, long) = tables(&memberships, &outcomes);
    let first = run_selection(&primary, &long, train_request(6)).unwrap();
    let second = run_selection(&primary, &long, train_request(6)).unwrap();
    assert_eq!(first.artifact, second.artifact);
}

#[test]
fn row_order_does_not_change_the_selection() {
    let (mut memberships, mut outcomes) = random_cohort(11, 25);
    let (primary, long) = tables(&memberships, &outcomes);
    let baseline = run_selection(&primary, &long, train_request(6)).unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    memberships.shuffle(&mut rng);
    outcomes.shuffle(&mut rng);
    let (primary, long) = tables(&memberships, &outcomes);
    let shuffled = run_selection(&primary, &long, train_request(6)).unwrap();

    let signature = |set: &levelset::types::SelectedLevelSet| -> Vec<(String, AssociationSign)> {
        set.levels()
            .iter()
            .map(|level| (level.group.clone(), level.sign))
            .collect()
    };
    assert_eq!(signature(baseline.levels()), signature(shuffled.levels()));
}

#[test]
fn replay_reproduces_training_columns_on_new_data() {
    let (memberships, outcomes) = medication_cohort();
    let (primary, long) = tables(&memberships, &outcomes);
    let trained = run_selection(&primary, &long, train_request(4)).unwrap();
    let training_columns = encode(
        &primary,
        &long,
        "patient_id",
        &trained.artifact,
        &FillConfig::default(),
    )
    .unwrap()
    .columns;

    // Deployment data: one unseen medication, most selected ones absent, no outcome column.
    let primary = Table::new(
        PRIMARY_TABLE,
        df!("patient_id" => &["x1", "x2", "x3"]).unwrap(),
    );
    let long = Table::new(
        LONG_TABLE,
        df!(
            "patient_id" => &["x1", "x2", "x3"],
            "medication" => &["insulin", "warfarin", "warfarin"]
        )
        .unwrap(),
    );
    let mut request = train_request(4);
    request.mode = SelectionMode::replay(trained.artifact.clone());
    let replayed = run_selection(&primary, &long, request).unwrap();
    assert_eq!(replayed.mode, RunMode::Replay);

    let encoded = encode(
        &primary,
        &long,
        "patient_id",
        &replayed.artifact,
        &FillConfig::default(),
    )
    .unwrap();
    assert_eq!(encoded.columns, training_columns);
    assert_eq!(encoded.values.row(0).sum(), 1.0);
    assert_eq!(encoded.values.row(1).sum(), 0.0);

    // An encoded table is itself a valid replay source.
    let mut request = train_request(4);
    request.mode = SelectionMode::replay(encoded);
    let from_encoded = run_selection(&primary, &long, request).unwrap();
    assert_eq!(from_encoded.artifact, trained.artifact);
}

#[test]
fn regression_score_is_monotone_in_each_factor() {
    let mut rows = Vec::new();
    let mut push = |group: &str, values: &[f64]| {
        for (k, &y) in values.iter().enumerate() {
            rows.push(JoinedObservation::new(format!("{group}-{k}"), group, y));
        }
    };
    push("base", &[11.0, 13.0, 11.0, 13.0]);
    push("farther", &[13.0, 15.0, 13.0, 15.0]);
    push("tighter", &[11.5, 12.5, 11.5, 12.5]);
    push("larger", &[11.0, 13.0, 11.0, 13.0, 11.0, 13.0, 11.0, 13.0]);
    push("anchor", &[0.0, 1.0].repeat(10));

    let scores = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
    let selection = select_levels(scores, ScoringMethod::Regression, 5).unwrap();
    let positives: Vec<&str> = selection
        .levels
        .levels()
        .iter()
        .filter(|level| level.sign == AssociationSign::Positive)
        .map(|level| level.group.as_str())
        .collect();
    assert_eq!(positives.len(), 4);
    assert_eq!(positives.last(), Some(&"base"));
}

#[test]
fn homogeneous_groups_rank_by_distance_from_the_mean() {
    let mut rows = Vec::new();
    for k in 0..3 {
        rows.push(JoinedObservation::new(format!("strong-{k}"), "z_strong", 100.0));
        rows.push(JoinedObservation::new(format!("weak-{k}"), "a_weak", 11.0));
    }
    for k in 0..200 {
        rows.push(JoinedObservation::new(format!("neg-{k}"), "neg", (k % 2) as f64));
    }

    let scores = score_regression(&rows, ZeroVariancePolicy::Saturate).unwrap();
    let saturated = scores
        .iter()
        .filter(|s| s.omega == f64::INFINITY)
        .count();
    assert_eq!(saturated, 2);

    let selection = select_levels(scores, ScoringMethod::Regression, 2).unwrap();
    let groups: Vec<&str> = selection.levels.groups().collect();
    assert_eq!(groups, vec!["z_strong", "neg"]);
}

#[test]
fn requesting_more_than_twice_the_groups_fails() {
    let (memberships, outcomes) = medication_cohort();
    let (primary, long) = tables(&memberships, &outcomes);
    let err = run_selection(&primary, &long, train_request(13)).unwrap_err();
    assert!(matches!(
        err,
        SelectionError::Configuration(ConfigurationError::TooManyLevels {
            requested: 13,
            available: 6
        })
    ));
}

#[test]
fn pure_groups_are_finite_and_most_extreme() {
    let layout = [("always", 20), ("mostly", 18), ("sometimes", 10), ("never", 0), ("rarely", 2)];
    let mut rows = Vec::new();
    for (group, positives) in layout {
        for k in 0..20 {
            rows.push(JoinedObservation::new(format!("{group}-{k}"), group, k < positives));
        }
    }
    let scores = score_classification(&rows, DEFAULT_COHESION_WEIGHT).unwrap();
    assert!(scores.iter().all(|s| s.omega.is_finite()));

    let selection = select_levels(scores, ScoringMethod::Classification, 4).unwrap();
    let levels = selection.levels.levels();
    let first_of = |sign: AssociationSign| {
        levels
            .iter()
            .find(|level| level.sign == sign)
            .map(|level| level.group.as_str())
    };
    assert_eq!(first_of(AssociationSign::Positive), Some("always"));
    assert_eq!(first_of(AssociationSign::Negative), Some("never"));
}
