//! Series construction: variable identity, per-capita, rate guards, stacking.

use grapher::color::ColorAssigner;
use grapher::params::{ConstrainedViewState, RawViewState, constrain};
use grapher::series::{
    PipelineError, Series, SeriesPoint, VariableKey, build_chart_variable, build_entity_series,
    build_metric_column, stack_series,
};
use grapher::table::CoreTable;

const CSV: &str = "\
iso_code,continent,location,date,new_cases,total_cases,new_deaths,total_deaths,new_tests,population
DEU,Europe,Germany,2020-05-01,100,1000,2,20,5000,83000000
DEU,Europe,Germany,2020-05-02,200,1200,4,24,4000,83000000
PER,South America,Peru,2020-05-01,50,500,5,50,100,32000000
PER,South America,Peru,2020-05-02,60,560,6,56,120,32000000
NRU,Oceania,Nauru,2020-05-01,3,30,0,0,10,
NRU,Oceania,Nauru,2020-05-02,4,34,0,0,10,
";

fn table() -> CoreTable {
    CoreTable::from_csv_reader(CSV.as_bytes()).unwrap()
}

fn state(query: &str) -> ConstrainedViewState {
    constrain(&RawViewState::parse(query))
}

#[test]
fn variable_ids_are_distinct_per_option_tuple() {
    let queries = [
        "",
        "casesMetric=true&interval=daily",
        "casesMetric=true&interval=daily&smoothing=7",
        "casesMetric=true&perCapita=true",
        "deathsMetric=true",
        "testsMetric=true&perCapita=true&interval=daily",
        "positiveTestRate=true",
    ];
    let mut ids: Vec<i64> = queries
        .iter()
        .map(|q| VariableKey::from_state(&state(q)).to_id())
        .collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before, "two option tuples collided");
    // Every id carries the fixed prefix.
    assert!(ids.iter().all(|id| id.to_string().starts_with("1145")));
}

#[test]
fn per_capita_excludes_entities_without_population() {
    let view = state("casesMetric=true&interval=daily&perCapita=true");
    let (augmented, slug) = build_metric_column(table(), &view);
    // Germany: 100 cases per 83M people, scaled to per-million.
    let germany_row = (0..augmented.row_count())
        .find(|&r| augmented.entity_at(r) == "Germany")
        .unwrap();
    let expected = 1_000_000.0 * 100.0 / 83_000_000.0;
    assert!((augmented.value_at(&slug, germany_row).unwrap() - expected).abs() < 1e-9);
    // Nauru has no population: excluded, not zero.
    let nauru_row = (0..augmented.row_count())
        .find(|&r| augmented.entity_at(r) == "Nauru")
        .unwrap();
    assert_eq!(augmented.value_at(&slug, nauru_row), None);
}

#[test]
fn rate_guards_exclude_unreliable_countries() {
    let view = state("positiveTestRate=true");
    let (augmented, slug) = build_metric_column(table(), &view);
    for row in 0..augmented.row_count() {
        match augmented.entity_at(row) {
            // Peru's test data is excluded wholesale.
            "Peru" => assert_eq!(augmented.value_at(&slug, row), None),
            "Germany" => {
                let rate = augmented.value_at(&slug, row).unwrap();
                assert!((0.0..=1.0).contains(&rate));
            }
            _ => {}
        }
    }
}

#[test]
fn dailies_derive_from_cumulative_only_datasets() {
    let csv = "\
location,date,total_cases
Aland,2020-05-01,100
Aland,2020-05-02,150
Aland,2020-05-03,175
";
    let table = CoreTable::from_csv_reader(csv.as_bytes()).unwrap();
    let view = state("casesMetric=true&interval=daily");
    let (augmented, slug) = build_metric_column(table, &view);
    // First row has no predecessor.
    assert_eq!(augmented.value_at(&slug, 0), None);
    assert_eq!(augmented.value_at(&slug, 1), Some(50.0));
    assert_eq!(augmented.value_at(&slug, 2), Some(25.0));
}

#[test]
fn sparse_test_reports_are_gap_filled_for_rates() {
    // Tests reported only every other day; cases daily.
    let csv = "\
location,date,new_cases,new_tests
Aland,2020-05-01,10,1000
Aland,2020-05-02,20,
Aland,2020-05-03,30,1500
";
    let table = CoreTable::from_csv_reader(csv.as_bytes()).unwrap();
    let view = state("positiveTestRate=true");
    let (augmented, slug) = build_metric_column(table, &view);
    // The gap day uses the nearest past report.
    assert_eq!(augmented.value_at(&slug, 1), Some(20.0 / 1000.0));
    assert_eq!(augmented.value_at(&slug, 0), Some(10.0 / 1000.0));
}

#[test]
fn series_respect_selection_and_assign_distinct_colors() {
    let view = state("casesMetric=true&interval=daily");
    let (augmented, slug) = build_metric_column(table(), &view);
    let mut assigner = ColorAssigner::office();
    let selection = vec!["Germany".to_string(), "Peru".to_string()];
    let series = build_entity_series(&augmented, &slug, None, &selection, &mut assigner);
    assert_eq!(series.len(), 2);
    assert_ne!(series[0].color, series[1].color);
    assert!(series.iter().all(|s| s.points.len() == 2));
}

#[test]
fn stacking_offsets_accumulate_and_gaps_count_as_zero() {
    let a = Series {
        name: "A".into(),
        color: "#4472C4".into(),
        points: vec![
            SeriesPoint { time: 0, value: 10.0 },
            SeriesPoint { time: 1, value: 20.0 },
        ],
    };
    // B has a gap at time 1.
    let b = Series {
        name: "B".into(),
        color: "#ED7D31".into(),
        points: vec![SeriesPoint { time: 0, value: 5.0 }],
    };
    let c = Series {
        name: "C".into(),
        color: "#A5A5A5".into(),
        points: vec![
            SeriesPoint { time: 0, value: 1.0 },
            SeriesPoint { time: 1, value: 2.0 },
        ],
    };
    let stacked = stack_series(&[a, b, c]);
    // Every stacked series covers the union of times.
    assert!(stacked.iter().all(|s| s.points.len() == 2));
    // C sits on top of A + B; B's gap contributes zero, not a shift.
    let c_at_1 = &stacked[2].points[1];
    assert_eq!(c_at_1.value_offset, 20.0);
    assert_eq!(c_at_1.value, 2.0);
    let c_at_0 = &stacked[2].points[0];
    assert_eq!(c_at_0.value_offset, 15.0);
}

#[test]
fn chart_variable_drops_missing_and_keeps_arrays_parallel() {
    let view = state("casesMetric=true&interval=daily&perCapita=true");
    let (augmented, slug) = build_metric_column(table(), &view);
    let key = VariableKey::from_state(&view);
    let variable = build_chart_variable(&augmented, &slug, &key).unwrap();
    assert_eq!(variable.id, key.to_id());
    // Nauru's rows are missing (no population) and therefore dropped.
    assert!(!variable.entity_names.iter().any(|n| n == "Nauru"));
    assert_eq!(variable.times.len(), variable.values.len());
    assert_eq!(variable.times.len(), variable.entities.len());
    assert_eq!(variable.times.len(), 4);
}

#[test]
fn unknown_column_is_a_typed_error() {
    let key = VariableKey::from_state(&state(""));
    let err = build_chart_variable(&table(), "no-such-column", &key).unwrap_err();
    assert_eq!(err, PipelineError::UnknownColumn("no-such-column".into()));
}
