//! Codec laws: constraining is idempotent and serialization round-trips.

use grapher::params::{
    ChartKind, ConstrainedViewState, IntervalKind, MetricKind, RawViewState, constrain,
};

fn canonicalize(query: &str) -> ConstrainedViewState {
    constrain(&RawViewState::parse(query))
}

// Queries covering every repair step, legacy params, and encoding corners.
const QUERIES: [&str; 14] = [
    "",
    "casesMetric=true",
    "cfrMetric=true&perCapita=true&aligned=true",
    "cfrMetric=true&smoothing=7",
    "testsMetric=true&interval=weekly",
    "positiveTestRate=true&interval=daily",
    "testsPerCaseMetric=true&interval=smoothed&smoothing=7",
    "deathsMetric=true&interval=weeklyChange&perCapita=true",
    "casesMetric=true&interval=biweeklyChange&aligned=true",
    "casesMetric=true&interval=daily&smoothing=14",
    "smoothing=7&country=USA~GBR&perCapita=true",
    "totalFreq=true&smoothing=3",
    "dailyFreq=true&aligned=true",
    "deathsMetric=true&chartType=StackedArea&pickerMetric=total_deaths&pickerSort=desc",
];

#[test]
fn constrain_parse_serialize_is_identity() {
    for query in QUERIES {
        let state = canonicalize(query);
        let round = canonicalize(&state.to_query_string());
        assert_eq!(round, state, "round trip diverged for `{query}`");
    }
}

#[test]
fn serialization_is_stable() {
    for query in QUERIES {
        let state = canonicalize(query);
        let encoded = state.to_query_string();
        assert_eq!(
            canonicalize(&encoded).to_query_string(),
            encoded,
            "encoding not stable for `{query}`"
        );
    }
}

#[test]
fn empty_query_serializes_empty() {
    assert_eq!(canonicalize("").to_query_string(), "");
}

#[test]
fn exactly_one_metric_survives() {
    let state = canonicalize("deathsMetric=true&testsMetric=true&cfrMetric=true");
    // Flag order decides ties.
    assert_eq!(state.metric, MetricKind::Deaths);
    let encoded = state.to_query_string();
    let metric_flags = encoded
        .split('&')
        .filter(|p| p.ends_with("Metric=true") || p.starts_with("positiveTestRate"))
        .count();
    assert_eq!(metric_flags, 1);
}

#[test]
fn rate_repairs_reach_a_fixed_point() {
    let state = canonicalize("cfrMetric=true&perCapita=true&aligned=true&interval=daily");
    assert_eq!(state.metric, MetricKind::CaseFatalityRate);
    assert!(!state.per_capita);
    assert!(!state.aligned);
    // CFR supports neither daily nor smoothing, so daily lands on totals.
    assert_eq!(state.interval, IntervalKind::Total);
    assert_eq!(state.smoothing, 0);
    assert_eq!(constrain(&RawViewState::parse(&state.to_query_string())), state);
}

#[test]
fn daily_rate_prefers_smoothed() {
    let state = canonicalize("positiveTestRate=true&interval=daily");
    assert_eq!(state.interval, IntervalKind::Smoothed);
    assert_eq!(state.smoothing, 7);
}

#[test]
fn weekly_windows_pin_smoothing() {
    let state = canonicalize("deathsMetric=true&interval=weekly&smoothing=3");
    assert_eq!(state.interval, IntervalKind::Weekly);
    assert_eq!(state.smoothing, 7);
    let state = canonicalize("casesMetric=true&interval=biweeklyChange");
    assert_eq!(state.smoothing, 14);
}

#[test]
fn entity_names_with_spaces_round_trip() {
    let state = canonicalize("country=United%20States~Germany&deathsMetric=true");
    assert!(state.selected.contains("United States"));
    assert!(state.selected.contains("Germany"));
    let round = canonicalize(&state.to_query_string());
    assert_eq!(round.selected, state.selected);

    // '+' is an accepted space encoding on input.
    let plus = canonicalize("country=United+States");
    assert!(plus.selected.contains("United States"));
}

#[test]
fn literal_plus_in_entity_names_round_trips() {
    // An encoded plus must stay a plus; only a raw '+' means space.
    let state = canonicalize("deathsMetric=true&country=A%2BB");
    assert!(state.selected.contains("A+B"));
    let encoded = state.to_query_string();
    assert!(encoded.contains("country=A%2BB"));
    assert_eq!(canonicalize(&encoded).selected, state.selected);
}

#[test]
fn chart_kind_and_picker_round_trip() {
    let state =
        canonicalize("deathsMetric=true&chartType=StackedArea&pickerMetric=total_deaths&pickerSort=desc");
    assert_eq!(state.chart, ChartKind::StackedArea);
    assert_eq!(state.picker_metric.as_deref(), Some("total_deaths"));
    let round = canonicalize(&state.to_query_string());
    assert_eq!(round, state);
}
