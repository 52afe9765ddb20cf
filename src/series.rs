//! Column and series construction.
//!
//! Turns a [`CoreTable`] plus a [`ConstrainedViewState`] into the derived
//! metric column, per-entity series ready to render, stacked series with
//! cumulative offsets, and the parallel-array variable shape consumed by the
//! renderer.
//!
//! Error policy follows the pipeline-wide split: data-quality problems
//! (missing population, out-of-bound rates, excluded countries) degrade the
//! offending cell to missing and are logged at `warn`; programmer-invariant
//! violations (parallel-array length mismatch) fail fast with a typed error.

use crate::color::ColorAssigner;
use crate::params::{ConstrainedViewState, IntervalKind, MetricKind};
use crate::table::{ColumnSpec, CoreTable, transforms};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fail-fast pipeline invariants. These indicate a bug in the pipeline, not
/// bad input data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error(
        "parallel variable arrays have mismatched lengths (times={times}, entities={entities}, names={names}, values={values})"
    )]
    LengthMismatch {
        times: usize,
        entities: usize,
        names: usize,
        values: usize,
    },
    #[error("unknown column slug `{0}`")]
    UnknownColumn(String),
}

/// Countries whose test-derived rates are known to be unreliable in the
/// source data; their rate cells are excluded rather than charted.
pub const RATE_EXCLUDED_COUNTRIES: [&str; 2] = ["Peru", "Ecuador"];

/// Testing figures are reported sparsely; rate metrics fill gaps from the
/// nearest report within this many days.
const TESTS_INTERPOLATION_TOLERANCE: u32 = 14;
const INTERPOLATED_TESTS_SLUG: &str = "new_tests-interpolated";

/// The full identity of a derived metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub metric: MetricKind,
    /// 1 (off), 1_000, or 1_000_000.
    pub per_capita_divisor: u32,
    /// Daily-based view (anything but totals).
    pub daily: bool,
    /// Rolling-average span in days (0 = off).
    pub smoothing: u32,
}

impl VariableKey {
    pub fn from_state(state: &ConstrainedViewState) -> Self {
        Self {
            metric: state.metric,
            per_capita_divisor: if state.per_capita {
                per_capita_divisor(state.metric)
            } else {
                1
            },
            daily: state.interval != IntervalKind::Total,
            smoothing: state.smoothing,
        }
    }

    /// Deterministic integer id: positional digit concatenation of a fixed
    /// prefix, the metric index, the daily flag, the per-capita divisor, and
    /// the smoothing window. This is not a hash: distinct tuples map to
    /// distinct ids only as long as no field grows more digits than the
    /// historical encoding assumed. The struct itself is the collision-proof
    /// identity; the integer exists for wire compatibility.
    pub fn to_id(&self) -> i64 {
        let digits = format!(
            "1145{}{}{}{}",
            self.metric.index(),
            u8::from(self.daily),
            self.per_capita_divisor,
            self.smoothing
        );
        digits.parse().expect("decimal digit concatenation")
    }

    /// Column slug for this key's derived column.
    pub fn slug(&self) -> String {
        format!("metric-{}", self.to_id())
    }
}

/// Per-capita scale for a metric: counts per million, tests per thousand.
pub fn per_capita_divisor(metric: MetricKind) -> u32 {
    match metric {
        MetricKind::Tests => 1_000,
        _ => 1_000_000,
    }
}

/// Threshold-alignment start value per metric.
pub fn alignment_threshold(metric: MetricKind) -> f64 {
    match metric {
        MetricKind::Cases => 100.0,
        MetricKind::Deaths => 5.0,
        _ => 1.0,
    }
}

fn base_slugs(metric: MetricKind) -> (&'static str, &'static str) {
    // (cumulative, daily)
    match metric {
        MetricKind::Cases => ("total_cases", "new_cases"),
        MetricKind::Deaths => ("total_deaths", "new_deaths"),
        MetricKind::Tests => ("total_tests", "new_tests"),
        // Rates are computed below from these pairs.
        MetricKind::CaseFatalityRate => ("total_deaths", "total_cases"),
        MetricKind::TestsPerCase => ("new_tests", "new_cases"),
        MetricKind::PositiveTestRate => ("new_cases", "new_tests"),
    }
}

fn is_rate_excluded(table: &CoreTable, row: usize) -> bool {
    RATE_EXCLUDED_COUNTRIES.contains(&table.entity_at(row))
}

/// Daily tests for rate metrics, preferring the gap-filled column when the
/// pipeline added one.
fn tests_value(table: &CoreTable, row: usize) -> Option<f64> {
    table
        .value_at(INTERPOLATED_TESTS_SLUG, row)
        .or_else(|| table.value_at("new_tests", row))
}

/// Raw metric value per row, before interval/smoothing/per-capita handling.
/// Rate metrics apply country exclusions and sanity bounds here; offending
/// cells become missing, never errors.
fn raw_metric_value(table: &CoreTable, metric: MetricKind, row: usize, daily: bool) -> Option<f64> {
    let (cumulative, daily_slug) = base_slugs(metric);
    match metric {
        MetricKind::Cases | MetricKind::Deaths | MetricKind::Tests => {
            let slug = if daily { daily_slug } else { cumulative };
            table.value_at(slug, row)
        }
        MetricKind::CaseFatalityRate => {
            if is_rate_excluded(table, row) {
                return None;
            }
            let deaths = table.value_at("total_deaths", row)?;
            let cases = table.value_at("total_cases", row)?;
            if cases <= 0.0 {
                return None;
            }
            let rate = 100.0 * deaths / cases;
            (0.0..=100.0).contains(&rate).then_some(rate)
        }
        MetricKind::TestsPerCase => {
            if is_rate_excluded(table, row) {
                return None;
            }
            let tests = tests_value(table, row)?;
            let cases = table.value_at("new_cases", row)?;
            if cases <= 0.0 {
                return None;
            }
            let ratio = tests / cases;
            // Fewer tests than confirmed cases means inconsistent reporting.
            (ratio >= 1.0).then_some(ratio)
        }
        MetricKind::PositiveTestRate => {
            if is_rate_excluded(table, row) {
                return None;
            }
            let cases = table.value_at("new_cases", row)?;
            let tests = tests_value(table, row)?;
            if tests <= 0.0 {
                return None;
            }
            let rate = cases / tests;
            (0.0..=1.0).contains(&rate).then_some(rate)
        }
    }
}

/// Add the derived metric column described by `state` and return the
/// augmented table plus the new column's slug. Columns are cached by slug,
/// so rebuilding with an unchanged state is a no-op.
pub fn build_metric_column(
    table: CoreTable,
    state: &ConstrainedViewState,
) -> (CoreTable, String) {
    let key = VariableKey::from_state(state);
    let slug = key.slug();
    if table.has_column(&slug) {
        return (table, slug);
    }

    let metric = state.metric;
    let daily = key.daily;

    // Some datasets carry only cumulative counts; derive dailies from them.
    let (cumulative_slug, daily_slug) = base_slugs(metric);
    let table = if daily
        && !metric.is_rate()
        && !table.has_column(daily_slug)
        && table.has_column(cumulative_slug)
    {
        let values = transforms::daily_delta(&table, cumulative_slug);
        table.with_numeric_column(ColumnSpec::new(daily_slug, metric.label()), values)
    } else {
        table
    };

    // Rate metrics read daily tests, which are reported sparsely.
    let table = if matches!(
        metric,
        MetricKind::TestsPerCase | MetricKind::PositiveTestRate
    ) && table.has_column("new_tests")
    {
        table.with_interpolated_column(
            "new_tests",
            TESTS_INTERPOLATION_TOLERANCE,
            ColumnSpec::new(INTERPOLATED_TESTS_SLUG, "New tests (gap-filled)"),
        )
    } else {
        table
    };

    let raw_slug = format!("{slug}-raw");
    let table = table.with_computed_column(
        ColumnSpec::new(raw_slug.clone(), metric.label()),
        move |t, row| raw_metric_value(t, metric, row, daily),
    );

    // Interval realization over the raw values.
    let values: Vec<Option<f64>> = match state.interval {
        IntervalKind::Weekly => transforms::rolling_sum(&table, &raw_slug, 7),
        IntervalKind::Biweekly => transforms::rolling_sum(&table, &raw_slug, 14),
        IntervalKind::WeeklyChange => transforms::rolling_change(&table, &raw_slug, 7),
        IntervalKind::BiweeklyChange => transforms::rolling_change(&table, &raw_slug, 14),
        IntervalKind::Smoothed => transforms::rolling_average(&table, &raw_slug, state.smoothing),
        IntervalKind::Daily | IntervalKind::Total => {
            if state.smoothing > 0 && metric.supports_smoothing() {
                transforms::rolling_average(&table, &raw_slug, state.smoothing)
            } else {
                (0..table.row_count())
                    .map(|row| table.value_at(&raw_slug, row))
                    .collect()
            }
        }
    };

    // Per-capita scaling; rows without population are excluded with a
    // warning, never fatal.
    let values: Vec<Option<f64>> = if state.per_capita {
        let divisor = key.per_capita_divisor as f64;
        values
            .iter()
            .enumerate()
            .map(|(row, value)| {
                let value = (*value)?;
                match table.value_at("population", row) {
                    Some(population) if population > 0.0 => {
                        Some(divisor * value / population)
                    }
                    _ => {
                        warn!(
                            "missing population for `{}`; excluding row from per-capita series",
                            table.entity_at(row)
                        );
                        None
                    }
                }
            })
            .collect()
    } else {
        values
    };

    let spec = ColumnSpec {
        slug: slug.clone(),
        name: metric.label().to_string(),
        unit: per_capita_unit(state),
        source: None,
        decimals: if metric.is_rate() { Some(2) } else { Some(0) },
        annotation: None,
    };
    (table.with_numeric_column(spec, values), slug)
}

fn per_capita_unit(state: &ConstrainedViewState) -> Option<String> {
    if !state.per_capita {
        return None;
    }
    Some(match per_capita_divisor(state.metric) {
        1_000 => "per 1,000 people".to_string(),
        _ => "per million people".to_string(),
    })
}

/// Add the days-since-threshold alignment column for `source` and return its
/// slug alongside the augmented table.
pub fn build_alignment_column(
    table: CoreTable,
    state: &ConstrainedViewState,
    source: &str,
) -> (CoreTable, String) {
    let slug = format!("{source}-days-since");
    let threshold = alignment_threshold(state.metric);
    let spec = ColumnSpec::new(
        slug.clone(),
        format!("Days since {} reached {}", state.metric.label(), threshold),
    );
    (table.with_days_since_column(source, threshold, spec), slug)
}

/// One point of a rendered series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Time position: day index, or days-since-threshold when aligned.
    pub time: i32,
    pub value: f64,
}

/// An ordered point sequence for one entity, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub color: String,
    pub points: Vec<SeriesPoint>,
}

/// A stacked point carries the running sum of all previously stacked series
/// at the same time position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackedPoint {
    pub time: i32,
    pub value: f64,
    pub value_offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedSeries {
    pub name: String,
    pub color: String,
    pub points: Vec<StackedPoint>,
}

/// Build one series per selected entity from the `value_slug` column,
/// positioned by `time_slug` when given (the aligned view) or by the table's
/// own time column. Missing cells are skipped; colors come from the stable
/// assigner.
pub fn build_entity_series(
    table: &CoreTable,
    value_slug: &str,
    time_slug: Option<&str>,
    selection: &[String],
    assigner: &mut ColorAssigner,
) -> Vec<Series> {
    assigner.update_selection(selection);
    let mut out = Vec::with_capacity(selection.len());
    for (entity, rows) in transforms::group_indices_by_entity(table) {
        if !selection.iter().any(|s| *s == entity) {
            continue;
        }
        let mut points = Vec::new();
        for row in rows {
            let Some(value) = table.value_at(value_slug, row) else {
                continue;
            };
            let time = match time_slug {
                Some(slug) => match table.value_at(slug, row) {
                    Some(t) => t as i32,
                    None => continue,
                },
                None => table.time_at(row),
            };
            points.push(SeriesPoint { time, value });
        }
        points.sort_by_key(|p| p.time);
        let color = assigner
            .color_for(&entity)
            .unwrap_or(crate::color::OFFICE10[0])
            .to_string();
        out.push(Series {
            name: entity,
            color,
            points,
        });
    }
    out
}

/// Stack series in the order given: each point's offset is the running sum
/// of all previously stacked series' values at the same time. Missing values
/// count as zero so gaps don't shift the stack.
pub fn stack_series(series: &[Series]) -> Vec<StackedSeries> {
    let mut times: Vec<i32> = series
        .iter()
        .flat_map(|s| s.points.iter().map(|p| p.time))
        .collect();
    times.sort_unstable();
    times.dedup();

    let mut offsets: ahash::AHashMap<i32, f64> = times.iter().map(|&t| (t, 0.0)).collect();
    let mut out = Vec::with_capacity(series.len());
    for s in series {
        let by_time: ahash::AHashMap<i32, f64> =
            s.points.iter().map(|p| (p.time, p.value)).collect();
        let mut points = Vec::with_capacity(times.len());
        for &time in &times {
            let value = by_time.get(&time).copied().unwrap_or(0.0);
            let offset = offsets[&time];
            points.push(StackedPoint {
                time,
                value,
                value_offset: offset,
            });
            *offsets.get_mut(&time).expect("time seeded above") += value;
        }
        out.push(StackedSeries {
            name: s.name.clone(),
            color: s.color.clone(),
            points,
        });
    }
    out
}

/// Display metadata carried by a chart variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDisplay {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// Source metadata carried by a chart variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// The renderer-facing variable shape: parallel arrays, all the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartVariable {
    pub id: i64,
    pub times: Vec<i32>,
    pub entities: Vec<u32>,
    pub entity_names: Vec<String>,
    pub values: Vec<f64>,
    pub display: VariableDisplay,
    pub source: VariableSource,
}

/// Flatten the `slug` column into a [`ChartVariable`]. Missing cells are
/// dropped; a length mismatch between the produced arrays is a pipeline bug
/// and fails fast.
pub fn build_chart_variable(
    table: &CoreTable,
    slug: &str,
    key: &VariableKey,
) -> Result<ChartVariable, PipelineError> {
    let column = table
        .column(slug)
        .ok_or_else(|| PipelineError::UnknownColumn(slug.to_string()))?;
    let Some(values_in) = column.numeric() else {
        return Err(PipelineError::UnknownColumn(slug.to_string()));
    };

    let mut times = Vec::new();
    let mut entities = Vec::new();
    let mut entity_names = Vec::new();
    let mut values = Vec::new();
    for (row, cell) in values_in.iter().enumerate() {
        let Some(value) = cell else { continue };
        let name = table.entity_at(row);
        let Some(id) = table.entity_id(name) else {
            continue;
        };
        times.push(table.time_at(row));
        entities.push(id);
        entity_names.push(name.to_string());
        values.push(*value);
    }

    if times.len() != entities.len()
        || times.len() != entity_names.len()
        || times.len() != values.len()
    {
        return Err(PipelineError::LengthMismatch {
            times: times.len(),
            entities: entities.len(),
            names: entity_names.len(),
            values: values.len(),
        });
    }

    Ok(ChartVariable {
        id: key.to_id(),
        times,
        entities,
        entity_names,
        values,
        display: VariableDisplay {
            name: column.spec.name.clone(),
            unit: column.spec.unit.clone(),
            decimals: column.spec.decimals,
        },
        source: VariableSource {
            name: column.spec.source.clone().unwrap_or_default(),
            link: None,
        },
    })
}
