//! URL query-parameter codec for chart view state.
//!
//! View state travels as GET parameters, so the encoding is part of the
//! crate's stable interface: bookmarked URLs must keep working. Two explicit
//! types split the lifecycle:
//!
//! - [`RawViewState`]: whatever the query string said, decoded field by
//!   field, unknown keys ignored.
//! - [`ConstrainedViewState`]: the output of [`constrain`], an ordered
//!   repair pass that is deterministic and idempotent: invalid or
//!   unavailable combinations are mapped to the nearest valid state instead
//!   of raising.
//!
//! Serialization omits fields at their defaults to keep URLs short, with a
//! fixed field order so equal states always produce equal strings.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// Allow -, _, . and ~ unescaped (the entity-list separator stays readable).
const QUERY_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The statistical quantity being charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Cases,
    Deaths,
    Tests,
    CaseFatalityRate,
    TestsPerCase,
    PositiveTestRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Cases,
        MetricKind::Deaths,
        MetricKind::Tests,
        MetricKind::CaseFatalityRate,
        MetricKind::TestsPerCase,
        MetricKind::PositiveTestRate,
    ];

    /// Query-string flag for this metric (exactly one is `true` after
    /// constraining).
    pub fn param_key(self) -> &'static str {
        match self {
            MetricKind::Cases => "casesMetric",
            MetricKind::Deaths => "deathsMetric",
            MetricKind::Tests => "testsMetric",
            MetricKind::CaseFatalityRate => "cfrMetric",
            MetricKind::TestsPerCase => "testsPerCaseMetric",
            MetricKind::PositiveTestRate => "positiveTestRate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Cases => "Confirmed cases",
            MetricKind::Deaths => "Confirmed deaths",
            MetricKind::Tests => "Tests",
            MetricKind::CaseFatalityRate => "Case fatality rate",
            MetricKind::TestsPerCase => "Tests per confirmed case",
            MetricKind::PositiveTestRate => "Share of positive tests",
        }
    }

    /// Fixed enum-to-int table used by variable-id generation.
    pub fn index(self) -> u8 {
        match self {
            MetricKind::Cases => 1,
            MetricKind::Deaths => 2,
            MetricKind::Tests => 3,
            MetricKind::CaseFatalityRate => 4,
            MetricKind::TestsPerCase => 5,
            MetricKind::PositiveTestRate => 6,
        }
    }

    /// Rates are derived ratios; they support neither per-capita scaling nor
    /// threshold alignment.
    pub fn is_rate(self) -> bool {
        matches!(
            self,
            MetricKind::CaseFatalityRate | MetricKind::TestsPerCase | MetricKind::PositiveTestRate
        )
    }

    pub fn supports_smoothing(self) -> bool {
        self != MetricKind::CaseFatalityRate
    }

    pub fn supports_weekly(self) -> bool {
        matches!(self, MetricKind::Cases | MetricKind::Deaths)
    }

    pub fn supports_daily(self) -> bool {
        !self.is_rate()
    }
}

/// Temporal aggregation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalKind {
    Daily,
    Weekly,
    Total,
    Smoothed,
    Biweekly,
    WeeklyChange,
    BiweeklyChange,
}

impl IntervalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalKind::Daily => "daily",
            IntervalKind::Weekly => "weekly",
            IntervalKind::Total => "total",
            IntervalKind::Smoothed => "smoothed",
            IntervalKind::Biweekly => "biweekly",
            IntervalKind::WeeklyChange => "weeklyChange",
            IntervalKind::BiweeklyChange => "biweeklyChange",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "daily" => IntervalKind::Daily,
            "weekly" => IntervalKind::Weekly,
            "total" => IntervalKind::Total,
            "smoothed" => IntervalKind::Smoothed,
            "biweekly" => IntervalKind::Biweekly,
            "weeklyChange" => IntervalKind::WeeklyChange,
            "biweeklyChange" => IntervalKind::BiweeklyChange,
            _ => return None,
        })
    }

    /// Seven-day views, including the change variant.
    pub fn is_weekly(self) -> bool {
        matches!(self, IntervalKind::Weekly | IntervalKind::WeeklyChange)
    }

    /// Fourteen-day views, including the change variant.
    pub fn is_biweekly(self) -> bool {
        matches!(self, IntervalKind::Biweekly | IntervalKind::BiweeklyChange)
    }

    pub fn is_change(self) -> bool {
        matches!(
            self,
            IntervalKind::WeeklyChange | IntervalKind::BiweeklyChange
        )
    }
}

/// Chart type requested by the view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChartKind {
    #[default]
    Line,
    StackedArea,
    StackedBar,
    DiscreteBar,
    Scatter,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Line => "LineChart",
            ChartKind::StackedArea => "StackedArea",
            ChartKind::StackedBar => "StackedBar",
            ChartKind::DiscreteBar => "DiscreteBar",
            ChartKind::Scatter => "ScatterPlot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "LineChart" => ChartKind::Line,
            "StackedArea" => ChartKind::StackedArea,
            "StackedBar" => ChartKind::StackedBar,
            "DiscreteBar" => ChartKind::DiscreteBar,
            "ScatterPlot" => ChartKind::Scatter,
            _ => return None,
        })
    }
}

/// Country-picker sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Every key this codec understands; used by [`has_any_grapher_param`].
pub const KNOWN_KEYS: [&str; 16] = [
    "casesMetric",
    "deathsMetric",
    "testsMetric",
    "cfrMetric",
    "testsPerCaseMetric",
    "positiveTestRate",
    "interval",
    "smoothing",
    "perCapita",
    "aligned",
    "country",
    "chartType",
    "pickerMetric",
    "pickerSort",
    "totalFreq",
    "dailyFreq",
];

/// View state exactly as decoded from a query string. May be internally
/// inconsistent; run [`constrain`] before using it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawViewState {
    pub cases_metric: bool,
    pub deaths_metric: bool,
    pub tests_metric: bool,
    pub cfr_metric: bool,
    pub tests_per_case_metric: bool,
    pub positive_test_rate_metric: bool,
    /// Already legacy-translated: an explicit `interval` param wins, then
    /// `totalFreq`, then `smoothing`, then `dailyFreq`. `None` when nothing
    /// resolved (readers outside `constrain` should treat that as daily).
    pub interval: Option<IntervalKind>,
    pub smoothing: Option<u32>,
    pub per_capita: bool,
    pub aligned: bool,
    pub selected: BTreeSet<String>,
    pub chart: Option<ChartKind>,
    pub picker_metric: Option<String>,
    pub picker_sort: Option<SortOrder>,
}

impl RawViewState {
    /// Decode a query string. Unknown keys are ignored; boolean params are
    /// true only for the literal string `"true"`.
    pub fn parse(query: &str) -> Self {
        let mut state = RawViewState::default();
        let mut explicit_interval: Option<IntervalKind> = None;
        let mut total_freq = false;
        let mut daily_freq = false;

        for (key, value) in query_pairs(query) {
            match key.as_str() {
                "casesMetric" => state.cases_metric = value == "true",
                "deathsMetric" => state.deaths_metric = value == "true",
                "testsMetric" => state.tests_metric = value == "true",
                "cfrMetric" => state.cfr_metric = value == "true",
                "testsPerCaseMetric" => state.tests_per_case_metric = value == "true",
                "positiveTestRate" => state.positive_test_rate_metric = value == "true",
                "interval" => explicit_interval = IntervalKind::parse(&value),
                "smoothing" => state.smoothing = value.parse::<u32>().ok().filter(|s| *s > 0),
                "perCapita" => state.per_capita = value == "true",
                "aligned" => state.aligned = value == "true",
                "totalFreq" => total_freq = value == "true",
                "dailyFreq" => daily_freq = value == "true",
                "country" => {
                    state.selected = value
                        .split('~')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "chartType" => state.chart = ChartKind::parse(&value),
                "pickerMetric" => state.picker_metric = Some(value),
                "pickerSort" => state.picker_sort = SortOrder::parse(&value),
                _ => {} // unknown keys ignored
            }
        }

        // Legacy boolean triplet translation, in precedence order.
        state.interval = if explicit_interval.is_some() {
            explicit_interval
        } else if total_freq {
            Some(IntervalKind::Total)
        } else if state.smoothing.is_some() {
            Some(IntervalKind::Smoothed)
        } else if daily_freq {
            Some(IntervalKind::Daily)
        } else {
            None
        };
        state
    }

    /// First metric flag set, in the canonical flag order; `Cases` when none
    /// is set (the ensure-exactly-one-metric default).
    pub fn metric_or_default(&self) -> MetricKind {
        let flags = [
            (self.cases_metric, MetricKind::Cases),
            (self.deaths_metric, MetricKind::Deaths),
            (self.tests_metric, MetricKind::Tests),
            (self.cfr_metric, MetricKind::CaseFatalityRate),
            (self.tests_per_case_metric, MetricKind::TestsPerCase),
            (self.positive_test_rate_metric, MetricKind::PositiveTestRate),
        ];
        flags
            .iter()
            .find(|(set, _)| *set)
            .map(|(_, metric)| *metric)
            .unwrap_or(MetricKind::Cases)
    }
}

/// View state guaranteed internally consistent: exactly one metric, a
/// resolved interval, and option combinations the metric actually supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedViewState {
    pub metric: MetricKind,
    pub interval: IntervalKind,
    pub smoothing: u32,
    pub per_capita: bool,
    pub aligned: bool,
    pub selected: BTreeSet<String>,
    pub chart: ChartKind,
    pub picker_metric: Option<String>,
    pub picker_sort: Option<SortOrder>,
}

impl Default for ConstrainedViewState {
    fn default() -> Self {
        constrain(&RawViewState::default())
    }
}

/// Repair a raw state into the nearest valid one. The steps run in a fixed
/// order and each may rewrite fields read by later steps; the whole pass is
/// idempotent.
pub fn constrain(raw: &RawViewState) -> ConstrainedViewState {
    let metric = raw.metric_or_default();
    let mut interval = raw.interval;
    let mut smoothing = raw.smoothing.unwrap_or(0);
    let mut per_capita = raw.per_capita;
    let mut aligned = raw.aligned;

    // 1 & 2: rates and weekly-change views support neither per-capita nor
    // threshold alignment.
    let change_view = interval.is_some_and(IntervalKind::is_change);
    if metric.is_rate() || change_view {
        per_capita = false;
        aligned = false;
    }

    // 3: weekly/biweekly views exist only for cases and deaths.
    if interval.is_some_and(|i| i.is_weekly() || i.is_biweekly()) && !metric.supports_weekly() {
        interval = Some(IntervalKind::Total);
    }

    // 4: clear smoothing where unsupported; a smoothed view without
    // smoothing falls back to totals.
    if smoothing != 0 && !metric.supports_smoothing() {
        smoothing = 0;
        if interval == Some(IntervalKind::Smoothed) {
            interval = Some(IntervalKind::Total);
        }
    }

    // 5: rates have no daily view; prefer smoothed when available.
    if interval == Some(IntervalKind::Daily) && !metric.supports_daily() {
        if metric.supports_smoothing() {
            interval = Some(IntervalKind::Smoothed);
            smoothing = 7;
        } else {
            interval = Some(IntervalKind::Total);
        }
    }

    // 6: default-interval fill.
    let mut interval = interval.unwrap_or({
        if smoothing > 0 && metric.supports_smoothing() {
            IntervalKind::Smoothed
        } else {
            IntervalKind::Total
        }
    });

    // 7: weekly/biweekly windows pin the smoothing span.
    if interval.is_weekly() {
        smoothing = 7;
    } else if interval.is_biweekly() {
        smoothing = 14;
    }

    // Smoothed with a zero window is just the base view.
    if interval == IntervalKind::Smoothed && smoothing == 0 {
        interval = IntervalKind::Total;
    }

    ConstrainedViewState {
        metric,
        interval,
        smoothing,
        per_capita,
        aligned,
        selected: raw.selected.clone(),
        chart: raw.chart.unwrap_or_default(),
        picker_metric: raw.picker_metric.clone(),
        picker_sort: raw.picker_sort,
    }
}

impl ConstrainedViewState {
    /// Stable query-string encoding: fixed field order, defaults omitted.
    /// Round-trip law: `constrain(RawViewState::parse(s.to_query_string()))`
    /// equals `s`.
    pub fn to_query_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.metric != MetricKind::Cases {
            parts.push(format!("{}=true", self.metric.param_key()));
        }
        // `total` with no smoothing is what an empty query constrains to.
        if !(self.interval == IntervalKind::Total && self.smoothing == 0) {
            parts.push(format!("interval={}", self.interval.as_str()));
        }
        if self.smoothing > 0 {
            parts.push(format!("smoothing={}", self.smoothing));
        }
        if self.per_capita {
            parts.push("perCapita=true".to_string());
        }
        if self.aligned {
            parts.push("aligned=true".to_string());
        }
        if !self.selected.is_empty() {
            let joined = self
                .selected
                .iter()
                .map(|code| utf8_percent_encode(code, QUERY_SAFE).to_string())
                .collect::<Vec<_>>()
                .join("~");
            parts.push(format!("country={}", joined));
        }
        if self.chart != ChartKind::Line {
            parts.push(format!("chartType={}", self.chart.as_str()));
        }
        if let Some(metric) = &self.picker_metric {
            parts.push(format!(
                "pickerMetric={}",
                utf8_percent_encode(metric, QUERY_SAFE)
            ));
        }
        if let Some(sort) = self.picker_sort {
            parts.push(format!("pickerSort={}", sort.as_str()));
        }
        parts.join("&")
    }
}

/// True iff the query string shares at least one key with the codec's own
/// key set; used to decide whether domain defaults apply.
pub fn has_any_grapher_param(query: &str) -> bool {
    query_pairs(query).any(|(key, _)| KNOWN_KEYS.contains(&key.as_str()))
}

fn query_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            // Form-urlencoding: '+' means space only in the raw component;
            // substituting before percent-decoding keeps an encoded %2B a
            // literal plus.
            let value = value.replace('+', " ");
            (
                percent_decode_str(key).decode_utf8_lossy().into_owned(),
                percent_decode_str(&value).decode_utf8_lossy().into_owned(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_defaults_to_cases_total() {
        let state = constrain(&RawViewState::parse(""));
        assert_eq!(state.metric, MetricKind::Cases);
        assert_eq!(state.interval, IntervalKind::Total);
        assert_eq!(state.smoothing, 0);
        assert!(!state.per_capita);
    }

    #[test]
    fn legacy_triplet_precedence() {
        // Explicit interval wins over every legacy flag.
        let raw = RawViewState::parse("interval=weekly&totalFreq=true&dailyFreq=true");
        assert_eq!(raw.interval, Some(IntervalKind::Weekly));
        // totalFreq beats smoothing and dailyFreq.
        let raw = RawViewState::parse("totalFreq=true&smoothing=7&dailyFreq=true");
        assert_eq!(raw.interval, Some(IntervalKind::Total));
        // smoothing beats dailyFreq.
        let raw = RawViewState::parse("smoothing=7&dailyFreq=true");
        assert_eq!(raw.interval, Some(IntervalKind::Smoothed));
        // dailyFreq alone.
        let raw = RawViewState::parse("dailyFreq=true");
        assert_eq!(raw.interval, Some(IntervalKind::Daily));
        // Nothing resolves.
        assert_eq!(RawViewState::parse("").interval, None);
    }

    #[test]
    fn rates_lose_per_capita_and_alignment() {
        let state = constrain(&RawViewState::parse(
            "cfrMetric=true&perCapita=true&aligned=true",
        ));
        assert_eq!(state.metric, MetricKind::CaseFatalityRate);
        assert!(!state.per_capita);
        assert!(!state.aligned);
    }

    #[test]
    fn unknown_keys_ignored() {
        let raw = RawViewState::parse("casesMetric=true&nonsense=1&tab=map");
        assert!(raw.cases_metric);
        assert_eq!(constrain(&raw).metric, MetricKind::Cases);
    }

    #[test]
    fn country_list_is_a_set() {
        let a = RawViewState::parse("country=USA~GBR~DEU");
        let b = RawViewState::parse("country=DEU~USA~GBR");
        assert_eq!(a.selected, b.selected);
        assert_eq!(a.selected.len(), 3);
    }

    #[test]
    fn has_any_param_checks_key_intersection() {
        assert!(has_any_grapher_param("casesMetric=true&foo=1"));
        assert!(has_any_grapher_param("totalFreq=true"));
        assert!(!has_any_grapher_param("tab=chart&zoom=2"));
        assert!(!has_any_grapher_param(""));
    }
}
