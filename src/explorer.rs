//! The explorer: reactive wiring from raw inputs to render-ready outputs.
//!
//! Two observables feed the graph (the loaded table and the constrained view
//! state); everything downstream is a [`Derived`] chain:
//!
//! ```text
//! table ──┐
//!         ├── working (metric + alignment columns) ── series ── stacked
//! state ──┘                                   │           └──── legend
//!                                             └── chart variable
//! ```
//!
//! Reads are lazy and memoized, so toggling a view option recomputes only the
//! cells whose inputs actually moved, and a burst of toggles inside
//! [`Explorer::batch`] settles into at most one recomputation per cell.

use std::cell::RefCell;
use std::rc::Rc;

use crate::color::ColorAssigner;
use crate::params::{ConstrainedViewState, RawViewState, constrain, has_any_grapher_param};
use crate::reactive::{Derived, Observable, Store};
use crate::series::{
    ChartVariable, PipelineError, Series, StackedSeries, VariableKey, build_alignment_column,
    build_entity_series, build_metric_column, stack_series,
};
use crate::table::CoreTable;

/// The augmented table plus the slugs the current view reads from it.
#[derive(Debug, Clone)]
pub struct WorkingTable {
    pub table: CoreTable,
    pub value_slug: String,
    /// Set when the view is threshold-aligned; series are then positioned by
    /// this column instead of calendar time.
    pub time_slug: Option<String>,
}

/// One legend entry: the label, its color, and the series' final value.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: String,
    pub last_value: f64,
}

pub struct Explorer {
    store: Store,
    table: Observable<Rc<CoreTable>>,
    state: Observable<ConstrainedViewState>,
    working: Derived<Rc<WorkingTable>>,
    series: Derived<Rc<Vec<Series>>>,
    stacked: Derived<Rc<Vec<StackedSeries>>>,
    variable: Derived<Rc<Result<ChartVariable, PipelineError>>>,
    legend: Derived<Rc<Vec<LegendEntry>>>,
}

impl Explorer {
    pub fn new(table: CoreTable) -> Self {
        Self::with_state(table, ConstrainedViewState::default())
    }

    pub fn with_state(table: CoreTable, state: ConstrainedViewState) -> Self {
        let store = Store::new();
        let table = store.observable(Rc::new(table));
        let state = store.observable(state);

        let working = {
            let (table, state) = (table.clone(), state.clone());
            store.derived(move || {
                let state = state.get();
                let base = (*table.get()).clone();
                let (augmented, value_slug) = build_metric_column(base, &state);
                let (augmented, time_slug) = if state.aligned {
                    let (t, slug) = build_alignment_column(augmented, &state, &value_slug);
                    (t, Some(slug))
                } else {
                    (augmented, None)
                };
                Rc::new(WorkingTable {
                    table: augmented,
                    value_slug,
                    time_slug,
                })
            })
        };

        // The assigner outlives any single recomputation so retained entities
        // keep their colors across view changes.
        let assigner = Rc::new(RefCell::new(ColorAssigner::office()));
        let series = {
            let (working, state) = (working.clone(), state.clone());
            store.derived(move || {
                let w = working.get();
                let selection: Vec<String> = state.get().selected.iter().cloned().collect();
                let mut assigner = assigner.borrow_mut();
                Rc::new(build_entity_series(
                    &w.table,
                    &w.value_slug,
                    w.time_slug.as_deref(),
                    &selection,
                    &mut assigner,
                ))
            })
        };

        let stacked = {
            let series = series.clone();
            store.derived(move || Rc::new(stack_series(&series.get())))
        };

        let variable = {
            let (working, state) = (working.clone(), state.clone());
            store.derived(move || {
                let w = working.get();
                let key = VariableKey::from_state(&state.get());
                Rc::new(crate::series::build_chart_variable(
                    &w.table,
                    &w.value_slug,
                    &key,
                ))
            })
        };

        let legend = {
            let series = series.clone();
            store.derived(move || {
                let entries = series
                    .get()
                    .iter()
                    .filter_map(|s| {
                        s.points.last().map(|p| LegendEntry {
                            label: s.name.clone(),
                            color: s.color.clone(),
                            last_value: p.value,
                        })
                    })
                    .collect();
                Rc::new(entries)
            })
        };

        Self {
            store,
            table,
            state,
            working,
            series,
            stacked,
            variable,
            legend,
        }
    }

    pub fn state(&self) -> ConstrainedViewState {
        self.state.get()
    }

    pub fn set_state(&self, state: ConstrainedViewState) {
        self.state.set(state);
    }

    /// Apply a URL query string. A query carrying none of the codec's keys
    /// leaves the current view untouched (deep links to unrelated pages must
    /// not reset the view).
    pub fn set_query(&self, query: &str) {
        if !has_any_grapher_param(query) {
            return;
        }
        self.state.set(constrain(&RawViewState::parse(query)));
    }

    /// Current canonical query string for the view.
    pub fn query_string(&self) -> String {
        self.state.get().to_query_string()
    }

    pub fn set_table(&self, table: CoreTable) {
        self.table.set(Rc::new(table));
    }

    /// Replace the selected entity set.
    pub fn select(&self, entities: impl IntoIterator<Item = String>) {
        self.state.update(|state| {
            state.selected = entities.into_iter().collect();
        });
    }

    /// Run `f`, deferring downstream recomputation until it returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.store.batch(f)
    }

    pub fn working(&self) -> Rc<WorkingTable> {
        self.working.get()
    }

    pub fn series(&self) -> Rc<Vec<Series>> {
        self.series.get()
    }

    pub fn stacked_series(&self) -> Rc<Vec<StackedSeries>> {
        self.stacked.get()
    }

    pub fn chart_variable(&self) -> Rc<Result<ChartVariable, PipelineError>> {
        self.variable.get()
    }

    pub fn legend_entries(&self) -> Rc<Vec<LegendEntry>> {
        self.legend.get()
    }

    /// Recomputation counter for the series cell. Test hook.
    pub fn series_times_computed(&self) -> u64 {
        self.series.times_computed()
    }
}
