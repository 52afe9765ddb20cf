//! grapher
//!
//! A Rust library for charting tabular statistical data: a reactive pipeline
//! from CSV rows and URL-encoded view state to series, legends, and rendered
//! charts. Pairs with the `grapher` CLI.
//!
//! ### Features
//! - Columnar table with calendar-aware transforms (rolling windows,
//!   threshold alignment, interpolation)
//! - URL query-string codec with invalid-combination repair, so every shared
//!   link resolves to a renderable view
//! - Per-entity series with stable color assignment and stacking
//! - Collision-avoiding line-legend layout
//! - SVG/PNG rendering, per-entity summary statistics, CSV/JSON export
//!
//! ### Example
//! ```no_run
//! use grapher::explorer::Explorer;
//! use grapher::params::ChartKind;
//! use grapher::table::CoreTable;
//!
//! let table = CoreTable::from_csv_reader(std::fs::File::open("data.csv")?)?;
//! let explorer = Explorer::new(table);
//! explorer.set_query("casesMetric=true&interval=smoothed&smoothing=7&country=DEU~USA");
//! explorer.select(["Germany".into(), "United States".into()]);
//! grapher::viz::render_chart(
//!     &explorer.series(),
//!     ChartKind::Line,
//!     "chart.svg",
//!     1000,
//!     600,
//!     "en",
//!     "New cases (7-day average)",
//!     false,
//! )?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod color;
pub mod explorer;
pub mod fetch;
pub mod params;
pub mod reactive;
pub mod series;
pub mod stats;
pub mod storage;
pub mod table;
pub mod viz;

pub use explorer::Explorer;
pub use params::{ChartKind, ConstrainedViewState, IntervalKind, MetricKind, RawViewState};
pub use table::CoreTable;
