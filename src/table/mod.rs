//! Columnar tabular data store.
//!
//! A [`CoreTable`] holds one observation per row (entity name, time as day
//! index or year, and a set of named value columns) and supports column
//! derivation (rolling averages, days-since-threshold alignment, tolerance
//! interpolation, row filtering) without mutating the source table. Derived
//! columns are cached by slug: re-adding an existing slug is a no-op.
//!
//! CSV ingestion follows the fixed input schema: a small allow-list of
//! string columns (`iso_code`, `location`, `date`, `tests_units`,
//! `continent`); every other column parses as float-or-missing (empty
//! string or NaN become `None`, never 0).

pub mod transforms;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Columns ingested as text; everything else is parsed as float-or-missing.
pub const STRING_COLUMNS: [&str; 5] = ["iso_code", "location", "date", "tests_units", "continent"];

/// Day zero for day-index times (the first date in the source dataset).
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 21).expect("valid epoch date")
}

/// Convert an ISO `YYYY-MM-DD` date to a day index relative to [`epoch`].
pub fn date_to_day(date: &str) -> Result<i32> {
    let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date `{}`", date))?;
    Ok((parsed - epoch()).num_days() as i32)
}

/// Inverse of [`date_to_day`].
pub fn day_to_date(day: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(day as i64)
}

/// Declared column metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl ColumnSpec {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Column payload: one entry per table row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, typed projection over the table's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub spec: ColumnSpec,
    pub values: ColumnValues,
}

impl Column {
    pub fn numeric(&self) -> Option<&[Option<f64>]> {
        match &self.values {
            ColumnValues::Numeric(v) => Some(v),
            ColumnValues::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&[Option<String>]> {
        match &self.values {
            ColumnValues::Text(v) => Some(v),
            ColumnValues::Numeric(_) => None,
        }
    }
}

/// Dense entity-id allocation, scoped to one dataset load. Ids are assigned
/// in first-seen row order and survive row filtering unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityIdAllocator {
    ids: ahash::AHashMap<String, u32>,
    names: Vec<String>,
}

impl EntityIdAllocator {
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One observation per row: entity, time, and named value columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreTable {
    entities: Vec<String>,
    times: Vec<i32>,
    columns: BTreeMap<String, Column>,
    allocator: EntityIdAllocator,
}

impl CoreTable {
    /// Build a table from parallel entity/time vectors.
    pub fn new(entities: Vec<String>, times: Vec<i32>) -> Result<Self> {
        if entities.len() != times.len() {
            bail!(
                "entity/time length mismatch ({} vs {})",
                entities.len(),
                times.len()
            );
        }
        let mut allocator = EntityIdAllocator::default();
        for name in &entities {
            allocator.intern(name);
        }
        Ok(Self {
            entities,
            times,
            columns: BTreeMap::new(),
            allocator,
        })
    }

    /// Parse a CSV document. `location` becomes the entity column and `date`
    /// the time column; other allow-listed headers stay as text columns and
    /// the rest parse as float-or-missing.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .context("read csv header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let location_idx = headers
            .iter()
            .position(|h| h == "location")
            .context("csv has no `location` column")?;
        let date_idx = headers
            .iter()
            .position(|h| h == "date")
            .context("csv has no `date` column")?;

        let mut entities: Vec<String> = Vec::new();
        let mut times: Vec<i32> = Vec::new();
        let mut text_values: BTreeMap<usize, Vec<Option<String>>> = BTreeMap::new();
        let mut numeric_values: BTreeMap<usize, Vec<Option<f64>>> = BTreeMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == location_idx || idx == date_idx {
                continue;
            }
            if STRING_COLUMNS.contains(&header.as_str()) {
                text_values.insert(idx, Vec::new());
            } else {
                numeric_values.insert(idx, Vec::new());
            }
        }

        for record in rdr.records() {
            let record = record.context("read csv record")?;
            let location = record.get(location_idx).unwrap_or("").trim();
            let date = record.get(date_idx).unwrap_or("").trim();
            if location.is_empty() || date.is_empty() {
                continue;
            }
            entities.push(location.to_string());
            times.push(date_to_day(date)?);

            for (idx, values) in text_values.iter_mut() {
                let raw = record.get(*idx).unwrap_or("").trim();
                values.push(if raw.is_empty() {
                    None
                } else {
                    Some(raw.to_string())
                });
            }
            for (idx, values) in numeric_values.iter_mut() {
                values.push(parse_cell(record.get(*idx).unwrap_or("")));
            }
        }

        let mut table = Self::new(entities, times)?;
        for (idx, values) in text_values {
            let slug = headers[idx].clone();
            table.insert_column(Column {
                spec: ColumnSpec::new(slug.clone(), slug),
                values: ColumnValues::Text(values),
            });
        }
        for (idx, values) in numeric_values {
            let slug = headers[idx].clone();
            table.insert_column(Column {
                spec: ColumnSpec::new(slug.clone(), slug),
                values: ColumnValues::Numeric(values),
            });
        }
        Ok(table)
    }

    pub fn row_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn times(&self) -> &[i32] {
        &self.times
    }

    pub fn entity_at(&self, row: usize) -> &str {
        &self.entities[row]
    }

    pub fn time_at(&self, row: usize) -> i32 {
        self.times[row]
    }

    pub fn entity_id(&self, name: &str) -> Option<u32> {
        self.allocator.get(name)
    }

    pub fn allocator(&self) -> &EntityIdAllocator {
        &self.allocator
    }

    pub fn has_column(&self, slug: &str) -> bool {
        self.columns.contains_key(slug)
    }

    pub fn column(&self, slug: &str) -> Option<&Column> {
        self.columns.get(slug)
    }

    pub fn column_slugs(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn numeric_column(&self, slug: &str) -> Option<&[Option<f64>]> {
        self.columns.get(slug).and_then(Column::numeric)
    }

    pub fn text_column(&self, slug: &str) -> Option<&[Option<String>]> {
        self.columns.get(slug).and_then(Column::text)
    }

    /// Numeric cell at `(slug, row)`; `None` when the column is absent,
    /// non-numeric, or the cell is missing.
    pub fn value_at(&self, slug: &str, row: usize) -> Option<f64> {
        self.numeric_column(slug).and_then(|v| v[row])
    }

    fn insert_column(&mut self, column: Column) {
        debug_assert_eq!(column.values.len(), self.row_count());
        self.columns.insert(column.spec.slug.clone(), column);
    }

    /// Add a numeric column computed per row. Idempotent: if a column with
    /// this slug already exists the table is returned unchanged.
    pub fn with_computed_column(
        mut self,
        spec: ColumnSpec,
        f: impl Fn(&CoreTable, usize) -> Option<f64>,
    ) -> Self {
        if self.columns.contains_key(&spec.slug) {
            return self;
        }
        let values: Vec<Option<f64>> = (0..self.row_count()).map(|row| f(&self, row)).collect();
        self.insert_column(Column {
            spec,
            values: ColumnValues::Numeric(values),
        });
        self
    }

    /// Add a pre-computed numeric column. Idempotent per slug.
    pub fn with_numeric_column(mut self, spec: ColumnSpec, values: Vec<Option<f64>>) -> Self {
        if self.columns.contains_key(&spec.slug) {
            return self;
        }
        self.insert_column(Column {
            spec,
            values: ColumnValues::Numeric(values),
        });
        self
    }

    /// Per-entity rolling average of `source` over `window` calendar days.
    /// Missing dates inside the window count as absent (the mean spans the
    /// values actually present in the calendar window). Idempotent per slug.
    pub fn with_rolling_average_column(self, source: &str, window: u32, spec: ColumnSpec) -> Self {
        if self.columns.contains_key(&spec.slug) {
            return self;
        }
        let values = transforms::rolling_average(&self, source, window);
        self.with_numeric_column(spec, values)
    }

    /// Per-entity "days since the source value first reached `threshold`".
    /// Rows before the crossing are missing. Idempotent per slug.
    pub fn with_days_since_column(self, source: &str, threshold: f64, spec: ColumnSpec) -> Self {
        if self.columns.contains_key(&spec.slug) {
            return self;
        }
        let values = transforms::days_since(&self, source, threshold);
        self.with_numeric_column(spec, values)
    }

    /// Fill missing cells of `source` from the nearest present value within
    /// ± `tolerance` days of the same entity (past preferred over future).
    pub fn with_interpolated_column(
        self,
        source: &str,
        tolerance: u32,
        spec: ColumnSpec,
    ) -> Self {
        if self.columns.contains_key(&spec.slug) {
            return self;
        }
        let values = transforms::interpolate_with_tolerance(&self, source, tolerance);
        self.with_numeric_column(spec, values)
    }

    /// Keep only rows matching `pred`. Column set and entity ids are carried
    /// over unchanged; filters compose as an ordered pipeline in caller
    /// order.
    pub fn filter_rows(&self, pred: impl Fn(&CoreTable, usize) -> bool) -> Self {
        let keep: Vec<usize> = (0..self.row_count()).filter(|&row| pred(self, row)).collect();
        let mut out = CoreTable {
            entities: keep.iter().map(|&i| self.entities[i].clone()).collect(),
            times: keep.iter().map(|&i| self.times[i]).collect(),
            columns: BTreeMap::new(),
            allocator: self.allocator.clone(),
        };
        for column in self.columns.values() {
            let values = match &column.values {
                ColumnValues::Numeric(v) => {
                    ColumnValues::Numeric(keep.iter().map(|&i| v[i]).collect())
                }
                ColumnValues::Text(v) => {
                    ColumnValues::Text(keep.iter().map(|&i| v[i].clone()).collect())
                }
            };
            out.insert_column(Column {
                spec: column.spec.clone(),
                values,
            });
        }
        out
    }

    /// Keep only rows whose entity is in `selection`.
    pub fn filter_entities(&self, selection: &[String]) -> Self {
        self.filter_rows(|t, row| selection.iter().any(|s| s == t.entity_at(row)))
    }
}

/// Float-or-missing cell parse: empty and NaN become `None`, never 0.
fn parse_cell(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Synthesize per-(continent, date) aggregate rows plus World rows.
///
/// `new_cases`/`new_deaths` of a synthesized row are the sums of the
/// constituent countries' values for that date; `total_cases`/`total_deaths`
/// are the running cumulative sums of the synthesized dailies (never
/// re-derived from country totals). Output rows are ordered by group name
/// (continents sorted, then `World`) and date.
pub fn generate_continent_rows(table: &CoreTable) -> Result<CoreTable> {
    let continents = table
        .text_column("continent")
        .context("table has no `continent` text column")?;
    let new_cases = table.numeric_column("new_cases");
    let new_deaths = table.numeric_column("new_deaths");

    // (group, day) -> summed dailies
    let mut sums: BTreeMap<(String, i32), (f64, f64)> = BTreeMap::new();
    for row in 0..table.row_count() {
        let day = table.time_at(row);
        let cases = new_cases.and_then(|v| v[row]).unwrap_or(0.0);
        let deaths = new_deaths.and_then(|v| v[row]).unwrap_or(0.0);
        if let Some(continent) = continents[row].as_deref() {
            let entry = sums.entry((continent.to_string(), day)).or_insert((0.0, 0.0));
            entry.0 += cases;
            entry.1 += deaths;
        }
        let world = sums.entry(("World".to_string(), day)).or_insert((0.0, 0.0));
        world.0 += cases;
        world.1 += deaths;
    }

    let mut entities = Vec::with_capacity(sums.len());
    let mut times = Vec::with_capacity(sums.len());
    let mut cases_col = Vec::with_capacity(sums.len());
    let mut deaths_col = Vec::with_capacity(sums.len());
    let mut total_cases_col = Vec::with_capacity(sums.len());
    let mut total_deaths_col = Vec::with_capacity(sums.len());

    // BTreeMap iteration gives (group, day) sorted; cumulative sums reset at
    // each group boundary.
    let mut current_group: Option<String> = None;
    let mut running = (0.0, 0.0);
    for ((group, day), (cases, deaths)) in sums {
        if current_group.as_deref() != Some(group.as_str()) {
            current_group = Some(group.clone());
            running = (0.0, 0.0);
        }
        running.0 += cases;
        running.1 += deaths;
        entities.push(group);
        times.push(day);
        cases_col.push(Some(cases));
        deaths_col.push(Some(deaths));
        total_cases_col.push(Some(running.0));
        total_deaths_col.push(Some(running.1));
    }

    let table = CoreTable::new(entities, times)?
        .with_numeric_column(ColumnSpec::new("new_cases", "Daily new confirmed cases"), cases_col)
        .with_numeric_column(
            ColumnSpec::new("new_deaths", "Daily new confirmed deaths"),
            deaths_col,
        )
        .with_numeric_column(
            ColumnSpec::new("total_cases", "Total confirmed cases"),
            total_cases_col,
        )
        .with_numeric_column(
            ColumnSpec::new("total_deaths", "Total confirmed deaths"),
            total_deaths_col,
        );
    Ok(table)
}
