//! Per-entity windowed and aligned column derivations.
//!
//! Every transform here groups rows by entity explicitly before windowing,
//! so correctness never depends on caller-supplied row order.

use super::CoreTable;
use std::collections::BTreeMap;

/// Row indices per entity, in first-seen entity order, each group sorted by
/// time.
pub fn group_indices_by_entity(table: &CoreTable) -> Vec<(String, Vec<usize>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: ahash::AHashMap<String, Vec<usize>> = ahash::AHashMap::new();
    for row in 0..table.row_count() {
        let entity = table.entity_at(row).to_string();
        if !groups.contains_key(&entity) {
            order.push(entity.clone());
        }
        groups.entry(entity).or_default().push(row);
    }
    order
        .into_iter()
        .map(|entity| {
            let mut rows = groups.remove(&entity).unwrap_or_default();
            rows.sort_by_key(|&row| table.time_at(row));
            (entity, rows)
        })
        .collect()
}

/// Per-entity `(day -> value)` map over present cells of `source`.
fn day_values(table: &CoreTable, rows: &[usize], source: &str) -> BTreeMap<i32, f64> {
    let mut out = BTreeMap::new();
    for &row in rows {
        if let Some(value) = table.value_at(source, row) {
            out.insert(table.time_at(row), value);
        }
    }
    out
}

/// Rolling mean over the `window` calendar days ending at each row's day.
/// Days absent from the data are skipped in the mean (the window is
/// calendar-based, not row-based), so a gap widens nothing and leaks nothing
/// across entity boundaries. Rows whose window holds no values are missing.
pub fn rolling_average(table: &CoreTable, source: &str, window: u32) -> Vec<Option<f64>> {
    let mut out = vec![None; table.row_count()];
    if window == 0 {
        for row in 0..table.row_count() {
            out[row] = table.value_at(source, row);
        }
        return out;
    }
    for (_entity, rows) in group_indices_by_entity(table) {
        let by_day = day_values(table, &rows, source);
        for &row in &rows {
            let day = table.time_at(row);
            let mut sum = 0.0;
            let mut count = 0u32;
            for d in (day - window as i32 + 1)..=day {
                if let Some(v) = by_day.get(&d) {
                    sum += v;
                    count += 1;
                }
            }
            if count > 0 {
                out[row] = Some(sum / count as f64);
            }
        }
    }
    out
}

/// Rolling sum over the `window` calendar days ending at each row's day.
/// Missing days contribute zero; a row is missing only when no value exists
/// anywhere in its window.
pub fn rolling_sum(table: &CoreTable, source: &str, window: u32) -> Vec<Option<f64>> {
    let mut out = vec![None; table.row_count()];
    for (_entity, rows) in group_indices_by_entity(table) {
        let by_day = day_values(table, &rows, source);
        for &row in &rows {
            let day = table.time_at(row);
            let mut sum = 0.0;
            let mut any = false;
            for d in (day - window as i32 + 1)..=day {
                if let Some(v) = by_day.get(&d) {
                    sum += v;
                    any = true;
                }
            }
            if any {
                out[row] = Some(sum);
            }
        }
    }
    out
}

/// Percent change between the `window`-day sum ending at each row's day and
/// the `window`-day sum ending `window` days earlier. Missing when the
/// earlier sum is absent or not strictly positive.
pub fn rolling_change(table: &CoreTable, source: &str, window: u32) -> Vec<Option<f64>> {
    let current = rolling_sum(table, source, window);
    let mut out = vec![None; table.row_count()];
    for (_entity, rows) in group_indices_by_entity(table) {
        let by_day = day_values(table, &rows, source);
        let window_sum = |end: i32| -> Option<f64> {
            let mut sum = 0.0;
            let mut any = false;
            for d in (end - window as i32 + 1)..=end {
                if let Some(v) = by_day.get(&d) {
                    sum += v;
                    any = true;
                }
            }
            any.then_some(sum)
        };
        for &row in &rows {
            let Some(now) = current[row] else { continue };
            let Some(prev) = window_sum(table.time_at(row) - window as i32) else {
                continue;
            };
            if prev > 0.0 {
                out[row] = Some(100.0 * (now - prev) / prev);
            }
        }
    }
    out
}

/// Day-over-day delta of a cumulative column, per entity. The first present
/// row of an entity has no predecessor and stays missing.
pub fn daily_delta(table: &CoreTable, source: &str) -> Vec<Option<f64>> {
    let mut out = vec![None; table.row_count()];
    for (_entity, rows) in group_indices_by_entity(table) {
        let mut prev: Option<f64> = None;
        for &row in &rows {
            let value = table.value_at(source, row);
            if let (Some(now), Some(before)) = (value, prev) {
                out[row] = Some(now - before);
            }
            if value.is_some() {
                prev = value;
            }
        }
    }
    out
}

/// Days since the entity's `source` value first reached `threshold`. The
/// crossing row maps to 0; earlier rows are missing.
pub fn days_since(table: &CoreTable, source: &str, threshold: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; table.row_count()];
    for (_entity, rows) in group_indices_by_entity(table) {
        let crossing = rows
            .iter()
            .find(|&&row| table.value_at(source, row).is_some_and(|v| v >= threshold))
            .map(|&row| table.time_at(row));
        let Some(day_zero) = crossing else { continue };
        for &row in &rows {
            let day = table.time_at(row);
            if day >= day_zero {
                out[row] = Some((day - day_zero) as f64);
            }
        }
    }
    out
}

/// Fill missing cells from the nearest present value within ± `tolerance`
/// days of the same entity; past values win ties over future ones.
pub fn interpolate_with_tolerance(
    table: &CoreTable,
    source: &str,
    tolerance: u32,
) -> Vec<Option<f64>> {
    let mut out = vec![None; table.row_count()];
    for (_entity, rows) in group_indices_by_entity(table) {
        let by_day = day_values(table, &rows, source);
        for &row in &rows {
            let day = table.time_at(row);
            if let Some(v) = by_day.get(&day) {
                out[row] = Some(*v);
                continue;
            }
            for distance in 1..=tolerance as i32 {
                if let Some(v) = by_day.get(&(day - distance)) {
                    out[row] = Some(*v);
                    break;
                }
                if let Some(v) = by_day.get(&(day + distance)) {
                    out[row] = Some(*v);
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnSpec;

    /// Single entity, four calendar days, one gap in the values.
    fn fixture() -> CoreTable {
        CoreTable::new(
            vec!["Aland".into(), "Aland".into(), "Aland".into(), "Aland".into()],
            vec![0, 1, 2, 3],
        )
        .unwrap()
        .with_numeric_column(
            ColumnSpec::new("new_cases", "New cases"),
            vec![Some(10.0), Some(14.0), None, Some(15.0)],
        )
    }

    #[test]
    fn rolling_average_over_calendar_days() {
        let table = fixture();
        let avg = rolling_average(&table, "new_cases", 3);
        // Window at day 3 covers days 1..=3; day 2 is missing, mean of 14 and 15.
        assert_eq!(avg[3], Some(14.5));
        assert_eq!(avg[0], Some(10.0));
        assert_eq!(avg[1], Some(12.0));
    }

    #[test]
    fn rolling_average_does_not_leak_across_entities() {
        let table = CoreTable::new(
            vec!["A".into(), "A".into(), "B".into(), "B".into()],
            vec![0, 1, 0, 1],
        )
        .unwrap()
        .with_numeric_column(
            ColumnSpec::new("x", "X"),
            vec![Some(100.0), Some(100.0), Some(1.0), Some(1.0)],
        );
        let avg = rolling_average(&table, "x", 3);
        assert_eq!(avg[3], Some(1.0));
    }

    #[test]
    fn days_since_threshold_crossing() {
        let table = fixture().with_numeric_column(
            ColumnSpec::new("avg3", "3-day average"),
            rolling_average(&fixture(), "new_cases", 3),
        );
        let days = days_since(&table, "avg3", 12.0);
        // Crossing row (day 1, avg 12.0) is 0, the next row is 1.
        assert_eq!(days[0], None);
        assert_eq!(days[1], Some(0.0));
        assert_eq!(days[2], Some(1.0));
        assert_eq!(days[3], Some(2.0));
    }

    #[test]
    fn days_since_is_order_independent() {
        // Same rows shuffled; group-by must restore per-entity time order.
        let table = CoreTable::new(
            vec!["A".into(), "A".into(), "A".into()],
            vec![2, 0, 1],
        )
        .unwrap()
        .with_numeric_column(
            ColumnSpec::new("x", "X"),
            vec![Some(30.0), Some(5.0), Some(20.0)],
        );
        let days = days_since(&table, "x", 10.0);
        assert_eq!(days[1], None); // day 0, below threshold
        assert_eq!(days[2], Some(0.0)); // day 1, crossing
        assert_eq!(days[0], Some(1.0)); // day 2
    }

    #[test]
    fn interpolation_prefers_past_within_tolerance() {
        let table = fixture();
        let filled = interpolate_with_tolerance(&table, "new_cases", 2);
        assert_eq!(filled[2], Some(14.0)); // day 1 value, not day 3's
        let strict = interpolate_with_tolerance(&table, "new_cases", 0);
        assert_eq!(strict[2], None);
    }

    #[test]
    fn daily_delta_from_cumulative() {
        let table = CoreTable::new(
            vec!["A".into(), "A".into(), "A".into()],
            vec![0, 1, 2],
        )
        .unwrap()
        .with_numeric_column(
            ColumnSpec::new("total", "Total"),
            vec![Some(100.0), Some(150.0), Some(175.0)],
        );
        let delta = daily_delta(&table, "total");
        assert_eq!(delta, vec![None, Some(50.0), Some(25.0)]);
    }
}
