use crate::table::CoreTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary statistics for one entity over one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub entity: String,
    pub column: String,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

/// Compute per-entity statistics over the `slug` column. Entities with only
/// missing cells still get a row (count 0), so gaps are visible.
pub fn entity_summary(table: &CoreTable, slug: &str) -> Vec<Summary> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut missing: BTreeMap<String, usize> = BTreeMap::new();
    for row in 0..table.row_count() {
        let entity = table.entity_at(row).to_string();
        match table.value_at(slug, row) {
            Some(v) => groups.entry(entity).or_default().push(v),
            None => *missing.entry(entity).or_default() += 1,
        }
    }
    // Entities that never produced a value.
    for entity in missing.keys() {
        groups.entry(entity.clone()).or_default();
    }

    let mut out = Vec::new();
    for (entity, mut vals) in groups {
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = vals.len();
        let min = vals.first().cloned();
        let max = vals.last().cloned();
        let mean = if count > 0 {
            Some(vals.iter().copied().sum::<f64>() / count as f64)
        } else {
            None
        };
        let median = if count == 0 {
            None
        } else if count % 2 == 1 {
            Some(vals[count / 2])
        } else {
            Some((vals[count / 2 - 1] + vals[count / 2]) / 2.0)
        };
        let miss = missing.get(&entity).cloned().unwrap_or(0);
        out.push(Summary {
            entity,
            column: slug.to_string(),
            count,
            missing: miss,
            min,
            max,
            mean,
            median,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::CoreTable;

    fn table() -> CoreTable {
        let csv = "\
location,date,new_cases
Aland,2020-01-22,2
Aland,2020-01-23,4
Aland,2020-01-24,
Borland,2020-01-22,10
Borland,2020-01-23,20
Borland,2020-01-24,30
";
        CoreTable::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn per_entity_stats_and_missing_counts() {
        let summaries = entity_summary(&table(), "new_cases");
        assert_eq!(summaries.len(), 2);

        let aland = &summaries[0];
        assert_eq!(aland.entity, "Aland");
        assert_eq!((aland.count, aland.missing), (2, 1));
        assert_eq!(aland.mean, Some(3.0));
        assert_eq!(aland.median, Some(3.0));

        let borland = &summaries[1];
        assert_eq!((borland.count, borland.missing), (3, 0));
        assert_eq!(borland.min, Some(10.0));
        assert_eq!(borland.max, Some(30.0));
        assert_eq!(borland.median, Some(20.0));
    }
}
