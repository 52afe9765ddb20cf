use crate::series::{ChartVariable, Series};
use crate::stats::Summary;
use anyhow::Result;
use csv::WriterBuilder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Save built series as tidy CSV: one row per (series, point).
pub fn save_series_csv<P: AsRef<Path>>(series: &[Series], path: P) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.serialize(("entity", "color", "time", "value"))?;
    for s in series {
        for p in &s.points {
            wtr.serialize((&s.name, &s.color, p.time, p.value))?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Save a chart variable as pretty JSON.
pub fn save_variable_json<P: AsRef<Path>>(variable: &ChartVariable, path: P) -> Result<()> {
    let mut f = File::create(path)?;
    let s = serde_json::to_string_pretty(variable)?;
    f.write_all(s.as_bytes())?;
    Ok(())
}

/// Save per-entity summaries as pretty JSON array.
pub fn save_summaries_json<P: AsRef<Path>>(summaries: &[Summary], path: P) -> Result<()> {
    let mut f = File::create(path)?;
    let s = serde_json::to_string_pretty(summaries)?;
    f.write_all(s.as_bytes())?;
    Ok(())
}
