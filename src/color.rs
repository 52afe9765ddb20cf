//! Series colors: palette, bins, and stable selection-keyed assignment.
//!
//! Color churn is visual noise, so assignment is least-recently-used and
//! sticky: an entity keeps its color for as long as it stays selected, and a
//! newly selected entity receives the least-used color at that moment.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Microsoft Office (2013+) chart series palette.
/// Order: Blue, Orange, Gray, Gold, Light Blue, Green, Dark Blue, Dark Orange, Dark Gray, Brownish Gold.
pub const OFFICE10: [&str; 10] = [
    "#4472C4", "#ED7D31", "#A5A5A5", "#FFC000", "#5B9BD5", "#70AD47", "#264478", "#9E480E",
    "#636363", "#997300",
];

/// First color in `available` not present in `used`; when every color is
/// used, the one with the fewest occurrences (ties broken by `available`
/// order).
pub fn get_least_used_color<'a>(available: &[&'a str], used: &[&str]) -> Option<&'a str> {
    if available.is_empty() {
        return None;
    }
    if let Some(unused) = available.iter().copied().find(|c| !used.contains(c)) {
        return Some(unused);
    }
    available
        .iter()
        .copied()
        .min_by_key(|c| used.iter().filter(|u| *u == c).count())
}

/// Selection-keyed color cache. Colors change only for codes entering or
/// leaving the selection.
#[derive(Debug, Clone, Default)]
pub struct ColorAssigner {
    palette: Vec<String>,
    assigned: AHashMap<String, String>,
}

impl ColorAssigner {
    pub fn new(palette: &[&str]) -> Self {
        Self {
            palette: palette.iter().map(|c| c.to_string()).collect(),
            assigned: AHashMap::new(),
        }
    }

    pub fn office() -> Self {
        Self::new(&OFFICE10)
    }

    /// Reconcile the cache with the current selection: retained codes keep
    /// their color, dropped codes free theirs, new codes (in the order
    /// given) get the least-used color.
    pub fn update_selection(&mut self, selection: &[String]) {
        self.assigned.retain(|code, _| selection.contains(code));
        for code in selection {
            if self.assigned.contains_key(code) {
                continue;
            }
            let available: Vec<&str> = self.palette.iter().map(String::as_str).collect();
            let used: Vec<&str> = self.assigned.values().map(String::as_str).collect();
            if let Some(color) = get_least_used_color(&available, &used) {
                self.assigned.insert(code.clone(), color.to_string());
            }
        }
    }

    pub fn color_for(&self, code: &str) -> Option<&str> {
        self.assigned.get(code).map(String::as_str)
    }
}

/// A numeric color-scale bucket: `[min, max)` except the last bin, which is
/// inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericBin {
    pub min: f64,
    pub max: f64,
    pub color: String,
    pub label: Option<String>,
}

/// A categorical color-scale bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalBin {
    pub value: String,
    pub color: String,
    pub label: Option<String>,
}

/// Bucketed value-to-color mapping for map/legend coloring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorScale {
    pub numeric_bins: Vec<NumericBin>,
    pub categorical_bins: Vec<CategoricalBin>,
    pub no_data_color: Option<String>,
}

impl ColorScale {
    pub fn color_for_value(&self, value: f64) -> Option<&str> {
        let last = self.numeric_bins.len().checked_sub(1)?;
        for (idx, bin) in self.numeric_bins.iter().enumerate() {
            let hit = if idx == last {
                value >= bin.min && value <= bin.max
            } else {
                value >= bin.min && value < bin.max
            };
            if hit {
                return Some(&bin.color);
            }
        }
        self.no_data_color.as_deref()
    }

    pub fn color_for_category(&self, value: &str) -> Option<&str> {
        self.categorical_bins
            .iter()
            .find(|bin| bin.value == value)
            .map(|bin| bin.color.as_str())
            .or(self.no_data_color.as_deref())
    }
}
