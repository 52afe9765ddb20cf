//! Line-legend layout: non-overlapping label placement beside chart lines.
//!
//! Each series contributes one mark whose target y is the series' final
//! value mapped through the y scale. Placement runs as a small state
//! machine:
//!
//! 1. initial placement: every mark centered on its target y, clamped to
//!    the axis range;
//! 2. standard placement: adjacent overlapping groups merge iteratively,
//!    the merge point weighted by relative member counts and clamped so
//!    overflow on one side shifts the group instead of dropping off-axis;
//! 3. overlapping placement: the fallback when the marks cannot fit at all;
//!    nothing is de-overlapped and every mark is flagged.
//!
//! The standard/overlapping switch is decided from worst-case space needs
//! (total mark height plus spacing against the available range), never from
//! the current mode's layout, so a fixed input can never oscillate between
//! modes.

use serde::{Deserialize, Serialize};

/// Screen-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// A label to place: text box dimensions plus the y position it wants.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendMark {
    pub label: String,
    pub color: String,
    /// Where the mark's vertical center wants to sit (scale space, pixels).
    pub y_target: f64,
    pub width: f64,
    pub height: f64,
}

impl LegendMark {
    /// Size a mark from its label text.
    pub fn new(label: impl Into<String>, color: impl Into<String>, y_target: f64, font_px: u32) -> Self {
        let label = label.into();
        let width = super::text::estimate_text_width_px(&label, font_px) as f64;
        Self {
            label,
            color: color.into(),
            y_target,
            width,
            height: font_px as f64 + 2.0,
        }
    }
}

/// A mark after collision resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMark {
    pub label: String,
    pub color: String,
    pub bounds: Rect,
    /// The y the mark wanted; the connector line runs from here to the
    /// placed bounds.
    pub y_target: f64,
    /// Horizontal connector level; zig-zag connectors on different levels
    /// don't cross.
    pub level: usize,
    /// Set when the engine gave up de-overlapping (overlapping mode).
    pub is_overlap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    Standard,
    Overlapping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendLayout {
    pub marks: Vec<PlacedMark>,
    pub mode: PlacementMode,
    /// Highest connector level in use plus one; sizes the connector gutter.
    pub total_levels: usize,
}

impl LegendLayout {
    pub fn width(&self) -> f64 {
        self.marks
            .iter()
            .map(|m| m.bounds.width)
            .fold(0.0, f64::max)
    }
}

/// Vertical gap between marks in standard placement.
const MARK_SPACING: f64 = 2.0;

/// Resolve mark placement within the vertical range `[y_min, y_max]`.
///
/// `reserved` is vertical space claimed by floating controls (the "add
/// entity" button); it reduces the space considered available when deciding
/// between modes, which is what prevents mode oscillation.
pub fn place_marks(marks: &[LegendMark], x: f64, y_min: f64, y_max: f64, reserved: f64) -> LegendLayout {
    if marks.is_empty() {
        return LegendLayout {
            marks: Vec::new(),
            mode: PlacementMode::Standard,
            total_levels: 1,
        };
    }

    let needed: f64 = marks.iter().map(|m| m.height).sum::<f64>()
        + MARK_SPACING * (marks.len() - 1) as f64;
    let available = (y_max - y_min - reserved).max(0.0);
    if needed > available {
        return overlapping_placement(marks, x, y_min, y_max);
    }
    standard_placement(marks, x, y_min, y_max)
}

/// No de-overlap: every mark sits at its clamped target, flagged.
fn overlapping_placement(marks: &[LegendMark], x: f64, y_min: f64, y_max: f64) -> LegendLayout {
    let placed = marks
        .iter()
        .map(|mark| {
            let top = clamp(mark.y_target - mark.height / 2.0, y_min, y_max - mark.height);
            PlacedMark {
                label: mark.label.clone(),
                color: mark.color.clone(),
                bounds: Rect {
                    x,
                    y: top,
                    width: mark.width,
                    height: mark.height,
                },
                y_target: mark.y_target,
                level: 0,
                is_overlap: true,
            }
        })
        .collect();
    LegendLayout {
        marks: placed,
        mode: PlacementMode::Overlapping,
        total_levels: 1,
    }
}

/// One mark inside a placement group. `index` points back into the input
/// slice so output order matches input order.
#[derive(Debug, Clone)]
struct GroupMark {
    index: usize,
    height: f64,
    y_target: f64,
}

/// A contiguous stack of marks being placed together.
#[derive(Debug, Clone)]
struct Group {
    top: f64,
    marks: Vec<GroupMark>,
}

impl Group {
    fn height(&self) -> f64 {
        self.marks.iter().map(|m| m.height).sum::<f64>()
            + MARK_SPACING * (self.marks.len().saturating_sub(1)) as f64
    }

    fn bottom(&self) -> f64 {
        self.top + self.height()
    }

    fn clamp_into(&mut self, y_min: f64, y_max: f64) {
        // Overflow on one side is absorbed by shifting the other way.
        if self.top < y_min {
            self.top = y_min;
        }
        if self.bottom() > y_max {
            self.top = y_max - self.height();
        }
    }
}

fn standard_placement(marks: &[LegendMark], x: f64, y_min: f64, y_max: f64) -> LegendLayout {
    // Work top-to-bottom by target position.
    let mut order: Vec<usize> = (0..marks.len()).collect();
    order.sort_by(|&a, &b| {
        marks[a]
            .y_target
            .partial_cmp(&marks[b].y_target)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut groups: Vec<Group> = order
        .iter()
        .map(|&index| {
            let mark = &marks[index];
            let mut group = Group {
                top: mark.y_target - mark.height / 2.0,
                marks: vec![GroupMark {
                    index,
                    height: mark.height,
                    y_target: mark.y_target,
                }],
            };
            group.clamp_into(y_min, y_max);
            group
        })
        .collect();

    // Merge adjacent overlapping groups until stable. Each merge removes a
    // group, so this terminates.
    loop {
        let mut merged_any = false;
        let mut i = 0;
        while i + 1 < groups.len() {
            let gap = groups[i + 1].top - groups[i].bottom();
            if gap < MARK_SPACING {
                let lower = groups.remove(i + 1);
                let upper = &mut groups[i];
                // Merge point weighted by relative member counts: the bigger
                // group moves less.
                let overlap = MARK_SPACING - gap;
                let n_upper = upper.marks.len() as f64;
                let n_lower = lower.marks.len() as f64;
                upper.top -= overlap * n_lower / (n_upper + n_lower);
                upper.marks.extend(lower.marks);
                upper.clamp_into(y_min, y_max);
                merged_any = true;
            } else {
                i += 1;
            }
        }
        if !merged_any || groups.len() == 1 {
            // A single clamped group cannot overlap anything.
            if groups.len() == 1 {
                groups[0].clamp_into(y_min, y_max);
            }
            break;
        }
    }

    // Materialize placements and assign connector levels per group: bump the
    // level when the placement direction sign flips twice in a row.
    let mut placed: Vec<Option<PlacedMark>> = vec![None; marks.len()];
    let mut total_levels = 1usize;
    for group in &groups {
        let mut y = group.top;
        let mut level = 0usize;
        let mut prev_sign = 0i8;
        let mut last_flipped = false;
        for gm in &group.marks {
            let mark = &marks[gm.index];
            let center = y + gm.height / 2.0;
            let delta = center - gm.y_target;
            let sign: i8 = if delta > f64::EPSILON {
                1
            } else if delta < -f64::EPSILON {
                -1
            } else {
                0
            };
            let flipped = prev_sign != 0 && sign != 0 && sign != prev_sign;
            if flipped && last_flipped {
                level += 1;
            }
            last_flipped = flipped;
            if sign != 0 {
                prev_sign = sign;
            }
            total_levels = total_levels.max(level + 1);

            placed[gm.index] = Some(PlacedMark {
                label: mark.label.clone(),
                color: mark.color.clone(),
                bounds: Rect {
                    x,
                    y,
                    width: mark.width,
                    height: gm.height,
                },
                y_target: gm.y_target,
                level,
                is_overlap: false,
            });
            y += gm.height + MARK_SPACING;
        }
    }

    LegendLayout {
        marks: placed.into_iter().flatten().collect(),
        mode: PlacementMode::Standard,
        total_levels,
    }
}

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if hi < lo {
        return lo;
    }
    value.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(label: &str, y: f64) -> LegendMark {
        LegendMark {
            label: label.to_string(),
            color: "#4472C4".to_string(),
            y_target: y,
            width: 60.0,
            height: 16.0,
        }
    }

    #[test]
    fn separated_targets_stay_at_target() {
        let marks = vec![mark("a", 50.0), mark("b", 150.0)];
        let layout = place_marks(&marks, 0.0, 0.0, 300.0, 0.0);
        assert_eq!(layout.mode, PlacementMode::Standard);
        assert!((layout.marks[0].bounds.y - (50.0 - 8.0)).abs() < 1e-9);
        assert!((layout.marks[1].bounds.y - (150.0 - 8.0)).abs() < 1e-9);
    }

    #[test]
    fn colliding_targets_are_separated() {
        let marks = vec![mark("a", 100.0), mark("b", 101.0), mark("c", 102.0)];
        let layout = place_marks(&marks, 0.0, 0.0, 300.0, 0.0);
        assert_eq!(layout.mode, PlacementMode::Standard);
        for i in 0..layout.marks.len() {
            for j in (i + 1)..layout.marks.len() {
                assert!(
                    !layout.marks[i].bounds.intersects(&layout.marks[j].bounds),
                    "marks {i} and {j} overlap"
                );
            }
        }
    }

    #[test]
    fn clamped_at_range_edges() {
        let marks = vec![mark("a", -50.0), mark("b", 500.0)];
        let layout = place_marks(&marks, 0.0, 0.0, 300.0, 0.0);
        assert!(layout.marks[0].bounds.y >= 0.0);
        assert!(layout.marks[1].bounds.bottom() <= 300.0);
    }

    #[test]
    fn insufficient_space_switches_to_overlapping() {
        let marks: Vec<LegendMark> = (0..10).map(|i| mark("x", i as f64 * 3.0)).collect();
        let layout = place_marks(&marks, 0.0, 0.0, 60.0, 0.0);
        assert_eq!(layout.mode, PlacementMode::Overlapping);
        assert!(layout.marks.iter().all(|m| m.is_overlap));
        // Same input, same decision: no oscillation between modes.
        let again = place_marks(&marks, 0.0, 0.0, 60.0, 0.0);
        assert_eq!(again.mode, PlacementMode::Overlapping);
        assert_eq!(layout.marks, again.marks);
    }

    #[test]
    fn reserved_space_counts_against_availability() {
        // 3 marks * 16 + 2 * 2 = 52 needed.
        let marks = vec![mark("a", 10.0), mark("b", 30.0), mark("c", 50.0)];
        let fits = place_marks(&marks, 0.0, 0.0, 60.0, 0.0);
        assert_eq!(fits.mode, PlacementMode::Standard);
        let squeezed = place_marks(&marks, 0.0, 0.0, 60.0, 20.0);
        assert_eq!(squeezed.mode, PlacementMode::Overlapping);
    }

    #[test]
    fn output_order_matches_input_order() {
        let marks = vec![mark("low", 200.0), mark("high", 10.0)];
        let layout = place_marks(&marks, 0.0, 0.0, 300.0, 0.0);
        assert_eq!(layout.marks[0].label, "low");
        assert_eq!(layout.marks[1].label, "high");
    }
}
