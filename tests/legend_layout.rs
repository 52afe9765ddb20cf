//! Line-legend placement laws over varied target distributions.

use grapher::viz::line_legend::{LegendMark, PlacementMode, place_marks};

fn mark(label: &str, y: f64) -> LegendMark {
    LegendMark::new(label, "#4472C4", y, 13)
}

// Deterministic scramble; keeps fixtures varied without a rng dependency.
fn scrambled_targets(n: usize, span: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let x = ((i * 2654435761) % 1000) as f64 / 1000.0;
            x * span
        })
        .collect()
}

#[test]
fn standard_mode_never_overlaps() {
    for n in [2usize, 5, 8, 12] {
        let marks: Vec<LegendMark> = scrambled_targets(n, 400.0)
            .into_iter()
            .enumerate()
            .map(|(i, y)| mark(&format!("series {i}"), y))
            .collect();
        let layout = place_marks(&marks, 500.0, 0.0, 600.0, 0.0);
        assert_eq!(layout.mode, PlacementMode::Standard);
        for i in 0..layout.marks.len() {
            assert!(layout.marks[i].bounds.y >= 0.0);
            assert!(layout.marks[i].bounds.bottom() <= 600.0);
            assert!(!layout.marks[i].is_overlap);
            for j in (i + 1)..layout.marks.len() {
                assert!(
                    !layout.marks[i].bounds.intersects(&layout.marks[j].bounds),
                    "marks {i} and {j} overlap with n={n}"
                );
            }
        }
    }
}

#[test]
fn overlap_flags_match_the_mode() {
    let marks: Vec<LegendMark> = (0..20).map(|i| mark("x", i as f64)).collect();
    let layout = place_marks(&marks, 0.0, 0.0, 100.0, 0.0);
    assert_eq!(layout.mode, PlacementMode::Overlapping);
    assert!(layout.marks.iter().all(|m| m.is_overlap));
    // Even in overlapping mode nothing leaves the axis range.
    assert!(layout
        .marks
        .iter()
        .all(|m| m.bounds.y >= 0.0 && m.bounds.bottom() <= 100.0));
}

#[test]
fn mode_decision_is_a_pure_function_of_the_input() {
    let marks: Vec<LegendMark> = scrambled_targets(9, 120.0)
        .into_iter()
        .map(|y| mark("label", y))
        .collect();
    let first = place_marks(&marks, 0.0, 0.0, 160.0, 0.0);
    for _ in 0..5 {
        let again = place_marks(&marks, 0.0, 0.0, 160.0, 0.0);
        assert_eq!(again.mode, first.mode);
        assert_eq!(again.marks, first.marks);
    }
}

#[test]
fn connector_levels_bump_on_double_direction_flips() {
    // Three marks fighting for one spot grow a stack that swallows the two
    // below it; within the merged group the placement offsets alternate
    // direction (down, down, up, down, up), and each flip-after-a-flip moves
    // the connector to the next level so the zig-zags cannot cross.
    let marks = vec![
        mark("a", 100.0),
        mark("b", 100.0),
        mark("c", 100.0),
        mark("d", 136.0),
        mark("e", 146.0),
    ];
    let layout = place_marks(&marks, 0.0, 0.0, 400.0, 0.0);
    assert_eq!(layout.mode, PlacementMode::Standard);
    let levels: Vec<usize> = layout.marks.iter().map(|m| m.level).collect();
    assert_eq!(levels, [0, 0, 0, 1, 2]);
    assert_eq!(layout.total_levels, 3);
}

#[test]
fn placements_stay_ordered_by_target_within_a_merged_group() {
    // All targets collide around the middle; the resolved stack must keep
    // target order top to bottom.
    let marks = vec![mark("a", 200.0), mark("b", 201.0), mark("c", 202.0)];
    let layout = place_marks(&marks, 0.0, 0.0, 400.0, 0.0);
    assert!(layout.marks[0].bounds.y < layout.marks[1].bounds.y);
    assert!(layout.marks[1].bounds.y < layout.marks[2].bounds.y);
}
