//! Chart rendering: turn built series into **SVG** or **PNG** files.
//!
//! - Distinct series colors (Microsoft Office palette, assigned upstream)
//! - Locale-aware tick labels (`30,000` vs `30.000`)
//! - Line charts place their labels beside the line ends via the
//!   collision-avoiding layout in [`line_legend`]
//! - Chart kinds: `Line`, `Scatter`, `StackedArea`, `StackedBar`, `DiscreteBar`

pub mod line_legend;
pub mod text;
pub mod util;

use anyhow::{Result, anyhow};
use num_format::Locale;

use plotters::backend::DrawingBackend;
use plotters::coord::Shift;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;

use plotters_bitmap::BitMapBackend;
use plotters_svg::SVGBackend;

use std::path::Path;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::params::ChartKind;
use crate::series::{Series, stack_series};
use crate::table::day_to_date;
use line_legend::{LegendMark, PlacementMode, place_marks};
use util::{
    choose_axis_scale, compute_left_label_area_px, format_tick, map_locale, parse_hex_color,
};

/// One-time registration of a "sans-serif" font for the `ab_glyph` text path,
/// which does not discover OS fonts on its own. The font is loaded from the
/// first readable candidate path.
static INIT_FONTS: Once = Once::new();
static FONTS_OK: AtomicBool = AtomicBool::new(false);

const FONT_CANDIDATES: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
];

fn ensure_fonts_registered() -> Result<()> {
    INIT_FONTS.call_once(|| {
        for path in FONT_CANDIDATES {
            if let Ok(bytes) = std::fs::read(path) {
                let leaked: &'static [u8] = Box::leak(bytes.into_boxed_slice());
                if plotters::style::register_font(
                    "sans-serif",
                    plotters::style::FontStyle::Normal,
                    leaked,
                )
                .is_ok()
                {
                    FONTS_OK.store(true, Ordering::Release);
                    return;
                }
            }
        }
    });
    if FONTS_OK.load(Ordering::Acquire) {
        Ok(())
    } else {
        Err(anyhow!(
            "no usable sans-serif font found (looked in {FONT_CANDIDATES:?}); \
             install DejaVu or Liberation fonts"
        ))
    }
}

/// Fully-configurable entry point: render `series` as `kind` to `out_path`,
/// choosing the backend by file extension (`.svg` vs bitmap).
///
/// `aligned` switches the x axis from calendar dates (day indices) to plain
/// "days since threshold" counts.
#[allow(clippy::too_many_arguments)]
pub fn render_chart<P: AsRef<Path>>(
    series: &[Series],
    kind: ChartKind,
    out_path: P,
    width: u32,
    height: u32,
    locale_tag: &str,
    title: &str,
    aligned: bool,
) -> Result<()> {
    if series.is_empty() || series.iter().all(|s| s.points.is_empty()) {
        return Err(anyhow!("no data to plot"));
    }
    ensure_fonts_registered()?;
    let out_path = out_path.as_ref();
    let path_string = out_path.to_string_lossy().into_owned();
    let locale = map_locale(locale_tag);

    if out_path.extension().and_then(|s| s.to_str()) == Some("svg") {
        let root = SVGBackend::new(path_string.as_str(), (width, height)).into_drawing_area();
        draw_chart(root, series, kind, locale, title, aligned)?;
    } else {
        let root = BitMapBackend::new(path_string.as_str(), (width, height)).into_drawing_area();
        draw_chart(root, series, kind, locale, title, aligned)?;
    }
    Ok(())
}

const MARGIN: i32 = 16;
const TITLE_PX: i32 = 22;
const LABEL_PX: u32 = 13;
const LEGEND_PX: u32 = 13;
const LEGEND_LABEL_MAX_PX: u32 = 214;
const BOTTOM_AREA: i32 = 34;

fn draw_chart<DB>(
    root: DrawingArea<DB, Shift>,
    series: &[Series],
    kind: ChartKind,
    locale: &Locale,
    title: &str,
    aligned: bool,
) -> Result<()>
where
    DB: DrawingBackend,
{
    root.fill(&WHITE).map_err(|e| anyhow!("fill: {e}"))?;

    match kind {
        ChartKind::DiscreteBar => draw_discrete_bars(root, series, locale, title),
        _ => draw_time_chart(root, series, kind, locale, title, aligned),
    }
}

/// Time-positioned kinds: lines, scatter, and the stacked kinds.
fn draw_time_chart<DB>(
    root: DrawingArea<DB, Shift>,
    series: &[Series],
    kind: ChartKind,
    locale: &Locale,
    title: &str,
    aligned: bool,
) -> Result<()>
where
    DB: DrawingBackend,
{
    let stacked = matches!(kind, ChartKind::StackedArea | ChartKind::StackedBar);
    let stacks = if stacked {
        stack_series(series)
    } else {
        Vec::new()
    };

    let times: Vec<i32> = series
        .iter()
        .flat_map(|s| s.points.iter().map(|p| p.time))
        .collect();
    let (mut x_min, mut x_max) = match (times.iter().min(), times.iter().max()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => return Err(anyhow!("no time positions to plot")),
    };
    if x_min == x_max {
        x_min -= 1;
        x_max += 1;
    }

    let (mut y_min, mut y_max) = if stacked {
        let top = stacks
            .iter()
            .flat_map(|s| s.points.iter().map(|p| p.value_offset + p.value))
            .fold(f64::NEG_INFINITY, f64::max);
        (0.0, top)
    } else {
        series
            .iter()
            .flat_map(|s| s.points.iter().map(|p| p.value))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    };
    if !y_min.is_finite() || !y_max.is_finite() {
        return Err(anyhow!("no numeric values to plot"));
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    let (scale, scale_label) = choose_axis_scale(y_max.abs().max(y_min.abs()));
    let (ys_min, ys_max) = (y_min / scale, y_max / scale);
    let left_area = compute_left_label_area_px(ys_min, ys_max, 8, LABEL_PX, locale);

    // Line charts label their lines directly in a right-side gutter; every
    // other kind uses the built-in legend box, so only lines reserve space.
    // The gutter is capped; labels longer than it are truncated at draw time.
    let right_area = if kind == ChartKind::Line {
        let widest = series
            .iter()
            .map(|s| text::estimate_text_width_px(&s.name, LEGEND_PX))
            .max()
            .unwrap_or(0);
        (widest + 26).min(LEGEND_LABEL_MAX_PX + 26)
    } else {
        12
    };

    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .caption(title, ("sans-serif", TITLE_PX))
        .x_label_area_size(BOTTOM_AREA)
        .y_label_area_size(left_area as i32)
        .right_y_label_area_size(right_area as i32)
        .build_cartesian_2d(x_min as f64..x_max as f64, ys_min..ys_max)
        .map_err(|e| anyhow!("chart build: {e}"))?;

    let y_desc = if scale_label.is_empty() {
        String::new()
    } else {
        format!("({scale_label})")
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .light_line_style(RGBColor(230, 230, 230))
        .y_desc(y_desc)
        .y_label_formatter(&|v| format_tick(*v, locale))
        .x_label_formatter(&|v| format_time_label(*v, aligned))
        .x_labels(8)
        .y_labels(8)
        .label_style(("sans-serif", LABEL_PX as i32))
        .draw()
        .map_err(|e| anyhow!("mesh: {e}"))?;

    match kind {
        ChartKind::Line => {
            for s in series {
                let color = parse_hex_color(&s.color);
                chart
                    .draw_series(LineSeries::new(
                        s.points.iter().map(|p| (p.time as f64, p.value / scale)),
                        color.stroke_width(2),
                    ))
                    .map_err(|e| anyhow!("line series: {e}"))?;
            }
            draw_line_labels(&root, &chart, series, scale)?;
        }
        ChartKind::Scatter => {
            for s in series {
                let color = parse_hex_color(&s.color);
                chart
                    .draw_series(s.points.iter().map(|p| {
                        Circle::new((p.time as f64, p.value / scale), 3, color.filled())
                    }))
                    .map_err(|e| anyhow!("scatter series: {e}"))?
                    .label(s.name.clone())
                    .legend(move |(x, y)| Circle::new((x + 8, y), 3, color.filled()));
            }
        }
        ChartKind::StackedArea => {
            for s in &stacks {
                let color = parse_hex_color(&s.color);
                // Band between the running offset and offset + value: the
                // upper edge forward, then the lower edge back.
                let mut band: Vec<(f64, f64)> = s
                    .points
                    .iter()
                    .map(|p| (p.time as f64, (p.value_offset + p.value) / scale))
                    .collect();
                band.extend(
                    s.points
                        .iter()
                        .rev()
                        .map(|p| (p.time as f64, p.value_offset / scale)),
                );
                chart
                    .draw_series(std::iter::once(Polygon::new(band, color.mix(0.8))))
                    .map_err(|e| anyhow!("stacked area: {e}"))?
                    .label(s.name.clone())
                    .legend(move |(x, y)| {
                        Rectangle::new([(x, y - 4), (x + 12, y + 4)], color.filled())
                    });
            }
        }
        ChartKind::StackedBar => {
            let slot = bar_slot_width(x_min, x_max, &times);
            for s in &stacks {
                let color = parse_hex_color(&s.color);
                chart
                    .draw_series(s.points.iter().filter(|p| p.value != 0.0).map(|p| {
                        let x = p.time as f64;
                        Rectangle::new(
                            [
                                (x - slot / 2.0, p.value_offset / scale),
                                (x + slot / 2.0, (p.value_offset + p.value) / scale),
                            ],
                            color.filled(),
                        )
                    }))
                    .map_err(|e| anyhow!("stacked bar: {e}"))?
                    .label(s.name.clone())
                    .legend(move |(x, y)| {
                        Rectangle::new([(x, y - 4), (x + 12, y + 4)], color.filled())
                    });
            }
        }
        ChartKind::DiscreteBar => unreachable!("handled by draw_discrete_bars"),
    }

    if kind != ChartKind::Line {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(WHITE.mix(0.85))
            .border_style(RGBColor(200, 200, 200))
            .label_font(("sans-serif", LEGEND_PX as i32))
            .draw()
            .map_err(|e| anyhow!("legend: {e}"))?;
    }

    root.present().map_err(|e| anyhow!("present: {e}"))?;
    Ok(())
}

/// Place each line's label beside its final value using the collision
/// engine, then draw connector and text in the right gutter.
fn draw_line_labels<DB>(
    root: &DrawingArea<DB, Shift>,
    chart: &ChartContext<'_, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    series: &[Series],
    scale: f64,
) -> Result<()>
where
    DB: DrawingBackend,
{
    let plot = chart.plotting_area();
    let (x_px, y_px) = plot.get_pixel_range();
    let plot_right = x_px.end;
    let (py_top, py_bottom) = (y_px.start as f64, y_px.end as f64);

    let mut marks = Vec::with_capacity(series.len());
    for s in series {
        let Some(last) = s.points.last() else { continue };
        let (_, target_px) = plot.map_coordinate(&(last.time as f64, last.value / scale));
        let label = text::truncate_to_width(&s.name, LEGEND_PX, LEGEND_LABEL_MAX_PX);
        marks.push(LegendMark::new(
            label,
            s.color.clone(),
            target_px as f64,
            LEGEND_PX,
        ));
    }
    let layout = place_marks(&marks, plot_right as f64 + 14.0, py_top, py_bottom, 0.0);

    for placed in &layout.marks {
        let color = parse_hex_color(&placed.color);
        let cy = (placed.bounds.y + placed.bounds.height / 2.0) as i32;
        // Connector from line end to label, stepped per level so connectors
        // on different levels do not cross.
        if layout.mode == PlacementMode::Standard {
            let step_x = plot_right + 4 + 4 * placed.level as i32;
            root.draw(&PathElement::new(
                vec![
                    (plot_right, placed.y_target as i32),
                    (step_x, placed.y_target as i32),
                    (step_x, cy),
                    (placed.bounds.x as i32 - 2, cy),
                ],
                color.mix(0.7),
            ))
            .map_err(|e| anyhow!("connector: {e}"))?;
        }
        root.draw(&Text::new(
            placed.label.clone(),
            (placed.bounds.x as i32, placed.bounds.y as i32),
            ("sans-serif", LEGEND_PX as i32).into_font().color(&color),
        ))
        .map_err(|e| anyhow!("label: {e}"))?;
    }
    Ok(())
}

/// One bar per entity at its latest value, ordered as given.
fn draw_discrete_bars<DB>(
    root: DrawingArea<DB, Shift>,
    series: &[Series],
    locale: &Locale,
    title: &str,
) -> Result<()>
where
    DB: DrawingBackend,
{
    let bars: Vec<(&str, &str, f64)> = series
        .iter()
        .filter_map(|s| {
            s.points
                .last()
                .map(|p| (s.name.as_str(), s.color.as_str(), p.value))
        })
        .collect();
    if bars.is_empty() {
        return Err(anyhow!("no numeric values to plot"));
    }

    let top = bars.iter().map(|b| b.2).fold(f64::NEG_INFINITY, f64::max);
    let floor = bars.iter().map(|b| b.2).fold(0.0f64, f64::min);
    let (scale, scale_label) = choose_axis_scale(top.abs().max(floor.abs()));
    let (ys_min, ys_max) = (floor / scale, (top / scale) * 1.05);
    let left_area = compute_left_label_area_px(ys_min, ys_max, 8, LABEL_PX, locale);

    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .caption(title, ("sans-serif", TITLE_PX))
        .x_label_area_size(BOTTOM_AREA)
        .y_label_area_size(left_area as i32)
        .build_cartesian_2d(0.0..bars.len() as f64, ys_min..ys_max)
        .map_err(|e| anyhow!("chart build: {e}"))?;

    let names: Vec<String> = bars.iter().map(|b| b.0.to_string()).collect();
    let y_desc = if scale_label.is_empty() {
        String::new()
    } else {
        format!("({scale_label})")
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .light_line_style(RGBColor(230, 230, 230))
        .y_desc(y_desc)
        .y_label_formatter(&|v| format_tick(*v, locale))
        .x_label_formatter(&|v| {
            // Ticks land between bar slots; label each slot by its entity.
            let idx = v.floor() as usize;
            names.get(idx).cloned().unwrap_or_default()
        })
        .x_labels(bars.len())
        .label_style(("sans-serif", LABEL_PX as i32))
        .draw()
        .map_err(|e| anyhow!("mesh: {e}"))?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, color, value))| {
            let x = i as f64;
            Rectangle::new(
                [(x + 0.15, 0.0), (x + 0.85, value / scale)],
                parse_hex_color(color).filled(),
            )
        }))
        .map_err(|e| anyhow!("bars: {e}"))?;

    root.present().map_err(|e| anyhow!("present: {e}"))?;
    Ok(())
}

/// Narrow bars when time positions sit close together.
fn bar_slot_width(x_min: i32, x_max: i32, times: &[i32]) -> f64 {
    let mut unique: Vec<i32> = times.to_vec();
    unique.sort_unstable();
    unique.dedup();
    let slots = unique.len().max(1) as f64;
    (((x_max - x_min) as f64) / slots * 0.8).max(0.5)
}

fn format_time_label(value: f64, aligned: bool) -> String {
    let day = value.round() as i32;
    if aligned {
        return day.to_string();
    }
    day_to_date(day).format("%b %d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_slots_shrink_with_density() {
        let dense: Vec<i32> = (0..100).collect();
        let sparse = [0, 50, 99];
        assert!(bar_slot_width(0, 99, &dense) < bar_slot_width(0, 99, &sparse));
    }

    #[test]
    fn aligned_axis_labels_are_plain_counts() {
        assert_eq!(format_time_label(42.0, true), "42");
        // Calendar labels come from the day index epoch.
        assert!(format_time_label(0.0, false).contains("2020"));
    }
}
