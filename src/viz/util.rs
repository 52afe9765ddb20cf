//! Rendering utilities: palette conversion, axis scaling, locale mapping.

use num_format::{Locale, ToFormattedString};
use plotters::prelude::*;

use super::text::estimate_text_width_px;

/// Parse a `#RRGGBB` hex color (the palette format used by [`crate::color`]).
pub fn parse_hex_color(hex: &str) -> RGBAColor {
    let parse = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    RGBColor(parse(1..3), parse(3..5), parse(5..7)).to_rgba()
}

/// Pick a single Y-axis scale and its human label based on the overall magnitude.
/// Returns (scale, label), e.g. (1e6, "millions").
pub fn choose_axis_scale(max_abs: f64) -> (f64, &'static str) {
    if max_abs >= 1.0e12 {
        (1.0e12, "trillions")
    } else if max_abs >= 1.0e9 {
        (1.0e9, "billions")
    } else if max_abs >= 1.0e6 {
        (1.0e6, "millions")
    } else if max_abs >= 1.0e3 {
        (1.0e3, "thousands")
    } else {
        (1.0, "")
    }
}

/// Map a user-provided locale tag to a `num_format::Locale`.
///
/// Supported tags (case-insensitive): `en`, `de`, `fr`, `es`, `it`, `pt`,
/// `nl`. Defaults to English.
pub fn map_locale(tag: &str) -> &'static Locale {
    match tag.to_lowercase().as_str() {
        "de" | "de_de" | "german" => &Locale::de,
        "fr" | "fr_fr" => &Locale::fr,
        "es" | "es_es" => &Locale::es,
        "it" | "it_it" => &Locale::it,
        "pt" | "pt_pt" | "pt_br" => &Locale::pt,
        "nl" | "nl_nl" => &Locale::nl,
        _ => &Locale::en,
    }
}

/// Locale-aware tick label: grouped integers for large magnitudes, short
/// decimals for small ones.
pub fn format_tick(value: f64, locale: &Locale) -> String {
    let abs = value.abs();
    if abs >= 1000.0 {
        (value.round() as i64).to_formatted_string(locale)
    } else if abs >= 100.0 {
        format!("{:.0}", value)
    } else if abs >= 10.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Compute a tight left label area width for the Y axis (in pixels), based
/// on the formatted tick labels that will appear. Clamped to a sensible
/// range to avoid extremes.
pub fn compute_left_label_area_px(
    ymin_scaled: f64,
    ymax_scaled: f64,
    ticks: usize,
    font_px: u32,
    locale: &Locale,
) -> u32 {
    let mut max_px = 0u32;
    for i in 0..=ticks {
        let t = if ticks == 0 {
            0.0
        } else {
            i as f64 / ticks as f64
        };
        let v = ymin_scaled + (ymax_scaled - ymin_scaled) * t;
        max_px = max_px.max(estimate_text_width_px(&format_tick(v, locale), font_px));
    }
    max_px.saturating_add(18).clamp(48, 140)
}
