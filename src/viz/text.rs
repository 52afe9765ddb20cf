//! Text measurement and truncation for legend marks.

/// Average glyph width as a fraction of the font size; close enough for the
/// sans-serif faces the renderer registers.
const GLYPH_ASPECT: f32 = 0.60;

/// Heuristic pixel width of `text` (plotters offers no text measuring).
pub fn estimate_text_width_px(text: &str, font_px: u32) -> u32 {
    let glyphs = text.chars().count() as f32;
    (glyphs * font_px as f32 * GLYPH_ASPECT).ceil() as u32
}

/// Truncate `text` to fit `max_px`, ending in an ellipsis when anything was
/// cut. Degenerate budgets yield an empty string rather than a bare ellipsis.
pub fn truncate_to_width(text: &str, font_px: u32, max_px: u32) -> String {
    if estimate_text_width_px(text, font_px) <= max_px {
        return text.to_string();
    }
    let mut kept: Vec<char> = text.chars().collect();
    while !kept.is_empty() {
        kept.pop();
        let candidate: String = kept.iter().copied().chain(std::iter::once('…')).collect();
        if estimate_text_width_px(&candidate, font_px) <= max_px {
            return candidate;
        }
    }
    String::new()
}
