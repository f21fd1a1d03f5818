//! Fonts, caption layout and glyph rasterization
//!
//! Fonts are resolved once per run from the system font database (or an
//! explicit font file) and rasterized with fontdue. Layout works on char
//! indices so the typewriter reveal can count characters in source order.

use crate::config::{TextAlign, TextPosition, TextStyle};
use crate::{Color, Error, Result};
use fontdue::{Font, FontSettings};
use resvg::tiny_skia::{IntSize, Pixmap};
use std::ops::Range;
use std::sync::Arc;
use usvg::fontdb;

/// Caption lines are wrapped to this fraction of the frame width
pub const WRAP_FRACTION: f32 = 0.85;
/// Line advance relative to the font size
pub const LINE_HEIGHT: f32 = 1.3;
/// Vertical padding between caption block and frame edge, relative to height
pub const EDGE_PADDING: f32 = 0.08;
/// Box padding relative to the font size
pub const BOX_PADDING: f32 = 0.6;
pub const BOX_RADIUS: f32 = 12.0;

/// Pixel transparent border around rendered text
const TEXT_PAD: i32 = 2;

const FALLBACK_FAMILIES: &[&str] = &[
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "FreeSans",
    "Helvetica",
    "Arial",
];

/// Width of a run of text at a pixel size
pub trait Measure {
    fn measure(&self, text: &str, size: f32) -> f32;
}

/// A loaded, shareable font
#[derive(Clone)]
pub struct FontFace {
    font: Arc<Font>,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFace")
            .field("name", &self.font.name())
            .finish()
    }
}

/// Rasterized text; the em box top-left sits at (`pad`, `pad`)
#[derive(Debug, Clone)]
pub struct TextBitmap {
    pub pixmap: Pixmap,
    pub pad: f32,
    /// Advance width in pixels
    pub width: f32,
    /// Ascent minus descent
    pub height: f32,
}

impl FontFace {
    pub fn from_bytes(bytes: &[u8], collection_index: u32) -> Result<Self> {
        let settings = FontSettings {
            collection_index,
            ..FontSettings::default()
        };
        let font = Font::from_bytes(bytes, settings)
            .map_err(|e| Error::resource(format!("invalid font: {}", e)))?;
        Ok(Self {
            font: Arc::new(font),
        })
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::resource(format!("font {}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes, 0)
    }

    pub fn ascent(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map_or(size * 0.8, |m| m.ascent)
    }

    /// Negative distance from baseline to the bottom of the em box
    pub fn descent(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map_or(-size * 0.2, |m| m.descent)
    }

    fn layout(&self, text: &str, size: f32) -> (Vec<(char, f32)>, f32) {
        let mut glyphs = Vec::with_capacity(text.len());
        let mut pen = 0.0f32;
        let mut prev: Option<char> = None;
        for ch in text.chars() {
            if let Some(p) = prev {
                pen += self.font.horizontal_kern(p, ch, size).unwrap_or(0.0);
            }
            glyphs.push((ch, pen));
            pen += self.font.metrics(ch, size).advance_width;
            prev = Some(ch);
        }
        (glyphs, pen)
    }

    /// Rasterize one line of text in `color`
    pub fn render(&self, text: &str, size: f32, color: Color) -> Option<TextBitmap> {
        let (glyphs, width) = self.layout(text, size);
        if glyphs.is_empty() || width <= 0.0 || size <= 0.0 {
            return None;
        }
        let ascent = self.ascent(size);
        let height = ascent - self.descent(size);

        let w = width.ceil() as i32 + 2 * TEXT_PAD;
        let h = height.ceil() as i32 + 2 * TEXT_PAD;
        let mut coverage = vec![0f32; (w * h) as usize];
        let baseline = TEXT_PAD + ascent.round() as i32;

        for (ch, pen) in glyphs {
            if ch.is_whitespace() {
                continue;
            }
            let (metrics, bitmap) = self.font.rasterize(ch, size);
            let x0 = TEXT_PAD + pen.round() as i32 + metrics.xmin;
            let y0 = baseline - (metrics.height as i32 + metrics.ymin);
            for gy in 0..metrics.height {
                let y = y0 + gy as i32;
                if y < 0 || y >= h {
                    continue;
                }
                for gx in 0..metrics.width {
                    let x = x0 + gx as i32;
                    if x < 0 || x >= w {
                        continue;
                    }
                    let c = bitmap[gy * metrics.width + gx] as f32 / 255.0;
                    let dst = &mut coverage[(y * w + x) as usize];
                    *dst = c + *dst * (1.0 - c);
                }
            }
        }

        let mut data = Vec::with_capacity(coverage.len() * 4);
        for c in coverage {
            let a = (c * 255.0).round();
            data.push((color.r as f32 * c).round() as u8);
            data.push((color.g as f32 * c).round() as u8);
            data.push((color.b as f32 * c).round() as u8);
            data.push(a as u8);
        }
        let pixmap = Pixmap::from_vec(data, IntSize::from_wh(w as u32, h as u32)?)?;

        Some(TextBitmap {
            pixmap,
            pad: TEXT_PAD as f32,
            width,
            height,
        })
    }
}

impl Measure for FontFace {
    fn measure(&self, text: &str, size: f32) -> f32 {
        self.layout(text, size).1
    }
}

/// Which text roles a run needs fonts for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontNeeds {
    pub caption: bool,
    pub polaroid: bool,
    pub intro: bool,
}

/// Fonts for every text role of a run
#[derive(Debug, Clone, Default)]
pub struct Fonts {
    /// Bold, in the configured family
    pub caption: Option<FontFace>,
    /// Regular weight, in the configured family
    pub polaroid: Option<FontFace>,
    /// Bold sans-serif for the intro placeholder
    pub intro: Option<FontFace>,
}

impl Fonts {
    /// Resolve the fonts `needs` asks for; a missing font is a resource error
    pub fn resolve(style: &TextStyle, needs: FontNeeds) -> Result<Self> {
        if needs == FontNeeds::default() {
            return Ok(Self::default());
        }

        let explicit = match &style.font_path {
            Some(path) => Some(FontFace::from_path(path)?),
            None => None,
        };

        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "loaded system fonts");

        let caption = if needs.caption {
            explicit
                .clone()
                .or_else(|| query(&db, &style.font_family, fontdb::Weight::BOLD, None))
        } else {
            None
        };
        let polaroid = if needs.polaroid {
            explicit.clone().or_else(|| {
                query(
                    &db,
                    &style.font_family,
                    fontdb::Weight::NORMAL,
                    Some(fontdb::Family::Cursive),
                )
            })
        } else {
            None
        };
        let intro = if needs.intro {
            query(&db, "sans-serif", fontdb::Weight::BOLD, None).or(explicit)
        } else {
            None
        };

        for (needed, font, role) in [
            (needs.caption, &caption, "captions"),
            (needs.polaroid, &polaroid, "polaroid captions"),
            (needs.intro, &intro, "the intro title"),
        ] {
            if needed && font.is_none() {
                return Err(Error::resource(format!("no usable font found for {}", role)));
            }
        }

        Ok(Self {
            caption,
            polaroid,
            intro,
        })
    }
}

fn query(
    db: &fontdb::Database,
    family_list: &str,
    weight: fontdb::Weight,
    generic_fallback: Option<fontdb::Family<'_>>,
) -> Option<FontFace> {
    let mut families: Vec<fontdb::Family<'_>> = parse_families(family_list);
    families.extend(generic_fallback);
    families.push(fontdb::Family::SansSerif);
    families.extend(FALLBACK_FAMILIES.iter().map(|name| fontdb::Family::Name(*name)));

    let id = db
        .query(&fontdb::Query {
            families: &families,
            weight,
            stretch: fontdb::Stretch::Normal,
            style: fontdb::Style::Normal,
        })
        .or_else(|| {
            let face = db.faces().next()?;
            tracing::warn!(
                family = family_list,
                fallback = ?face.families.first().map(|(name, _)| name),
                "requested font family not found, using first available face"
            );
            Some(face.id)
        })?;

    db.with_face_data(id, |data, index| FontFace::from_bytes(data, index))?
        .map_err(|e| tracing::warn!(error = %e, "could not parse font face"))
        .ok()
}

/// Split a CSS-style family list into fontdb families
fn parse_families(list: &str) -> Vec<fontdb::Family<'_>> {
    list.split(',')
        .map(|name| name.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|name| !name.is_empty())
        .map(|name| match name.to_ascii_lowercase().as_str() {
            "sans-serif" => fontdb::Family::SansSerif,
            "serif" => fontdb::Family::Serif,
            "monospace" => fontdb::Family::Monospace,
            "cursive" => fontdb::Family::Cursive,
            "fantasy" => fontdb::Family::Fantasy,
            _ => fontdb::Family::Name(name),
        })
        .collect()
}

/// Greedy word wrap into char-index ranges no wider than `max_width`
///
/// Newlines force a break. A word wider than the budget on its own is split
/// between characters. Ranges exclude the whitespace between lines.
pub fn wrap(chars: &[char], max_width: f32, measure: &dyn Fn(&str) -> f32) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0;
    loop {
        let end = chars[start..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(chars.len(), |p| start + p);
        wrap_paragraph(chars, start..end, max_width, measure, &mut lines);
        if end >= chars.len() {
            break;
        }
        start = end + 1;
    }
    lines
}

fn wrap_paragraph(
    chars: &[char],
    range: Range<usize>,
    max_width: f32,
    measure: &dyn Fn(&str) -> f32,
    lines: &mut Vec<Range<usize>>,
) {
    let text_of = |r: Range<usize>| -> String { chars[r].iter().collect() };

    let mut words = Vec::new();
    let mut i = range.start;
    while i < range.end {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let word_start = i;
        while i < range.end && !chars[i].is_whitespace() {
            i += 1;
        }
        words.push(word_start..i);
    }
    if words.is_empty() {
        lines.push(range.start..range.start);
        return;
    }

    let mut current: Option<Range<usize>> = None;
    for word in words {
        if let Some(line) = &current {
            let candidate = line.start..word.end;
            if measure(&text_of(candidate.clone())) <= max_width {
                current = Some(candidate);
                continue;
            }
            lines.push(line.clone());
        }
        current = Some(break_word(chars, word, max_width, measure, lines));
    }
    lines.extend(current);
}

/// Emit full-width pieces of an overlong word, returning the remainder
fn break_word(
    chars: &[char],
    word: Range<usize>,
    max_width: f32,
    measure: &dyn Fn(&str) -> f32,
    lines: &mut Vec<Range<usize>>,
) -> Range<usize> {
    let text_of = |r: Range<usize>| -> String { chars[r].iter().collect() };
    let mut start = word.start;
    loop {
        if measure(&text_of(start..word.end)) <= max_width {
            return start..word.end;
        }
        let mut end = start + 1;
        while end < word.end && measure(&text_of(start..end + 1)) <= max_width {
            end += 1;
        }
        if end >= word.end {
            return start..word.end;
        }
        lines.push(start..end);
        start = end;
    }
}

/// One wrapped caption line
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLine {
    /// Char indices into the caption
    pub range: Range<usize>,
    pub text: String,
    pub width: f32,
    /// Top of the em box
    pub top: f32,
}

/// Position of a caption block and its background box
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub chars: Vec<char>,
    pub font_size: f32,
    pub lines: Vec<CaptionLine>,
    pub block_width: f32,
    pub center_x: f32,
    /// Box as (x, y, width, height)
    pub box_rect: (f32, f32, f32, f32),
}

impl CaptionLayout {
    /// Lay out `caption` for a `width`x`height` frame; `None` when blank
    pub fn new(
        caption: &str,
        style: &TextStyle,
        width: f32,
        height: f32,
        measure: &dyn Measure,
    ) -> Option<Self> {
        let caption = caption.trim_end();
        if caption.trim().is_empty() {
            return None;
        }
        let chars: Vec<char> = caption.chars().collect();
        let font_size = caption_font_size(style.font_size, width, height);
        let max_width = width * WRAP_FRACTION;
        let measure_at = |s: &str| measure.measure(s, font_size);

        let ranges = wrap(&chars, max_width, &measure_at);
        let line_height = font_size * LINE_HEIGHT;
        let total_height = ranges.len() as f32 * line_height;
        let padding = height * EDGE_PADDING;
        let start_y = match style.position {
            TextPosition::Top => padding,
            TextPosition::Center => (height - total_height) / 2.0,
            TextPosition::Bottom => height - padding - total_height,
        };
        // keep every line inside the frame
        let start_y = start_y.min(height - total_height).max(0.0);

        let lines: Vec<CaptionLine> = ranges
            .into_iter()
            .enumerate()
            .map(|(i, range)| {
                let text: String = chars[range.clone()].iter().collect();
                CaptionLine {
                    width: measure_at(&text),
                    text,
                    range,
                    top: start_y + i as f32 * line_height,
                }
            })
            .collect();

        let block_width = lines.iter().map(|l| l.width).fold(0.0, f32::max);
        let center_x = width / 2.0;
        let box_padding = font_size * BOX_PADDING;
        let box_rect = (
            center_x - block_width / 2.0 - box_padding,
            start_y - box_padding,
            block_width + box_padding * 2.0,
            total_height + box_padding,
        );

        Some(Self {
            chars,
            font_size,
            lines,
            block_width,
            center_x,
            box_rect,
        })
    }

    pub fn char_count(&self) -> usize {
        self.chars.len()
    }

    /// Left edge of a run of `run_width` drawn with `align`
    pub fn line_x(&self, run_width: f32, align: TextAlign) -> f32 {
        match align {
            TextAlign::Left => self.center_x - self.block_width / 2.0,
            TextAlign::Center => self.center_x - run_width / 2.0,
            TextAlign::Right => self.center_x + self.block_width / 2.0 - run_width,
        }
    }

    /// Visible prefix of each line when `shown` characters are revealed
    pub fn revealed(&self, shown: usize) -> Vec<(usize, String)> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| shown > line.range.start)
            .map(|(i, line)| {
                let end = line.range.end.min(shown);
                (i, self.chars[line.range.start..end].iter().collect())
            })
            .collect()
    }
}

/// Caption pixel size for a 1-10 size setting
pub fn caption_font_size(setting: f64, width: f32, height: f32) -> f32 {
    (width.min(height) as f64 * (setting * 0.01 + 0.02)).floor() as f32
}

/// Characters revealed by the typewriter animation at progress `p`
pub fn typewriter_count(len: usize, p: f64) -> usize {
    ((len as f64 * p.clamp(0.0, 1.0)).floor() as usize).min(len)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Every char advances half the font size
    pub(crate) struct FixedAdvance;

    impl Measure for FixedAdvance {
        fn measure(&self, text: &str, size: f32) -> f32 {
            text.chars().count() as f32 * size * 0.5
        }
    }

    fn lines_of(text: &str, max: f32) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let measure = |s: &str| s.chars().count() as f32;
        wrap(&chars, max, &measure)
            .into_iter()
            .map(|r| chars[r].iter().collect())
            .collect()
    }

    #[test]
    fn test_wrap_words() {
        assert_eq!(
            lines_of("the quick brown fox jumps", 10.0),
            vec!["the quick", "brown fox", "jumps"]
        );
        assert_eq!(lines_of("", 10.0), vec![""]);
    }

    #[test]
    fn test_wrap_newlines_and_long_words() {
        assert_eq!(lines_of("ab\ncd", 10.0), vec!["ab", "cd"]);
        assert_eq!(
            lines_of("abcdefghijklmnop xy", 6.0),
            vec!["abcdef", "ghijkl", "mnop", "xy"]
        );
    }

    #[test]
    fn test_wrap_never_exceeds_budget() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do \
                    eiusmod tempor incididunt ut labore et dolore magna aliqua \
                    Pneumonoultramicroscopicsilicovolcanoconiosis";
        for max in [1.0, 3.0, 7.0, 12.0, 40.0] {
            for line in lines_of(text, max) {
                assert!(line.chars().count() as f32 <= max, "{:?} > {}", line, max);
            }
        }
    }

    #[test]
    fn test_layout_within_frame() {
        let style = TextStyle {
            font_size: 10.0,
            ..TextStyle::default()
        };
        let caption = "word ".repeat(200);
        let layout = CaptionLayout::new(&caption, &style, 640.0, 360.0, &FixedAdvance).unwrap();
        assert!(layout.lines.len() >= 2);
        for line in &layout.lines {
            assert!(line.width <= 640.0 * WRAP_FRACTION);
            assert!(line.top >= 0.0);
        }
        assert_eq!(layout.font_size, 43.0);
    }

    #[test]
    fn test_layout_bottom_anchor() {
        let style = TextStyle::default();
        let layout = CaptionLayout::new("Hello", &style, 1280.0, 720.0, &FixedAdvance).unwrap();
        // floor(720 * 0.07) = 50, one line of 65 px above 0.08 * 720 padding
        assert_eq!(layout.font_size, 50.0);
        assert!((layout.lines[0].top - (720.0 - 57.6 - 65.0)).abs() < 1e-3);
        let (x, _, w, _) = layout.box_rect;
        assert!((x + w / 2.0 - 640.0).abs() < 1e-3);
        assert!(CaptionLayout::new("   ", &style, 1280.0, 720.0, &FixedAdvance).is_none());
    }

    #[test]
    fn test_alignment_anchors() {
        let style = TextStyle::default();
        let layout =
            CaptionLayout::new("aaaa bb", &style, 100.0, 1000.0, &FixedAdvance).unwrap();
        let block = layout.block_width;
        assert_eq!(layout.line_x(10.0, TextAlign::Left), 50.0 - block / 2.0);
        assert_eq!(layout.line_x(10.0, TextAlign::Center), 45.0);
        assert_eq!(layout.line_x(10.0, TextAlign::Right), 50.0 + block / 2.0 - 10.0);
    }

    #[test]
    fn test_typewriter_reveal_is_monotonic() {
        let style = TextStyle::default();
        let caption = "one two three four five six seven eight nine ten";
        let layout = CaptionLayout::new(caption, &style, 300.0, 300.0, &FixedAdvance).unwrap();
        assert!(layout.lines.len() > 1);

        let mut last = 0;
        for step in 0..=100 {
            let p = step as f64 / 100.0;
            let shown = typewriter_count(layout.char_count(), p);
            let visible: usize = layout
                .revealed(shown)
                .iter()
                .map(|(_, s)| s.chars().count())
                .sum();
            assert!(visible >= last);
            last = visible;
        }
        let full = layout.revealed(typewriter_count(layout.char_count(), 1.0));
        let texts: Vec<&str> = full.iter().map(|(_, s)| s.as_str()).collect();
        let expected: Vec<&str> = layout.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_typewriter_count() {
        assert_eq!(typewriter_count(10, 0.0), 0);
        assert_eq!(typewriter_count(10, 0.55), 5);
        assert_eq!(typewriter_count(10, 1.0), 10);
        assert_eq!(typewriter_count(10, 3.0), 10);
    }

    #[test]
    fn test_parse_families() {
        let families = parse_families("\"Open Sans\", cursive ,sans-serif");
        assert_eq!(families.len(), 3);
        assert!(matches!(families[0], fontdb::Family::Name("Open Sans")));
        assert!(matches!(families[1], fontdb::Family::Cursive));
    }
}
