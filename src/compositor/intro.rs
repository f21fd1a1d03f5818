//! Intro choreography: grid, chaos and orbit layouts around a pulsing title

use super::canvas::{circle, cover_scale, Canvas, DrawState, Shadow};
use super::Compositor;
use crate::config::{IntroSettings, IntroSource, IntroStyle, SlideSpec};
use crate::Color;
use resvg::tiny_skia::{PathBuilder, Rect};
use std::f64::consts::TAU;

/// Slides shown by the fixed-count intro sources
const FIXED_PICK: usize = 5;
const GRID_OVERLAY_ALPHA: f32 = 0.3;
const CHAOS_CARD_SIZE: f32 = 0.4;
const CHAOS_CARD_MARGIN: f32 = 10.0;
const CHAOS_MAX_ROTATION: f64 = 0.3;
const CHAOS_WOBBLE: f64 = 0.05;
const ORBIT_RADIUS: f32 = 0.35;
const ORBIT_ITEM_SIZE: f32 = 0.18;
/// Radians per second
const ORBIT_SPEED: f64 = 0.5;
const LOGO_SIZE: f32 = 0.25;
const PLACEHOLDER_SIZE: f32 = 0.1;
pub(super) const PLACEHOLDER_TEXT: &str = "VIDEO";

/// splitmix64 step
pub fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Uniform value in [0, 1)
fn unit(state: &mut u64) -> f64 {
    (splitmix64(state) >> 11) as f64 / (1u64 << 53) as f64
}

/// Indices of the slides the intro shows, in drawing order
pub fn select_slides(intro: &IntroSettings, slides: &[SlideSpec], seed: u64) -> Vec<usize> {
    let first = |n: usize| (0..slides.len().min(n)).collect::<Vec<_>>();
    match intro.source {
        IntroSource::All => first(slides.len()),
        IntroSource::First3 => first(3),
        IntroSource::First5 => first(FIXED_PICK),
        IntroSource::Random5 => {
            let mut order: Vec<usize> = (0..slides.len()).collect();
            let mut state = seed;
            for i in (1..order.len()).rev() {
                let j = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
                order.swap(i, j);
            }
            order.truncate(FIXED_PICK);
            order
        }
        IntroSource::Custom => {
            let picked: Vec<usize> = slides
                .iter()
                .enumerate()
                .filter(|(_, slide)| intro.custom_ids.contains(&slide.id))
                .map(|(i, _)| i)
                .collect();
            if picked.is_empty() {
                tracing::warn!("no custom intro slide matched, using the first five");
                first(FIXED_PICK)
            } else {
                picked
            }
        }
    }
}

/// Resting position of a chaos card
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Center as a fraction of the frame width
    pub x: f64,
    /// Center as a fraction of the frame height
    pub y: f64,
    /// Radians
    pub rotation: f64,
}

/// Placement of the `index`-th chaos card, a pure function of seed and index
pub fn chaos_placement(seed: u64, index: usize) -> Placement {
    let mut state = seed ^ (index as u64 + 1).wrapping_mul(0xD1B5_4A32_D192_ED03);
    let x = unit(&mut state);
    let y = unit(&mut state);
    let rotation = (unit(&mut state) * 2.0 - 1.0) * CHAOS_MAX_ROTATION;
    Placement { x, y, rotation }
}

impl Compositor {
    pub(super) fn draw_intro(&self, canvas: &mut Canvas, time: f64) {
        self.draw_background(canvas, &DrawState::default());
        match self.intro.style {
            IntroStyle::Grid => self.draw_grid(canvas),
            IntroStyle::Chaos => self.draw_chaos(canvas, time),
            IntroStyle::Orbit => self.draw_orbit(canvas, time),
        }
        self.draw_title(canvas, time);
    }

    fn draw_grid(&self, canvas: &mut Canvas) {
        let n = self.intro_slides.len();
        if n == 0 {
            return;
        }
        let cols = (n as f64).sqrt().ceil() as usize;
        let rows = n.div_ceil(cols);
        let (width, height) = self.size();
        let cell_w = width / cols as f32;
        let cell_h = height / rows as f32;
        let image_scale = self.intro.image_scale as f32;
        let state = DrawState::default();

        for (i, &slide) in self.intro_slides.iter().enumerate() {
            let x = (i % cols) as f32 * cell_w;
            let y = (i / cols) as f32 * cell_h;
            let Some(cell) = Rect::from_xywh(x, y, cell_w, cell_h) else {
                continue;
            };
            let bitmap = self.slides[slide].bitmap.as_pixmap();
            let (bw, bh) = (bitmap.width() as f32, bitmap.height() as f32);
            let ratio = cover_scale(bw, bh, cell_w, cell_h) * image_scale;
            let (dw, dh) = (bw * ratio, bh * ratio);
            if let Some(dest) =
                Rect::from_xywh(x + (cell_w - dw) / 2.0, y + (cell_h - dh) / 2.0, dw, dh)
            {
                canvas.fill_path_with_bitmap(&PathBuilder::from_rect(cell), bitmap, dest, &state);
            }
            canvas.fill_rect(cell, Color::BLACK, GRID_OVERLAY_ALPHA, &state);
        }
    }

    fn draw_chaos(&self, canvas: &mut Canvas, time: f64) {
        let (width, height) = self.size();
        let size = width.min(height) * CHAOS_CARD_SIZE * self.intro.image_scale as f32;
        let half = size / 2.0;
        let (Some(card), Some(inner)) = (
            Rect::from_xywh(
                -half - CHAOS_CARD_MARGIN,
                -half - CHAOS_CARD_MARGIN,
                size + 2.0 * CHAOS_CARD_MARGIN,
                size + 2.0 * CHAOS_CARD_MARGIN,
            ),
            Rect::from_xywh(-half, -half, size, size),
        ) else {
            return;
        };
        let card_path = PathBuilder::from_rect(card);
        let inner_path = PathBuilder::from_rect(inner);
        let shadow = Shadow::new(Color::BLACK, 1.0, 10.0);

        for (i, &slide) in self.intro_slides.iter().enumerate() {
            let place = chaos_placement(self.seed, i);
            let wobble = CHAOS_WOBBLE * (time * 0.5 + i as f64).sin();
            let state = DrawState::default()
                .translate(place.x as f32 * width, place.y as f32 * height)
                .rotate((place.rotation + wobble) as f32);

            canvas.path_shadow(&card_path, &shadow, &state);
            canvas.fill_rect(card, Color::WHITE, 1.0, &state);

            let bitmap = self.slides[slide].bitmap.as_pixmap();
            let (bw, bh) = (bitmap.width() as f32, bitmap.height() as f32);
            let ratio = cover_scale(bw, bh, size, size);
            let (dw, dh) = (bw * ratio, bh * ratio);
            if let Some(dest) = Rect::from_xywh(-dw / 2.0, -dh / 2.0, dw, dh) {
                canvas.fill_path_with_bitmap(&inner_path, bitmap, dest, &state);
            }
        }
    }

    fn draw_orbit(&self, canvas: &mut Canvas, time: f64) {
        let (width, height) = self.size();
        let (cx, cy) = (width / 2.0, height / 2.0);
        let min = width.min(height);
        let radius = min * ORBIT_RADIUS;
        let item = min * ORBIT_ITEM_SIZE * self.intro.image_scale as f32;
        let state = DrawState::default();

        if let Some(ring) = circle(cx, cy, radius) {
            canvas.stroke_path(&ring, Color::WHITE, 0.1, 2.0, &state);
        }

        let n = self.intro_slides.len();
        if n == 0 {
            return;
        }
        let step = TAU / n as f64;
        let shadow = Shadow::new(Color::BLACK, 0.5, 5.0).offset(0.0, 2.0);
        for (i, &slide) in self.intro_slides.iter().enumerate() {
            let angle = time * ORBIT_SPEED + i as f64 * step;
            let x = cx + radius * angle.cos() as f32;
            let y = cy + radius * angle.sin() as f32;
            let Some(thumb) = circle(x, y, item / 2.0) else {
                continue;
            };

            canvas.path_shadow(&thumb, &shadow, &state);
            let bitmap = self.slides[slide].bitmap.as_pixmap();
            let (bw, bh) = (bitmap.width() as f32, bitmap.height() as f32);
            let ratio = cover_scale(bw, bh, item, item);
            let (dw, dh) = (bw * ratio, bh * ratio);
            if let Some(dest) = Rect::from_xywh(x - dw / 2.0, y - dh / 2.0, dw, dh) {
                canvas.fill_path_with_bitmap(&thumb, bitmap, dest, &state);
            }
            canvas.stroke_path(&thumb, Color::WHITE, 1.0, 3.0, &state);
        }
    }

    /// Pulsing logo, or the placeholder title when no logo is configured
    fn draw_title(&self, canvas: &mut Canvas, time: f64) {
        let (width, height) = self.size();
        let (cx, cy) = (width / 2.0, height / 2.0);
        let min = width.min(height);
        let logo_scale = self.intro.logo_scale as f32;
        let pulse = 1.0 + 0.05 * (time * 3.0).sin() as f32;
        let state = DrawState::default();

        if let Some(logo) = &self.logo {
            let logo_w = min * LOGO_SIZE * logo_scale * pulse;
            let logo_h = logo_w / logo.aspect();
            let Some(dest) =
                Rect::from_xywh(cx - logo_w / 2.0, cy - logo_h / 2.0, logo_w, logo_h)
            else {
                return;
            };
            let shadow = Shadow::new(Color::BLACK, 0.5, 15.0);
            canvas.bitmap_shadow(logo.as_pixmap(), dest, &shadow, &state);
            canvas.draw_bitmap(logo.as_pixmap(), dest, &state);
        } else if let Some(title) = &self.intro_title {
            let pixmap = title.pixmap.as_ref();
            let Some(dest) = Rect::from_xywh(
                cx - title.width / 2.0 - title.pad,
                cy - title.height / 2.0 - title.pad,
                pixmap.width() as f32,
                pixmap.height() as f32,
            ) else {
                return;
            };
            let state = state.scale_about(pulse, cx, cy);
            let shadow = Shadow::new(Color::BLACK, 1.0, 5.0);
            canvas.bitmap_shadow(pixmap, dest, &shadow, &state);
            canvas.draw_bitmap(pixmap, dest, &state);
        }
    }
}

/// Pixel size of the placeholder title
pub(super) fn placeholder_size(min_dimension: f32, logo_scale: f64) -> f32 {
    min_dimension * PLACEHOLDER_SIZE * logo_scale as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slides(n: usize) -> Vec<SlideSpec> {
        (0..n)
            .map(|i| SlideSpec {
                id: format!("s{}", i),
                ..SlideSpec::default()
            })
            .collect()
    }

    fn settings(source: IntroSource) -> IntroSettings {
        IntroSettings {
            enabled: true,
            source,
            ..IntroSettings::default()
        }
    }

    #[test]
    fn test_fixed_sources() {
        let all = slides(8);
        assert_eq!(select_slides(&settings(IntroSource::All), &all, 0).len(), 8);
        assert_eq!(
            select_slides(&settings(IntroSource::First3), &all, 0),
            vec![0, 1, 2]
        );
        assert_eq!(
            select_slides(&settings(IntroSource::First5), &slides(2), 0),
            vec![0, 1]
        );
    }

    #[test]
    fn test_random_five_is_seeded() {
        let all = slides(12);
        let intro = settings(IntroSource::Random5);
        let a = select_slides(&intro, &all, 42);
        let b = select_slides(&intro, &all, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        let mut unique = a.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert!(a.iter().all(|&i| i < 12));
    }

    #[test]
    fn test_custom_source_and_fallback() {
        let all = slides(7);
        let mut intro = settings(IntroSource::Custom);
        intro.custom_ids = vec!["s4".into(), "s1".into(), "missing".into()];
        assert_eq!(select_slides(&intro, &all, 0), vec![1, 4]);

        intro.custom_ids = vec!["nope".into()];
        assert_eq!(select_slides(&intro, &all, 0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_chaos_placement_ranges() {
        for i in 0..50 {
            let p = chaos_placement(7, i);
            assert_eq!(p, chaos_placement(7, i));
            assert!((0.0..1.0).contains(&p.x));
            assert!((0.0..1.0).contains(&p.y));
            assert!(p.rotation.abs() <= CHAOS_MAX_ROTATION);
        }
        assert_ne!(chaos_placement(7, 0), chaos_placement(7, 1));
        assert_ne!(chaos_placement(7, 0), chaos_placement(8, 0));
    }
}
