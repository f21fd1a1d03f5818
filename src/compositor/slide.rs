//! One slide: image with frame styling, then its caption

use super::canvas::{contain_size, cover_scale, rounded_rect, Canvas, DrawState, Shadow};
use super::text::{typewriter_count, TextBitmap, BOX_RADIUS};
use super::Compositor;
use crate::config::{BoxStyle, FrameStyle, TextAnimation};
use crate::Color;
use resvg::tiny_skia::{Mask, PathBuilder, Rect};

/// Framed images are contain-fit into this share of the frame
const FRAMED_WIDTH: f32 = 0.8;
const FRAMED_HEIGHT: f32 = 0.7;
/// Framed images sit this share of the height above center
const FRAMED_LIFT: f32 = 0.05;
const BORDER_MARGIN: f32 = 20.0;
const POLAROID_SIDE: f32 = 0.03;
const POLAROID_BOTTOM: f32 = 0.20;
pub(super) const POLAROID_TEXT_START: f32 = 0.35;
pub(super) const POLAROID_SHRINK_STEP: f32 = 2.0;
pub(super) const POLAROID_MIN_FONT: f32 = 10.0;
pub(super) const POLAROID_INK: Color = Color::rgb(0x1a, 0x1a, 0x1a);
/// Captions appear only on slides drawn above this opacity
const CAPTION_MIN_ALPHA: f32 = 0.8;
const SLIDE_UP_TRAVEL: f32 = 100.0;

/// How one slide is placed into a frame
#[derive(Clone, Copy)]
pub(super) struct SlideDraw<'a> {
    pub alpha: f32,
    pub local_time: f64,
    pub offset_x: f32,
    pub scale: f32,
    pub clip: Option<&'a Mask>,
}

impl<'a> SlideDraw<'a> {
    pub fn new(local_time: f64, scale: f32) -> Self {
        Self {
            alpha: 1.0,
            local_time,
            offset_x: 0.0,
            scale,
            clip: None,
        }
    }

    pub fn alpha(self, alpha: f32) -> Self {
        Self { alpha, ..self }
    }

    pub fn offset(self, offset_x: f32) -> Self {
        Self { offset_x, ..self }
    }

    pub fn scale(self, scale: f32) -> Self {
        Self { scale, ..self }
    }

    pub fn clip<'b>(self, clip: &'b Mask) -> SlideDraw<'b>
    where
        'a: 'b,
    {
        SlideDraw {
            alpha: self.alpha,
            local_time: self.local_time,
            offset_x: self.offset_x,
            scale: self.scale,
            clip: Some(clip),
        }
    }
}

/// Contain-fit size of a framed image before zoom
pub(super) fn framed_size(aspect: f32, width: f32, height: f32) -> (f32, f32) {
    contain_size(aspect, width * FRAMED_WIDTH, height * FRAMED_HEIGHT)
}

/// Polaroid card margins `(side, bottom)` before zoom
pub(super) fn polaroid_margins(width: f32, height: f32) -> (f32, f32) {
    let min = width.min(height);
    (min * POLAROID_SIDE, min * POLAROID_BOTTOM)
}

impl Compositor {
    pub(super) fn draw_slide(&self, canvas: &mut Canvas, index: usize, draw: &SlideDraw) {
        if draw.alpha <= 0.0 {
            return;
        }
        let (width, height) = self.size();
        let state = DrawState::default()
            .with_clip(draw.clip)
            .translate(draw.offset_x, 0.0)
            .with_opacity(draw.alpha);
        let bitmap = self.slides[index].bitmap.as_pixmap();
        let (bw, bh) = (bitmap.width() as f32, bitmap.height() as f32);

        if self.frame_style == FrameStyle::None {
            let ratio = cover_scale(bw, bh, width, height) * draw.scale;
            let (dw, dh) = (bw * ratio, bh * ratio);
            if let Some(dest) = Rect::from_xywh((width - dw) / 2.0, (height - dh) / 2.0, dw, dh) {
                canvas.draw_bitmap(bitmap, dest, &state);
            }
        } else {
            self.draw_background(canvas, &state);
            let (base_w, base_h) = framed_size(bw / bh, width, height);
            let (dw, dh) = (base_w * draw.scale, base_h * draw.scale);
            let at = state.translate(
                (width - dw) / 2.0,
                (height - dh) / 2.0 - height * FRAMED_LIFT,
            );
            let Some(image) = Rect::from_xywh(0.0, 0.0, dw, dh) else {
                return;
            };

            match self.frame_style {
                FrameStyle::Shadow => {
                    let shadow = Shadow::new(Color::BLACK, 0.5, 30.0).offset(0.0, 15.0);
                    canvas.bitmap_shadow(bitmap, image, &shadow, &at);
                }
                FrameStyle::Border => {
                    if let Some(margin) = Rect::from_xywh(
                        -BORDER_MARGIN,
                        -BORDER_MARGIN,
                        dw + 2.0 * BORDER_MARGIN,
                        dh + 2.0 * BORDER_MARGIN,
                    ) {
                        canvas.fill_rect(margin, Color::WHITE, 1.0, &at);
                    }
                }
                FrameStyle::Polaroid => self.draw_polaroid_card(canvas, dw, dh, draw.scale, &at),
                FrameStyle::None => {}
            }
            canvas.draw_bitmap(bitmap, image, &at);

            if self.frame_style == FrameStyle::Polaroid {
                self.draw_polaroid_caption(canvas, index, (dw, dh), base_h, draw, &at);
            }
        }

        if draw.alpha > CAPTION_MIN_ALPHA && self.frame_style != FrameStyle::Polaroid {
            self.draw_caption(canvas, index, draw);
        }
    }

    fn draw_polaroid_card(
        &self,
        canvas: &mut Canvas,
        dw: f32,
        dh: f32,
        scale: f32,
        at: &DrawState,
    ) {
        let (width, height) = self.size();
        let min = width.min(height);
        let (side, bottom) = polaroid_margins(width, height);
        let (side, bottom) = (side * scale, bottom * scale);
        let Some(card) = Rect::from_xywh(-side, -side, dw + 2.0 * side, dh + side + bottom) else {
            return;
        };
        let shadow = Shadow::new(Color::BLACK, 0.3, min * 0.02).offset(0.0, min * 0.01);
        canvas.path_shadow(&PathBuilder::from_rect(card), &shadow, at);
        canvas.fill_rect(card, Color::WHITE, 1.0, at);
    }

    /// Caption in the polaroid bottom margin, in image-local coordinates
    fn draw_polaroid_caption(
        &self,
        canvas: &mut Canvas,
        index: usize,
        (dw, dh): (f32, f32),
        base_h: f32,
        draw: &SlideDraw,
        at: &DrawState,
    ) {
        let (Some(caption), Some(font)) = (&self.slides[index].polaroid, &self.fonts.polaroid)
        else {
            return;
        };
        let (width, height) = self.size();
        let (_, bottom) = polaroid_margins(width, height);

        let (size, text_y) = if self.zoom_text_with_frame {
            (caption.font_size * draw.scale, dh + bottom * draw.scale / 2.0)
        } else {
            (caption.font_size, dh / 2.0 + base_h / 2.0 + bottom / 2.0)
        };

        let shown = if self.text_animation == TextAnimation::Typewriter {
            let p = self.timeline.text_progress(draw.local_time);
            typewriter_count(caption.chars.len(), p)
        } else {
            caption.chars.len()
        };
        let text: String = caption.chars[..shown].iter().collect();
        if let Some(rendered) = font.render(&text, size, POLAROID_INK) {
            let x = dw / 2.0 - rendered.width / 2.0;
            draw_text(canvas, &rendered, x, text_y - rendered.height / 2.0, at);
        }
    }

    /// Boxed, animated caption for the non-polaroid styles
    pub(super) fn draw_caption(&self, canvas: &mut Canvas, index: usize, draw: &SlideDraw) {
        let Some(caption) = &self.slides[index].caption else {
            return;
        };
        let layout = &caption.layout;
        let style = &self.text_style;
        let (box_x, box_y, box_w, box_h) = layout.box_rect;

        let p = self.timeline.text_progress(draw.local_time);
        let ease = (1.0 - (1.0 - p).powi(3)) as f32;
        let mut state = DrawState::default()
            .with_clip(draw.clip)
            .translate(draw.offset_x, 0.0);
        match self.text_animation {
            TextAnimation::Fade => state = state.with_opacity(ease),
            TextAnimation::SlideUp => {
                state = state
                    .translate(0.0, SLIDE_UP_TRAVEL * (1.0 - ease))
                    .with_opacity(ease)
            }
            TextAnimation::Scale => {
                state = state
                    .scale_about(0.5 + 0.5 * ease, layout.center_x, box_y + box_h / 2.0)
                    .with_opacity(ease)
            }
            TextAnimation::None | TextAnimation::Typewriter => {}
        }
        let typewriter = self.text_animation == TextAnimation::Typewriter;

        if style.box_style != BoxStyle::None {
            let mut alpha = style.background_opacity.clamp(0.0, 1.0) as f32;
            if typewriter {
                alpha *= (3.0 * p).min(1.0) as f32;
            }
            let (width, _) = self.size();
            let panel = match style.box_style {
                BoxStyle::FullWidth => {
                    Rect::from_xywh(0.0, box_y, width, box_h).map(PathBuilder::from_rect)
                }
                _ => Rect::from_xywh(box_x, box_y, box_w, box_h)
                    .and_then(|rect| rounded_rect(rect, BOX_RADIUS)),
            };
            if let Some(panel) = panel {
                canvas.fill_path(&panel, style.background_color, alpha, &state);
            }
        }

        if typewriter {
            let Some(font) = &self.fonts.caption else {
                return;
            };
            let shown = typewriter_count(layout.char_count(), p);
            for (line_index, text) in layout.revealed(shown) {
                let line = &layout.lines[line_index];
                let rendered = if text.len() == line.text.len() {
                    caption.bitmaps[line_index].clone()
                } else {
                    font.render(&text, layout.font_size, style.color)
                };
                if let Some(rendered) = rendered {
                    let x = layout.line_x(rendered.width, style.alignment);
                    draw_text(canvas, &rendered, x, line.top, &state);
                }
            }
        } else {
            for (line, rendered) in layout.lines.iter().zip(&caption.bitmaps) {
                if let Some(rendered) = rendered {
                    let x = layout.line_x(line.width, style.alignment);
                    draw_text(canvas, rendered, x, line.top, &state);
                }
            }
        }
    }
}

/// Draw rasterized text with its em box top-left at `(x, top)`
fn draw_text(canvas: &mut Canvas, text: &TextBitmap, x: f32, top: f32, state: &DrawState) {
    let pixmap = text.pixmap.as_ref();
    if let Some(dest) = Rect::from_xywh(
        x - text.pad,
        top - text.pad,
        pixmap.width() as f32,
        pixmap.height() as f32,
    ) {
        canvas.draw_bitmap(pixmap, dest, state);
    }
}
