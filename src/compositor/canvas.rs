//! Drawing surface backed by a premultiplied tiny-skia pixmap

use super::shadow;
use crate::encoder::Frame;
use crate::{Color, Error, Result};
use resvg::tiny_skia::{
    BlendMode, FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pattern, Pixmap,
    PixmapPaint, PixmapRef, Rect, SpreadMode, Stroke, Transform,
};

/// Transform, opacity and clip applied to a draw call
#[derive(Clone, Copy)]
pub struct DrawState<'a> {
    pub transform: Transform,
    pub opacity: f32,
    pub clip: Option<&'a Mask>,
}

impl Default for DrawState<'_> {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            opacity: 1.0,
            clip: None,
        }
    }
}

impl<'a> DrawState<'a> {
    pub fn translate(self, dx: f32, dy: f32) -> Self {
        Self {
            transform: self.transform.pre_translate(dx, dy),
            ..self
        }
    }

    /// Uniform scale around `(cx, cy)`
    pub fn scale_about(self, scale: f32, cx: f32, cy: f32) -> Self {
        Self {
            transform: self
                .transform
                .pre_translate(cx, cy)
                .pre_scale(scale, scale)
                .pre_translate(-cx, -cy),
            ..self
        }
    }

    pub fn rotate(self, radians: f32) -> Self {
        Self {
            transform: self
                .transform
                .pre_concat(Transform::from_rotate(radians.to_degrees())),
            ..self
        }
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self {
            opacity: self.opacity * opacity.clamp(0.0, 1.0),
            ..self
        }
    }

    pub fn with_clip<'b>(self, clip: Option<&'b Mask>) -> DrawState<'b>
    where
        'a: 'b,
    {
        DrawState {
            transform: self.transform,
            opacity: self.opacity,
            clip: clip.or(self.clip),
        }
    }

    fn visible(&self) -> bool {
        self.opacity > 0.0
    }
}

/// Blurred silhouette drawn beneath a shape
#[derive(Debug, Clone, Copy)]
pub struct Shadow {
    pub color: Color,
    pub alpha: f32,
    /// Blur extent in pixels; the Gaussian sigma is half of it
    pub blur: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Shadow {
    pub fn new(color: Color, alpha: f32, blur: f32) -> Self {
        Self {
            color,
            alpha,
            blur,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn offset(self, offset_x: f32, offset_y: f32) -> Self {
        Self {
            offset_x,
            offset_y,
            ..self
        }
    }
}

/// One output frame being composited
pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            Error::InvalidInput(format!("invalid canvas size {}x{}", width, height))
        })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Premultiplied RGBA pixels
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn fill(&mut self, color: Color) {
        self.pixmap.fill(resvg::tiny_skia::Color::from_rgba8(
            color.r, color.g, color.b, 255,
        ));
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color, alpha: f32, state: &DrawState) {
        if !state.visible() {
            return;
        }
        let paint = solid(color, alpha * state.opacity);
        self.pixmap
            .fill_rect(rect, &paint, state.transform, state.clip);
    }

    pub fn fill_path(&mut self, path: &Path, color: Color, alpha: f32, state: &DrawState) {
        if !state.visible() {
            return;
        }
        let paint = solid(color, alpha * state.opacity);
        self.pixmap.fill_path(
            path,
            &paint,
            FillRule::Winding,
            state.transform,
            state.clip,
        );
    }

    pub fn stroke_path(
        &mut self,
        path: &Path,
        color: Color,
        alpha: f32,
        width: f32,
        state: &DrawState,
    ) {
        if !state.visible() {
            return;
        }
        let paint = solid(color, alpha * state.opacity);
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(path, &paint, &stroke, state.transform, state.clip);
    }

    /// Draw `bitmap` stretched over `dest`
    pub fn draw_bitmap(&mut self, bitmap: PixmapRef, dest: Rect, state: &DrawState) {
        if !state.visible() {
            return;
        }
        let paint = PixmapPaint {
            opacity: state.opacity,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Bilinear,
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            bitmap,
            &paint,
            place(bitmap, dest, state.transform),
            state.clip,
        );
    }

    /// Draw `bitmap` stretched over `dest`, visible only inside `shape`
    pub fn fill_path_with_bitmap(
        &mut self,
        shape: &Path,
        bitmap: PixmapRef,
        dest: Rect,
        state: &DrawState,
    ) {
        if !state.visible() {
            return;
        }
        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.shader = Pattern::new(
            bitmap,
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            state.opacity,
            place(bitmap, dest, Transform::identity()),
        );
        self.pixmap.fill_path(
            shape,
            &paint,
            FillRule::Winding,
            state.transform,
            state.clip,
        );
    }

    /// Shadow of a filled path
    pub fn path_shadow(&mut self, path: &Path, shadow: &Shadow, state: &DrawState) {
        if !state.visible() || shadow.alpha <= 0.0 {
            return;
        }
        let Some(bounds) = path.clone().transform(state.transform).map(|p| p.bounds()) else {
            return;
        };
        let layer = shadow::cast(
            bounds,
            shadow,
            (self.width(), self.height()),
            state.transform,
            |pixmap, transform| {
                pixmap.fill_path(
                    path,
                    &solid(Color::BLACK, 1.0),
                    FillRule::Winding,
                    transform,
                    None,
                );
            },
        );
        if let Some(layer) = layer {
            self.composite_shadow(layer, state);
        }
    }

    /// Shadow of a bitmap's alpha channel, as drawn by [`Canvas::draw_bitmap`]
    pub fn bitmap_shadow(
        &mut self,
        bitmap: PixmapRef,
        dest: Rect,
        shadow: &Shadow,
        state: &DrawState,
    ) {
        if !state.visible() || shadow.alpha <= 0.0 {
            return;
        }
        let Some(bounds) = dest.transform(state.transform) else {
            return;
        };
        let layer = shadow::cast(
            bounds,
            shadow,
            (self.width(), self.height()),
            state.transform,
            |pixmap, transform| {
                pixmap.draw_pixmap(
                    0,
                    0,
                    bitmap,
                    &PixmapPaint::default(),
                    place(bitmap, dest, transform),
                    None,
                );
            },
        );
        if let Some(layer) = layer {
            self.composite_shadow(layer, state);
        }
    }

    fn composite_shadow(&mut self, layer: shadow::ShadowLayer, state: &DrawState) {
        let paint = PixmapPaint {
            opacity: state.opacity,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Bilinear,
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            layer.pixmap.as_ref(),
            &paint,
            Transform::from_translate(layer.x, layer.y),
            state.clip,
        );
    }

    /// Clip mask covering `path` under `transform`
    pub fn clip_mask(&self, path: &Path, transform: Transform) -> Result<Mask> {
        let mut mask = Mask::new(self.width(), self.height())
            .ok_or_else(|| Error::InvalidInput("invalid clip size".to_string()))?;
        mask.fill_path(path, FillRule::Winding, true, transform);
        Ok(mask)
    }

    /// Straight-alpha RGBA pixels
    pub fn into_rgba(self) -> Vec<u8> {
        let mut data = self.pixmap.take();
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u16;
            if a == 0 || a == 255 {
                continue;
            }
            px[0] = ((px[0] as u16 * 255 + a / 2) / a).min(255) as u8;
            px[1] = ((px[1] as u16 * 255 + a / 2) / a).min(255) as u8;
            px[2] = ((px[2] as u16 * 255 + a / 2) / a).min(255) as u8;
        }
        data
    }

    pub fn into_frame(self, timestamp_us: i64) -> Frame {
        let (width, height) = (self.width(), self.height());
        Frame {
            width,
            height,
            data: self.into_rgba(),
            timestamp_us,
        }
    }

    pub fn into_image(self) -> Result<image::RgbaImage> {
        let (width, height) = (self.width(), self.height());
        image::RgbaImage::from_raw(width, height, self.into_rgba())
            .ok_or_else(|| Error::Encode("frame buffer size mismatch".to_string()))
    }
}

fn place(bitmap: PixmapRef, dest: Rect, transform: Transform) -> Transform {
    transform.pre_translate(dest.x(), dest.y()).pre_scale(
        dest.width() / bitmap.width() as f32,
        dest.height() / bitmap.height() as f32,
    )
}

fn solid(color: Color, alpha: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(
        color.r,
        color.g,
        color.b,
        (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
    );
    paint.anti_alias = true;
    paint
}

/// Rectangle with circular corners of `radius`
pub fn rounded_rect(rect: Rect, radius: f32) -> Option<Path> {
    let r = radius.min(rect.width() / 2.0).min(rect.height() / 2.0);
    if r <= 0.0 {
        return Some(PathBuilder::from_rect(rect));
    }
    // cubic Bezier handle length for a quarter circle
    const K: f32 = 0.552_284_8;
    let (l, t, rt, b) = (rect.left(), rect.top(), rect.right(), rect.bottom());
    let h = r * (1.0 - K);

    let mut pb = PathBuilder::new();
    pb.move_to(l + r, t);
    pb.line_to(rt - r, t);
    pb.cubic_to(rt - h, t, rt, t + h, rt, t + r);
    pb.line_to(rt, b - r);
    pb.cubic_to(rt, b - h, rt - h, b, rt - r, b);
    pb.line_to(l + r, b);
    pb.cubic_to(l + h, b, l, b - h, l, b - r);
    pb.line_to(l, t + r);
    pb.cubic_to(l, t + h, l + h, t, l + r, t);
    pb.close();
    pb.finish()
}

pub fn circle(cx: f32, cy: f32, radius: f32) -> Option<Path> {
    PathBuilder::from_circle(cx, cy, radius)
}

/// Scale that makes `(src_w, src_h)` fill `(dst_w, dst_h)`, cropping overflow
pub fn cover_scale(src_w: f32, src_h: f32, dst_w: f32, dst_h: f32) -> f32 {
    (dst_w / src_w).max(dst_h / src_h)
}

/// Largest size with `aspect` (width / height) that fits inside `(max_w, max_h)`
pub fn contain_size(aspect: f32, max_w: f32, max_h: f32) -> (f32, f32) {
    let (w, h) = (max_w, max_w / aspect);
    if h > max_h {
        (max_h * aspect, max_h)
    } else {
        (w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_helpers() {
        assert_eq!(cover_scale(100.0, 50.0, 200.0, 200.0), 4.0);
        assert_eq!(contain_size(2.0, 800.0, 600.0), (800.0, 400.0));
        assert_eq!(contain_size(0.5, 800.0, 600.0), (300.0, 600.0));
    }

    #[test]
    fn test_fill_and_rect() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas.fill(Color::rgb(10, 20, 30));
        let rect = Rect::from_xywh(0.0, 0.0, 2.0, 4.0).unwrap();
        canvas.fill_rect(rect, Color::WHITE, 1.0, &DrawState::default());
        let data = canvas.into_rgba();
        assert_eq!(&data[0..4], &[255, 255, 255, 255]);
        assert_eq!(&data[12..16], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_zero_opacity_draws_nothing() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas.fill(Color::BLACK);
        let before = canvas.data().to_vec();
        let rect = Rect::from_xywh(0.0, 0.0, 4.0, 4.0).unwrap();
        let state = DrawState::default().with_opacity(0.0);
        canvas.fill_rect(rect, Color::WHITE, 1.0, &state);
        assert_eq!(canvas.data(), &before[..]);
    }

    #[test]
    fn test_rounded_rect_bounds() {
        let rect = Rect::from_xywh(10.0, 20.0, 100.0, 40.0).unwrap();
        let path = rounded_rect(rect, 12.0).unwrap();
        let bounds = path.bounds();
        assert!((bounds.left() - 10.0).abs() < 1e-3);
        assert!((bounds.bottom() - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_shadow_darkens_outside_shape() {
        let mut canvas = Canvas::new(60, 60).unwrap();
        canvas.fill(Color::WHITE);
        let path = PathBuilder::from_rect(Rect::from_xywh(20.0, 20.0, 20.0, 20.0).unwrap());
        let shadow = Shadow::new(Color::BLACK, 1.0, 10.0).offset(0.0, 5.0);
        canvas.path_shadow(&path, &shadow, &DrawState::default());
        let data = canvas.into_rgba();
        // just below the shape, inside the blurred halo
        let below = (43 * 60 + 30) * 4;
        assert!(data[below] < 255);
        // far corner stays untouched
        assert_eq!(data[0], 255);
    }
}
