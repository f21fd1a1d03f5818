//! Compositing engine: the deterministic `frame index -> image` function
//!
//! A [`Compositor`] owns everything a frame needs (normalized bitmaps,
//! resolved fonts, pre-laid-out captions) and is immutable after
//! construction, so frames may be rendered from any number of threads,
//! each on its own [`Canvas`].

pub mod canvas;
mod intro;
mod shadow;
mod slide;
pub mod text;

pub use canvas::Canvas;
pub use intro::{chaos_placement, select_slides, splitmix64, Placement};

use crate::config::{
    BackgroundType, FrameStyle, IntroSettings, ProjectConfig, TextAnimation, TextStyle,
    TransitionKind,
};
use crate::encoder::Frame;
use crate::image_loader::NormalizedBitmap;
use crate::timeline::{Phase, Timeline};
use crate::{Color, Error, Result};
use canvas::{cover_scale, DrawState};
use resvg::tiny_skia::{PathBuilder, Rect};
use slide::SlideDraw;
use std::sync::Arc;
use text::{CaptionLayout, FontNeeds, Fonts, Measure, TextBitmap};

/// Corner logo box relative to the shorter frame edge
const CORNER_LOGO_SIZE: f32 = 0.12;
const CORNER_LOGO_PADDING: f32 = 0.05;
/// Zoom reached at the end of a slide when continuous zoom is on
const ZOOM_GROWTH: f64 = 0.05;

/// Smoothstep-style quadratic ease used by every transition
pub fn ease_in_out_quad(p: f64) -> f64 {
    if p < 0.5 {
        2.0 * p * p
    } else {
        1.0 - (-2.0 * p + 2.0).powi(2) / 2.0
    }
}

/// Decoded images for one run
#[derive(Debug, Clone)]
pub struct Resources {
    /// One bitmap per slide, in slide order
    pub slides: Vec<Arc<NormalizedBitmap>>,
    pub logo: Option<Arc<NormalizedBitmap>>,
    pub background: Option<Arc<NormalizedBitmap>>,
}

impl Resources {
    /// Decode every image `config` references
    ///
    /// `on_image(i, n)` is called before the `i`-th of `n` slide images is
    /// decoded. Any decode failure aborts the load.
    pub fn load(config: &ProjectConfig, mut on_image: impl FnMut(usize, usize)) -> Result<Self> {
        let (width, height) = config.dimensions();
        let max_dimension = width.max(height);

        let total = config.slides.len();
        let mut slides = Vec::with_capacity(total);
        for (i, slide) in config.slides.iter().enumerate() {
            on_image(i + 1, total);
            let source = slide.image.as_ref().ok_or_else(|| {
                Error::config(format!("slide '{}' has no image", slide.id))
            })?;
            let bitmap = NormalizedBitmap::from_source(source, max_dimension)?;
            tracing::debug!(
                slide = %slide.id,
                width = bitmap.width(),
                height = bitmap.height(),
                "normalized slide image"
            );
            slides.push(Arc::new(bitmap));
        }

        let logo = config
            .logo
            .as_ref()
            .map(|source| NormalizedBitmap::from_source(source, max_dimension / 4).map(Arc::new))
            .transpose()?;

        let background = match (&config.background_type, &config.background_image) {
            (BackgroundType::Image, Some(source)) => Some(Arc::new(
                NormalizedBitmap::from_source(source, max_dimension)?,
            )),
            _ => None,
        };

        Ok(Self {
            slides,
            logo,
            background,
        })
    }
}

/// Pre-rendered caption of a non-polaroid slide
struct Caption {
    layout: CaptionLayout,
    /// One bitmap per layout line; `None` for blank lines
    bitmaps: Vec<Option<TextBitmap>>,
}

/// Polaroid caption after the shrink-to-fit pass
struct PolaroidCaption {
    chars: Vec<char>,
    font_size: f32,
}

struct SlideAssets {
    bitmap: Arc<NormalizedBitmap>,
    caption: Option<Caption>,
    polaroid: Option<PolaroidCaption>,
}

/// Renders any frame of one project
pub struct Compositor {
    width: u32,
    height: u32,
    timeline: Timeline,
    transition: TransitionKind,
    enable_zoom: bool,
    zoom_text_with_frame: bool,
    frame_style: FrameStyle,
    background_color: Color,
    background: Option<Arc<NormalizedBitmap>>,
    text_animation: TextAnimation,
    text_style: TextStyle,
    intro: IntroSettings,
    intro_slides: Vec<usize>,
    seed: u64,
    slides: Vec<SlideAssets>,
    logo: Option<Arc<NormalizedBitmap>>,
    fonts: Fonts,
    intro_title: Option<TextBitmap>,
}

impl Compositor {
    /// Prepare fonts and caption layouts for `config` over decoded `resources`
    pub fn new(config: &ProjectConfig, resources: Resources) -> Result<Self> {
        if resources.slides.len() != config.slides.len() {
            return Err(Error::InvalidInput(format!(
                "{} slide images for {} slides",
                resources.slides.len(),
                config.slides.len()
            )));
        }
        let (width, height) = config.dimensions();
        let (w, h) = (width as f32, height as f32);

        let has_captions = config.slides.iter().any(|s| !s.caption.trim().is_empty());
        let polaroid = config.frame_style == FrameStyle::Polaroid;
        let needs = FontNeeds {
            caption: has_captions && !polaroid,
            polaroid: has_captions && polaroid,
            intro: config.intro.enabled && resources.logo.is_none(),
        };
        let fonts = Fonts::resolve(&config.text_style, needs)?;

        let slides = config
            .slides
            .iter()
            .zip(resources.slides)
            .map(|(spec, bitmap)| {
                let caption = fonts.caption.as_ref().and_then(|font| {
                    prepare_caption(&spec.caption, &config.text_style, w, h, font)
                });
                let polaroid = fonts.polaroid.as_ref().and_then(|font| {
                    fit_polaroid_caption(&spec.caption, bitmap.aspect(), w, h, font)
                });
                SlideAssets {
                    bitmap,
                    caption,
                    polaroid,
                }
            })
            .collect();

        let intro_title = fonts.intro.as_ref().and_then(|font| {
            let size = intro::placeholder_size(w.min(h), config.intro.logo_scale);
            font.render(intro::PLACEHOLDER_TEXT, size, Color::WHITE)
        });

        let intro_slides = if config.intro.enabled {
            select_slides(&config.intro, &config.slides, config.seed)
        } else {
            Vec::new()
        };

        Ok(Self {
            width,
            height,
            timeline: Timeline::new(config),
            transition: config.transition,
            enable_zoom: config.enable_zoom,
            zoom_text_with_frame: config.zoom_text_with_frame,
            frame_style: config.frame_style,
            background_color: config.background_color,
            background: resources.background,
            text_animation: config.text_animation,
            text_style: config.text_style.clone(),
            intro: config.intro.clone(),
            intro_slides,
            seed: config.seed,
            slides,
            logo: resources.logo,
            fonts,
            intro_title,
        })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Output `(width, height)` in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Slides shown by the intro, in drawing order
    pub fn intro_slides(&self) -> &[usize] {
        &self.intro_slides
    }

    /// Composite frame `index`, timestamped for the encoder
    pub fn render_frame(&self, index: u64) -> Result<Frame> {
        if index >= self.timeline.total_frames {
            return Err(Error::InvalidInput(format!(
                "frame {} is past the end ({} frames)",
                index, self.timeline.total_frames
            )));
        }
        let canvas = self.render_phase(self.timeline.phase(index))?;
        Ok(canvas.into_frame(self.timeline.timestamp_us(index)))
    }

    /// Composite one phase of the timeline
    pub fn render_phase(&self, phase: Phase) -> Result<Canvas> {
        let mut canvas = Canvas::new(self.width, self.height)?;
        canvas.fill(self.background_color);

        match phase {
            Phase::Intro { time, crossfade } => {
                self.draw_intro(&mut canvas, time);
                let Some(fade) = crossfade else {
                    // the corner logo belongs to slide content
                    return Ok(canvas);
                };
                if !self.slides.is_empty() {
                    // first slide fades in while easing out of a slight zoom
                    let fade = fade as f32;
                    let draw = SlideDraw::new(0.0, 1.0 + 0.05 * (1.0 - fade)).alpha(fade);
                    self.draw_slide(&mut canvas, 0, &draw);
                }
            }
            Phase::Slide { index, local_time } => {
                let draw = SlideDraw::new(local_time, self.zoom_base(local_time));
                self.draw_slide(&mut canvas, index, &draw);
            }
            Phase::Transition {
                from,
                to,
                local_time,
                progress,
            } => self.draw_transition(&mut canvas, from, to, local_time, progress)?,
        }

        self.draw_corner_logo(&mut canvas);
        Ok(canvas)
    }

    fn draw_transition(
        &self,
        canvas: &mut Canvas,
        from: usize,
        to: usize,
        local_time: f64,
        progress: f64,
    ) -> Result<()> {
        let (width, height) = self.size();
        let ease = ease_in_out_quad(progress) as f32;
        let zoom_base = self.zoom_base(local_time);
        let current = SlideDraw::new(local_time, zoom_base);
        let next = SlideDraw::new(0.0, 1.0);

        match self.transition {
            TransitionKind::Fade => {
                self.draw_slide(canvas, from, &current);
                self.draw_slide(canvas, to, &next.alpha(ease));
            }
            TransitionKind::Slide => {
                self.draw_slide(canvas, from, &current.offset(-width * ease));
                self.draw_slide(canvas, to, &next.offset(width - width * ease));
            }
            TransitionKind::Zoom => {
                self.draw_slide(
                    canvas,
                    from,
                    &current.alpha(1.0 - ease).scale(zoom_base + ease),
                );
                self.draw_slide(canvas, to, &next.alpha(ease).scale(0.5 + 0.5 * ease));
            }
            TransitionKind::Wipe => {
                self.draw_slide(canvas, from, &current);
                if ease >= 1.0 {
                    self.draw_slide(canvas, to, &next);
                } else if let Some(reveal) = Rect::from_xywh(0.0, 0.0, width * ease, height) {
                    let mask = canvas.clip_mask(
                        &PathBuilder::from_rect(reveal),
                        resvg::tiny_skia::Transform::identity(),
                    )?;
                    self.draw_slide(canvas, to, &next.clip(&mask));
                }
            }
        }
        Ok(())
    }

    fn zoom_base(&self, local_time: f64) -> f32 {
        if self.enable_zoom {
            (1.0 + ZOOM_GROWTH * (local_time / self.timeline.slide_duration)) as f32
        } else {
            1.0
        }
    }

    fn size(&self) -> (f32, f32) {
        (self.width as f32, self.height as f32)
    }

    /// Full-frame background color or cover-fit background image
    fn draw_background(&self, canvas: &mut Canvas, state: &DrawState) {
        let (width, height) = self.size();
        match &self.background {
            Some(image) => {
                let pixmap = image.as_pixmap();
                let (bw, bh) = (pixmap.width() as f32, pixmap.height() as f32);
                let ratio = cover_scale(bw, bh, width, height);
                let (dw, dh) = (bw * ratio, bh * ratio);
                if let Some(dest) =
                    Rect::from_xywh((width - dw) / 2.0, (height - dh) / 2.0, dw, dh)
                {
                    canvas.draw_bitmap(pixmap, dest, state);
                }
            }
            None => {
                if let Some(full) = Rect::from_xywh(0.0, 0.0, width, height) {
                    canvas.fill_rect(full, self.background_color, 1.0, state);
                }
            }
        }
    }

    fn draw_corner_logo(&self, canvas: &mut Canvas) {
        let Some(logo) = &self.logo else {
            return;
        };
        let (width, height) = self.size();
        let min = width.min(height);
        let size = min * CORNER_LOGO_SIZE;
        let padding = min * CORNER_LOGO_PADDING;
        let (dw, dh) = canvas::contain_size(logo.aspect(), size, size);
        if let Some(dest) = Rect::from_xywh(width - dw - padding, padding, dw, dh) {
            canvas.draw_bitmap(logo.as_pixmap(), dest, &DrawState::default());
        }
    }
}

fn prepare_caption(
    caption: &str,
    style: &TextStyle,
    width: f32,
    height: f32,
    font: &text::FontFace,
) -> Option<Caption> {
    let layout = CaptionLayout::new(caption, style, width, height, font)?;
    let bitmaps = layout
        .lines
        .iter()
        .map(|line| font.render(&line.text, layout.font_size, style.color))
        .collect();
    Some(Caption { layout, bitmaps })
}

/// Shrink the polaroid caption until it fits the card width
fn fit_polaroid_caption(
    caption: &str,
    aspect: f32,
    width: f32,
    height: f32,
    measure: &dyn Measure,
) -> Option<PolaroidCaption> {
    let text = caption.trim();
    if text.is_empty() {
        return None;
    }
    let (side, bottom) = slide::polaroid_margins(width, height);
    let (image_w, _) = slide::framed_size(aspect, width, height);
    let budget = image_w + side * 0.5;

    let mut font_size = bottom * slide::POLAROID_TEXT_START;
    while measure.measure(text, font_size) > budget && font_size > slide::POLAROID_MIN_FONT {
        font_size -= slide::POLAROID_SHRINK_STEP;
    }
    Some(PolaroidCaption {
        chars: text.chars().collect(),
        font_size,
    })
}
