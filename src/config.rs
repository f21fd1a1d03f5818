//! Project configuration
//!
//! A [`ProjectConfig`] is immutable once a run starts. It is usually loaded
//! from a JSON document; every field has a default so partial documents are
//! accepted and then checked by [`ProjectConfig::validate`].

use crate::{Color, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest allowed output edge in pixels
pub const MIN_DIMENSION: u32 = 100;
/// Largest allowed output edge in pixels
pub const MAX_DIMENSION: u32 = 3840;
/// Highest accepted frame rate
pub const MAX_FPS: u32 = 240;

/// Where an image or audio resource comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSource {
    /// File on disk (a JSON string)
    Path(PathBuf),
    /// Encoded file contents (a JSON byte array)
    Bytes(Vec<u8>),
}

impl MediaSource {
    /// Read the encoded bytes
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            MediaSource::Path(path) => std::fs::read(path),
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Short description for logs and error messages
    pub fn describe(&self) -> String {
        match self {
            MediaSource::Path(path) => path.display().to_string(),
            MediaSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }

    fn rebase(&mut self, base: &Path) {
        if let MediaSource::Path(path) = self {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// One (image, caption) unit of the slideshow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideSpec {
    pub id: String,
    pub image: Option<MediaSource>,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    Fade,
    Slide,
    Zoom,
    Wipe,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "custom")]
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStyle {
    #[default]
    None,
    Border,
    Shadow,
    Polaroid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundType {
    #[default]
    Color,
    Image,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnimation {
    #[default]
    None,
    Typewriter,
    Fade,
    SlideUp,
    Scale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntroStyle {
    #[default]
    Orbit,
    Grid,
    Chaos,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntroSource {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "first-3")]
    First3,
    #[serde(rename = "first-5")]
    First5,
    #[serde(rename = "random-5")]
    Random5,
    #[serde(rename = "custom")]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroSettings {
    pub enabled: bool,
    pub style: IntroStyle,
    /// Seconds
    pub duration: f64,
    pub source: IntroSource,
    /// Slide ids shown when `source` is custom
    pub custom_ids: Vec<String>,
    /// 0.5 - 2.0
    pub logo_scale: f64,
    /// 0.5 - 2.0
    pub image_scale: f64,
}

impl Default for IntroSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            style: IntroStyle::Orbit,
            duration: 3.0,
            source: IntroSource::All,
            custom_ids: Vec::new(),
            logo_scale: 1.0,
            image_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxStyle {
    None,
    #[default]
    Rounded,
    FullWidth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    /// CSS-style family list, e.g. `"Inter, sans-serif"`
    pub font_family: String,
    /// Explicit font file, bypasses the system font lookup
    pub font_path: Option<PathBuf>,
    /// Scale factor 1-10
    pub font_size: f64,
    pub color: Color,
    pub background_color: Color,
    /// 0-1
    pub background_opacity: f64,
    pub alignment: TextAlign,
    pub position: TextPosition,
    pub box_style: BoxStyle,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_string(),
            font_path: None,
            font_size: 5.0,
            color: Color::WHITE,
            background_color: Color::BLACK,
            background_opacity: 0.7,
            alignment: TextAlign::Center,
            position: TextPosition::Bottom,
            box_style: BoxStyle::Rounded,
        }
    }
}

/// Everything needed to render one slideshow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub slides: Vec<SlideSpec>,
    pub audio: Option<MediaSource>,
    pub transition: TransitionKind,

    pub aspect_ratio: AspectRatio,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub fps: u32,

    /// Seconds each slide is displayed, including its outgoing transition
    pub slide_duration: f64,
    pub enable_zoom: bool,
    pub zoom_text_with_frame: bool,
    pub logo: Option<MediaSource>,

    pub frame_style: FrameStyle,
    pub background_type: BackgroundType,
    pub background_color: Color,
    pub background_image: Option<MediaSource>,

    pub intro: IntroSettings,

    pub text_animation: TextAnimation,
    pub text_style: TextStyle,

    /// Seed for the random intro selection and chaos placement
    pub seed: u64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            slides: Vec::new(),
            audio: None,
            transition: TransitionKind::Fade,
            aspect_ratio: AspectRatio::Landscape,
            custom_width: None,
            custom_height: None,
            fps: 30,
            slide_duration: 3.0,
            enable_zoom: true,
            zoom_text_with_frame: true,
            logo: None,
            frame_style: FrameStyle::None,
            background_type: BackgroundType::Color,
            background_color: Color::BLACK,
            background_image: None,
            intro: IntroSettings::default(),
            text_animation: TextAnimation::None,
            text_style: TextStyle::default(),
            seed: 0,
        }
    }
}

impl ProjectConfig {
    /// Parse a project document
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("malformed project: {}", e)))
    }

    /// Load a project document; relative media paths resolve against its directory
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&json)?;
        if let Some(base) = path.parent() {
            config.rebase_paths(base);
        }
        Ok(config)
    }

    fn rebase_paths(&mut self, base: &Path) {
        for slide in &mut self.slides {
            if let Some(image) = &mut slide.image {
                image.rebase(base);
            }
        }
        for source in [&mut self.audio, &mut self.logo, &mut self.background_image]
            .into_iter()
            .flatten()
        {
            source.rebase(base);
        }
        if let Some(font) = &mut self.text_style.font_path {
            if font.is_relative() {
                *font = base.join(&*font);
            }
        }
    }

    /// Output frame size: even, clamped to [`MIN_DIMENSION`, `MAX_DIMENSION`]
    pub fn dimensions(&self) -> (u32, u32) {
        let (width, height) = match self.aspect_ratio {
            AspectRatio::Landscape => (1280, 720),
            AspectRatio::Portrait => (720, 1280),
            AspectRatio::Square => (1080, 1080),
            AspectRatio::Custom => {
                let w = self.custom_width.filter(|w| *w > 0).unwrap_or(1920);
                let h = self.custom_height.filter(|h| *h > 0).unwrap_or(1080);
                (
                    w.clamp(MIN_DIMENSION, MAX_DIMENSION),
                    h.clamp(MIN_DIMENSION, MAX_DIMENSION),
                )
            }
        };
        // Both bounds are even, so rounding down keeps the value in range
        (width & !1, height & !1)
    }

    /// Whether the run carries a background audio track
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Check every invariant, reporting all problems in one error
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.slides.is_empty() {
            problems.push("at least one slide is required".to_string());
        }

        let missing: Vec<String> = self
            .slides
            .iter()
            .enumerate()
            .filter(|(_, slide)| slide.image.is_none())
            .map(|(i, slide)| {
                if slide.id.is_empty() {
                    format!("#{}", i + 1)
                } else {
                    format!("'{}'", slide.id)
                }
            })
            .collect();
        if !missing.is_empty() {
            problems.push(format!(
                "every slide needs an image (missing: {})",
                missing.join(", ")
            ));
        }

        if self.fps == 0 || self.fps > MAX_FPS {
            problems.push(format!("fps must be within 1..={}", MAX_FPS));
        }
        if !(self.slide_duration.is_finite() && self.slide_duration > 0.0) {
            problems.push("slide duration must be a positive number of seconds".to_string());
        }
        if self.intro.enabled && !(self.intro.duration.is_finite() && self.intro.duration > 0.0) {
            problems.push("intro duration must be a positive number of seconds".to_string());
        }
        if !(0.5..=2.0).contains(&self.intro.logo_scale) {
            problems.push("intro logo scale must be within 0.5..=2.0".to_string());
        }
        if !(0.5..=2.0).contains(&self.intro.image_scale) {
            problems.push("intro image scale must be within 0.5..=2.0".to_string());
        }
        if !(1.0..=10.0).contains(&self.text_style.font_size) {
            problems.push("text size must be within 1..=10".to_string());
        }
        if !(0.0..=1.0).contains(&self.text_style.background_opacity) {
            problems.push("text background opacity must be within 0..=1".to_string());
        }
        if self.background_type == BackgroundType::Image && self.background_image.is_none() {
            problems.push("background type 'image' needs a background image".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::config(problems.join("; ")))
        }
    }
}
