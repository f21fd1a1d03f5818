//! slidecast - Offline slideshow video renderer
//!
//! Turns a [`ProjectConfig`] (ordered slides with captions, a background
//! track and styling/animation settings) into one synchronized audio+video
//! container:
//! - `timeline`: durations, frame count and the per-frame phase
//! - `compositor`: the deterministic `frame index -> image` function
//! - `audio`: the looped/truncated 48 kHz background track
//! - `pipeline`: validation, resource preparation, encode and mux sequencing

pub mod audio;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ffi;
pub mod image_loader;
pub mod muxer;
pub mod pipeline;
pub mod timeline;

pub use config::ProjectConfig;
pub use error::{Error, Result};
pub use pipeline::{render, render_with, CancelToken, Progress, RenderOutput};
pub use timeline::{Phase, Timeline};

use serde::{Deserialize, Serialize};

/// Video codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(C)]
pub enum Codec {
    /// AV1 codec (using rav1e)
    Av1 = 0,
    /// H.264 codec (ffmpeg/libx264 process)
    H264 = 1,
}

/// Audio codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(C)]
pub enum AudioCodec {
    /// 32-bit float PCM (no compression, pure Rust)
    Pcm = 0,
    /// AAC-LC (ffmpeg process)
    Aac = 1,
    /// Opus (ffmpeg process with libopus)
    Opus = 2,
}

/// Container format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(C)]
pub enum Container {
    /// MP4 container (H.264 video, AAC audio)
    Mp4 = 0,
    /// WebM container (AV1 video, Opus audio)
    WebM = 1,
    /// Matroska container (AV1 or H.264 video, PCM, AAC or Opus audio)
    Matroska = 2,
}

impl Container {
    /// Check if the container supports the given video codec
    pub fn supports_codec(&self, codec: Codec) -> bool {
        match (self, codec) {
            (Container::Mp4, Codec::H264) => true,
            (Container::Mp4, Codec::Av1) => false,
            (Container::WebM, Codec::Av1) => true,
            (Container::WebM, Codec::H264) => false,
            (Container::Matroska, _) => true,
        }
    }

    /// Check if the container can carry an audio track in the given codec
    pub fn supports_audio(&self, codec: AudioCodec) -> bool {
        match (self, codec) {
            (Container::Mp4, AudioCodec::Aac) => true,
            (Container::Mp4, _) => false,
            (Container::WebM, AudioCodec::Opus) => true,
            (Container::WebM, _) => false,
            (Container::Matroska, _) => true,
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::WebM => "webm",
            Container::Matroska => "mkv",
        }
    }
}

/// RGB color representation
///
/// Serialized as a `#rrggbb` string in project documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(C)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `#rgb`
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().strip_prefix('#')?;
        let channel = |i: usize, len: usize| u8::from_str_radix(hex.get(i..i + len)?, 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(channel(0, 2)?, channel(2, 2)?, channel(4, 2)?)),
            3 => {
                let (r, g, b) = (channel(0, 1)?, channel(1, 1)?, channel(2, 1)?);
                Some(Self::rgb(r * 17, g * 17, b * 17))
            }
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color '{}'", value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Options for video encoding
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Output file path
    pub output_path: String,
    /// Container format
    pub container: Container,
    /// Video codec
    pub codec: Codec,
    /// Audio codec (used only when the project has a background track)
    pub audio_codec: AudioCodec,
    /// Quality (0-100, where 100 is highest quality)
    pub quality: u8,
    /// Target video bitrate in bits per second; quality-driven when absent
    pub video_bitrate: Option<u32>,
    /// Audio bitrate in bits per second (AAC and Opus)
    pub audio_bitrate: u32,
    /// Path to ffmpeg executable (H.264, AAC and audio decoding)
    pub ffmpeg_path: Option<String>,
    /// Composite independent frames on the rayon pool
    pub parallel: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            output_path: "slideshow.mkv".to_string(),
            container: Container::Matroska,
            codec: Codec::Av1,
            audio_codec: AudioCodec::Pcm,
            quality: 60,
            video_bitrate: None,
            audio_bitrate: 128_000,
            ffmpeg_path: None,
            parallel: false,
        }
    }
}

impl EncodeOptions {
    /// Validate the options against the tracks a run will produce
    pub fn validate(&self, with_audio: bool) -> Result<()> {
        if !self.container.supports_codec(self.codec) {
            return Err(Error::ContainerCodecMismatch {
                container: self.container,
                codec: self.codec,
            });
        }
        if with_audio && !self.container.supports_audio(self.audio_codec) {
            return Err(Error::ContainerAudioMismatch {
                container: self.container,
                codec: self.audio_codec,
            });
        }
        Ok(())
    }
}

/// Check if a video codec is available on the current system
pub fn available(codec: Codec, ffmpeg_path: Option<&str>) -> Result<()> {
    match codec {
        Codec::Av1 => {
            #[cfg(feature = "av1")]
            {
                Ok(())
            }
            #[cfg(not(feature = "av1"))]
            {
                Err(Error::CodecUnavailable(
                    "AV1 support not compiled in".to_string(),
                ))
            }
        }
        Codec::H264 => encoder::h264::check_available(ffmpeg_path),
    }
}

/// Check if an audio codec is available on the current system
pub fn available_audio(codec: AudioCodec, ffmpeg_path: Option<&str>) -> Result<()> {
    match codec {
        AudioCodec::Pcm => Ok(()),
        AudioCodec::Aac => encoder::aac::check_available(ffmpeg_path),
        AudioCodec::Opus => encoder::opus::check_available(ffmpeg_path),
    }
}
