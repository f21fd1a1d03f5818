//! Encoder collaborators
//!
//! Video: AV1 through rav1e, H.264 through an ffmpeg child process.
//! Audio: float PCM in pure Rust, AAC-LC and Opus through ffmpeg child processes.

pub mod aac;
#[cfg(feature = "av1")]
pub mod av1;
pub mod h264;
pub mod opus;
pub mod pcm;
mod process;

use crate::audio::AudioBlock;
use crate::{AudioCodec, Codec, Error, Result};
use std::process::{Command, Stdio};

/// Raw video frame in RGBA format
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Straight-alpha RGBA pixel data (width * height * 4 bytes)
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
}

/// Encoded video or audio unit
#[derive(Debug, Clone)]
pub struct Packet {
    /// Encoded data
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Duration in microseconds
    pub duration_us: i64,
    /// Is this a keyframe?
    pub is_keyframe: bool,
}

/// Video encoder trait
pub trait VideoEncoder: Send {
    /// Encode a frame; packets come out in presentation order
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>>;

    /// Flush remaining packets
    fn flush(&mut self) -> Result<Vec<Packet>>;

    /// Get the codec-specific configuration data (SPS for H.264)
    fn codec_config(&self) -> Option<Vec<u8>> {
        None
    }

    /// Get the Picture Parameter Set (PPS for H.264)
    fn pps(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Audio encoder trait
pub trait AudioEncoder: Send {
    /// Encode one planar block
    fn encode(&mut self, block: AudioBlock) -> Result<Vec<Packet>>;

    /// Flush remaining packets
    fn flush(&mut self) -> Result<Vec<Packet>>;

    /// Decoder configuration the container stores with the track
    fn codec_private(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Video encoder configuration
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub codec: Codec,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: u32,
    /// Quality (0-100)
    pub quality: u8,
    /// Target bitrate in bits per second; overrides `quality` when set
    pub bitrate: Option<u32>,
}

impl VideoConfig {
    /// Nominal frame duration in microseconds
    pub fn frame_duration_us(&self) -> i64 {
        (1_000_000.0 / self.fps.max(1) as f64).round() as i64
    }
}

/// Audio encoder configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per second (AAC and Opus)
    pub bitrate: u32,
}

/// Create a video encoder for `config.codec`
pub fn create_video_encoder(
    config: &VideoConfig,
    ffmpeg_path: Option<&str>,
) -> Result<Box<dyn VideoEncoder>> {
    if config.width % 2 != 0 || config.height % 2 != 0 {
        return Err(Error::InvalidInput(format!(
            "frame size {}x{} must be even",
            config.width, config.height
        )));
    }
    match config.codec {
        #[cfg(feature = "av1")]
        Codec::Av1 => Ok(Box::new(av1::Av1Encoder::new(config.clone())?)),
        #[cfg(not(feature = "av1"))]
        Codec::Av1 => Err(Error::CodecUnavailable(
            "AV1 support not compiled in".to_string(),
        )),
        Codec::H264 => Ok(Box::new(h264::FfmpegEncoder::new(
            config.clone(),
            ffmpeg_path,
        )?)),
    }
}

/// Create an audio encoder for `config.codec`
pub fn create_audio_encoder(
    config: &AudioConfig,
    ffmpeg_path: Option<&str>,
) -> Result<Box<dyn AudioEncoder>> {
    match config.codec {
        AudioCodec::Pcm => Ok(Box::new(pcm::PcmEncoder::new(config.clone()))),
        AudioCodec::Aac => Ok(Box::new(aac::AacEncoder::new(config.clone(), ffmpeg_path)?)),
        AudioCodec::Opus => Ok(Box::new(opus::OpusEncoder::new(
            config.clone(),
            ffmpeg_path,
        )?)),
    }
}

/// Find ffmpeg executable
pub(crate) fn find_ffmpeg(custom_path: Option<&str>) -> Result<String> {
    if let Some(path) = custom_path {
        if std::path::Path::new(path).exists() {
            return Ok(path.to_string());
        }
        return Err(Error::Ffmpeg(format!("FFmpeg not found at: {}", path)));
    }

    let paths = ["ffmpeg", "/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg"];

    for path in paths {
        if Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
        {
            return Ok(path.to_string());
        }
    }

    Err(Error::CodecUnavailable(
        "FFmpeg not found in PATH".to_string(),
    ))
}

/// ffprobe next to `ffmpeg`, or the one on PATH
pub(crate) fn find_ffprobe(ffmpeg: &str) -> String {
    let path = std::path::Path::new(ffmpeg);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling.display().to_string();
        }
    }
    "ffprobe".to_string()
}

/// Check that `ffmpeg -encoders` lists `encoder`
pub(crate) fn check_ffmpeg_encoder(ffmpeg_path: Option<&str>, encoder: &str) -> Result<()> {
    let ffmpeg = find_ffmpeg(ffmpeg_path)?;

    let output = Command::new(&ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| Error::Ffmpeg(format!("Failed to run ffmpeg: {}", e)))?;

    let encoders = String::from_utf8_lossy(&output.stdout);
    let listed = encoders
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(encoder));
    if listed {
        Ok(())
    } else {
        Err(Error::CodecUnavailable(format!(
            "FFmpeg does not have {} support",
            encoder
        )))
    }
}
