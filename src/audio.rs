//! Background audio track rendering
//!
//! The source track is decoded once through an ffmpeg child process into
//! 48 kHz float PCM at its native channel count, then looped or truncated
//! into a planar buffer that spans exactly the video's duration.
//!
//! ffmpeg always reads from a file. Inline bytes are spooled to a temporary
//! file first, since MP4/M4A files with a trailing `moov` box cannot be
//! demuxed from a pipe.

use crate::config::MediaSource;
use crate::encoder::{find_ffmpeg, find_ffprobe};
use crate::timeline::SAMPLE_RATE;
use crate::{Error, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Samples per channel in one block handed to the audio encoder (100 ms)
pub const BLOCK_FRAMES: usize = SAMPLE_RATE as usize / 10;

/// Most channels an output track may carry
pub const MAX_CHANNELS: u16 = 8;

/// Decoded interleaved float PCM, as produced by ffmpeg
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved: Vec<f32>,
}

impl DecodedAudio {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.interleaved.len() / self.channels.max(1) as usize
    }
}

/// Rendered multichannel track, one plane per channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    planes: Vec<Vec<f32>>,
}

/// A timestamped run of planar samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Presentation timestamp of the first sample in microseconds
    pub timestamp_us: i64,
    pub sample_rate: u32,
    /// One plane per channel, all the same length
    pub planes: Vec<Vec<f32>>,
}

impl AudioBlock {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Duration in microseconds
    pub fn duration_us(&self) -> i64 {
        (self.frames() as f64 * 1_000_000.0 / self.sample_rate as f64).round() as i64
    }

    /// Interleave the planes into `L R L R ...` order
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels());
        for i in 0..frames {
            for plane in &self.planes {
                out.push(plane[i]);
            }
        }
        out
    }
}

impl AudioBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn plane(&self, channel: usize) -> Option<&[f32]> {
        self.planes.get(channel).map(Vec::as_slice)
    }

    /// Number of blocks [`AudioBuffer::blocks`] yields
    pub fn block_count(&self, block_frames: usize) -> usize {
        self.len().div_ceil(block_frames.max(1))
    }

    /// Split the track into consecutive blocks of at most `block_frames` samples
    pub fn blocks(&self, block_frames: usize) -> impl Iterator<Item = AudioBlock> + '_ {
        let block_frames = block_frames.max(1);
        let sample_rate = self.sample_rate;
        (0..self.block_count(block_frames)).map(move |index| {
            let start = index * block_frames;
            let end = (start + block_frames).min(self.len());
            AudioBlock {
                timestamp_us: (start as f64 * 1_000_000.0 / sample_rate as f64).round() as i64,
                sample_rate,
                planes: self
                    .planes
                    .iter()
                    .map(|plane| plane[start..end].to_vec())
                    .collect(),
            }
        })
    }
}

/// Decode `source` and render it into exactly `sample_count` samples per channel
#[tracing::instrument(skip(source, ffmpeg_path), fields(source = %source.describe()))]
pub fn render_track(
    source: &MediaSource,
    sample_count: usize,
    ffmpeg_path: Option<&str>,
) -> Result<AudioBuffer> {
    let decoded = decode_source(source, ffmpeg_path)
        .map_err(|e| Error::audio(format!("{}: {}", source.describe(), detail(e))))?;
    tracing::debug!(
        channels = decoded.channels,
        frames = decoded.frames(),
        "decoded background track"
    );
    loop_to_length(&decoded, sample_count)
}

/// Loop or truncate decoded audio into a planar buffer of `sample_count` samples
pub fn loop_to_length(decoded: &DecodedAudio, sample_count: usize) -> Result<AudioBuffer> {
    let channels = decoded.channels as usize;
    let source_frames = decoded.frames();
    if channels == 0 || source_frames == 0 {
        return Err(Error::audio("decoded track contains no samples"));
    }

    let planes = (0..channels)
        .map(|channel| {
            (0..sample_count)
                .map(|i| decoded.interleaved[(i % source_frames) * channels + channel])
                .collect()
        })
        .collect();

    Ok(AudioBuffer {
        sample_rate: decoded.sample_rate,
        planes,
    })
}

/// Decode a path or inline bytes to 48 kHz interleaved float PCM
pub fn decode_source(source: &MediaSource, ffmpeg_path: Option<&str>) -> Result<DecodedAudio> {
    match source {
        MediaSource::Path(path) => decode_file(path, ffmpeg_path),
        MediaSource::Bytes(bytes) => decode(bytes, ffmpeg_path),
    }
}

/// Decode encoded audio bytes to 48 kHz interleaved float PCM
pub fn decode(bytes: &[u8], ffmpeg_path: Option<&str>) -> Result<DecodedAudio> {
    let mut spool = tempfile::Builder::new().prefix("slidecast-audio-").tempfile()?;
    spool.write_all(bytes)?;
    spool.flush()?;
    decode_file(spool.path(), ffmpeg_path)
}

/// Decode an audio file to 48 kHz interleaved float PCM
pub fn decode_file(path: &Path, ffmpeg_path: Option<&str>) -> Result<DecodedAudio> {
    let ffmpeg = find_ffmpeg(ffmpeg_path)?;
    let channels = channel_count(&find_ffprobe(&ffmpeg), path)?;

    let output = run(Command::new(&ffmpeg)
        .args(["-nostdin", "-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            &channels.to_string(),
            "-ar",
            &SAMPLE_RATE.to_string(),
            "pipe:1",
        ]))?;

    if !output.status.success() {
        return Err(Error::audio(format!(
            "ffmpeg could not decode the track: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(DecodedAudio {
        sample_rate: SAMPLE_RATE,
        channels,
        interleaved: parse_f32le(&output.stdout)?,
    })
}

fn channel_count(ffprobe: &str, path: &Path) -> Result<u16> {
    #[derive(Deserialize)]
    struct StreamInfo {
        codec_type: Option<String>,
        channels: Option<u16>,
    }
    #[derive(Deserialize)]
    struct StreamList {
        #[serde(default)]
        streams: Vec<StreamInfo>,
    }

    let output = run(Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path))?;
    if !output.status.success() {
        return Err(Error::audio(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: StreamList = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::audio(format!("ffprobe json parse failed: {}", e)))?;
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| Error::audio("no audio stream found"))?;
    let channels = stream
        .channels
        .filter(|&channels| channels > 0)
        .ok_or_else(|| Error::audio("ffprobe reported no channel count"))?;

    Ok(channels.min(MAX_CHANNELS))
}

fn run(command: &mut Command) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::Ffmpeg(format!("Failed to start process: {}", e)))
}

fn parse_f32le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::audio(
            "decoded audio byte length is not aligned to f32 samples",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn detail(err: Error) -> String {
    match err {
        Error::AudioDecode(msg) => msg,
        other => other.to_string(),
    }
}
