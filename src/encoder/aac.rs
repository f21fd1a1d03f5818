//! AAC-LC encoder using an ffmpeg child process
//!
//! Interleaved float PCM goes in on stdin; ADTS comes back on stdout and is
//! unwrapped into raw AAC frames, one packet each.

use super::process::FfmpegProcess;
use super::{check_ffmpeg_encoder, find_ffmpeg, AudioConfig, AudioEncoder, Packet};
use crate::audio::AudioBlock;
use crate::{Error, Result};

/// Samples per channel in one raw AAC frame
pub const SAMPLES_PER_FRAME: u64 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
const AOT_LC: u8 = 2;

pub struct AacEncoder {
    process: FfmpegProcess,
    config: AudioConfig,
    /// ADTS bytes not yet split into frames
    pending: Vec<u8>,
    samples_out: u64,
}

impl AacEncoder {
    pub fn new(config: AudioConfig, ffmpeg_path: Option<&str>) -> Result<Self> {
        if channel_configuration(config.channels).is_none() {
            return Err(Error::InvalidInput(format!(
                "AAC cannot carry {} channels",
                config.channels
            )));
        }
        if sample_rate_index(config.sample_rate).is_none() {
            return Err(Error::InvalidInput(format!(
                "AAC does not support {} Hz",
                config.sample_rate
            )));
        }
        let ffmpeg = find_ffmpeg(ffmpeg_path)?;

        let args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "f32le",
            "-ar",
            &config.sample_rate.to_string(),
            "-ac",
            &config.channels.to_string(),
            "-i",
            "pipe:0",
            "-c:a",
            "aac",
            "-b:a",
            &config.bitrate.to_string(),
            "-f",
            "adts",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let process = FfmpegProcess::spawn(&ffmpeg, &args)?;
        tracing::debug!(
            channels = config.channels,
            bitrate = config.bitrate,
            "configured AAC encoder"
        );

        Ok(Self {
            process,
            config,
            pending: Vec::new(),
            samples_out: 0,
        })
    }

    fn drain(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while let Some(header) = AdtsHeader::parse(&self.pending[offset..])? {
            let end = offset + header.frame_length;
            if end > self.pending.len() {
                break;
            }
            let samples = SAMPLES_PER_FRAME * header.raw_blocks as u64;
            let rate = self.config.sample_rate as f64;
            let start_us = (self.samples_out as f64 * 1_000_000.0 / rate).round() as i64;
            let end_us =
                ((self.samples_out + samples) as f64 * 1_000_000.0 / rate).round() as i64;
            packets.push(Packet {
                data: self.pending[offset + header.header_length..end].to_vec(),
                timestamp_us: start_us,
                duration_us: end_us - start_us,
                is_keyframe: true,
            });
            self.samples_out += samples;
            offset = end;
        }

        self.pending.drain(..offset);
        Ok(packets)
    }
}

impl AudioEncoder for AacEncoder {
    fn encode(&mut self, block: AudioBlock) -> Result<Vec<Packet>> {
        if block.channels() != self.config.channels as usize {
            return Err(Error::Encode(format!(
                "audio block has {} channels, encoder expects {}",
                block.channels(),
                self.config.channels
            )));
        }
        let bytes: Vec<u8> = block
            .interleaved()
            .into_iter()
            .flat_map(f32::to_le_bytes)
            .collect();
        self.process.write(&bytes)?;

        let output = self.process.try_read();
        if output.is_empty() {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(&output);
        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        let rest = self.process.finish()?;
        self.pending.extend_from_slice(&rest);
        let packets = self.drain()?;
        if !self.pending.is_empty() {
            tracing::warn!(bytes = self.pending.len(), "discarding truncated ADTS frame");
            self.pending.clear();
        }
        Ok(packets)
    }

    fn codec_private(&self) -> Option<Vec<u8>> {
        audio_specific_config(self.config.sample_rate, self.config.channels)
    }
}

/// Check if ffmpeg with an AAC encoder is available
pub fn check_available(ffmpeg_path: Option<&str>) -> Result<()> {
    check_ffmpeg_encoder(ffmpeg_path, "aac")
}

/// Two-byte AudioSpecificConfig for AAC-LC
pub fn audio_specific_config(sample_rate: u32, channels: u16) -> Option<Vec<u8>> {
    let index = sample_rate_index(sample_rate)?;
    let channel_config = channel_configuration(channels)?;
    Some(vec![
        (AOT_LC << 3) | (index >> 1),
        ((index & 1) << 7) | (channel_config << 3),
    ])
}

fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

/// MPEG-4 channel configuration; 7 channels have no standard layout
fn channel_configuration(channels: u16) -> Option<u8> {
    match channels {
        1..=6 => Some(channels as u8),
        8 => Some(7),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AdtsHeader {
    header_length: usize,
    frame_length: usize,
    raw_blocks: u8,
}

impl AdtsHeader {
    /// `Ok(None)` when more bytes are needed
    fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < 7 {
            return Ok(None);
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(Error::Encode("lost ADTS sync in AAC output".to_string()));
        }
        let protection_absent = data[1] & 0x01 == 1;
        let header_length = if protection_absent { 7 } else { 9 };
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        if frame_length < header_length {
            return Err(Error::Encode(format!(
                "invalid ADTS frame length {}",
                frame_length
            )));
        }
        Ok(Some(Self {
            header_length,
            frame_length,
            raw_blocks: (data[6] & 0x03) + 1,
        }))
    }
}
