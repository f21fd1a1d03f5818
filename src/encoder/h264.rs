//! H.264 encoder using an ffmpeg (libx264) child process
//!
//! ffmpeg emits an Annex-B elementary stream with access unit delimiters.
//! Each access unit becomes one packet in AVCC form (4-byte big-endian NAL
//! lengths); SPS and PPS are captured for the container headers instead.

use super::process::FfmpegProcess;
use super::{check_ffmpeg_encoder, find_ffmpeg, Frame, Packet, VideoConfig, VideoEncoder};
use crate::{Error, Result};
use std::collections::VecDeque;

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// FFmpeg-based H.264 encoder
pub struct FfmpegEncoder {
    process: FfmpegProcess,
    config: VideoConfig,
    /// Annex-B bytes not yet assigned to a complete access unit
    pending: Vec<u8>,
    /// Timestamps of frames whose access units have not come out yet
    timestamps: VecDeque<i64>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl FfmpegEncoder {
    pub fn new(config: VideoConfig, ffmpeg_path: Option<&str>) -> Result<Self> {
        let ffmpeg = find_ffmpeg(ffmpeg_path)?;

        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", config.width, config.height),
            "-r",
            &config.fps.to_string(),
            "-i",
            "pipe:0",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        match config.bitrate {
            Some(bitrate) => args.extend([
                "-b:v".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                bitrate.to_string(),
                "-bufsize".to_string(),
                (bitrate as u64 * 2).to_string(),
            ]),
            None => {
                // Map quality (0-100) to CRF (51-0)
                let crf = ((100 - config.quality.min(100)) as u32 * 51) / 100;
                args.extend(["-crf".to_string(), crf.to_string()]);
            }
        }

        // no B-frames, so access units come out in presentation order
        args.extend(
            [
                "-pix_fmt",
                "yuv420p",
                "-bf",
                "0",
                "-x264-params",
                "aud=1",
                "-f",
                "h264",
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        let process = FfmpegProcess::spawn(&ffmpeg, &args)?;

        Ok(Self {
            process,
            config,
            pending: Vec::new(),
            timestamps: VecDeque::new(),
            sps: None,
            pps: None,
        })
    }

    /// Turn every complete access unit in `pending` into a packet
    fn drain(&mut self, at_end: bool) -> Result<Vec<Packet>> {
        let delimiters: Vec<usize> = nal_units(&self.pending)
            .into_iter()
            .filter(|nal| nal_type(&self.pending[nal.payload..nal.end]) == Some(NAL_AUD))
            .map(|nal| nal.start)
            .collect();

        let mut bounds = delimiters;
        if at_end && !self.pending.is_empty() {
            bounds.push(self.pending.len());
        }
        // Bytes before the first delimiter only occur at stream start
        if bounds.first().is_some_and(|&first| first > 0) {
            bounds.insert(0, 0);
        }

        let mut packets = Vec::new();
        for pair in bounds.windows(2) {
            let unit = self.pending[pair[0]..pair[1]].to_vec();
            if let Some(packet) = self.access_unit(&unit)? {
                packets.push(packet);
            }
        }

        let consumed = if at_end {
            self.pending.len()
        } else {
            bounds.last().copied().unwrap_or(0)
        };
        self.pending.drain(..consumed);
        Ok(packets)
    }

    fn access_unit(&mut self, unit: &[u8]) -> Result<Option<Packet>> {
        let mut sample = Vec::with_capacity(unit.len() + 16);
        let mut is_keyframe = false;

        for nal in nal_units(unit) {
            let payload = trim_trailing_zeros(&unit[nal.payload..nal.end]);
            match nal_type(payload) {
                None | Some(NAL_AUD) => {}
                Some(NAL_SPS) => {
                    if self.sps.is_none() {
                        self.sps = Some(payload.to_vec());
                    }
                }
                Some(NAL_PPS) => {
                    if self.pps.is_none() {
                        self.pps = Some(payload.to_vec());
                    }
                }
                Some(kind) => {
                    is_keyframe |= kind == NAL_IDR;
                    sample.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                    sample.extend_from_slice(payload);
                }
            }
        }

        if sample.is_empty() {
            return Ok(None);
        }
        let timestamp_us = self.timestamps.pop_front().ok_or_else(|| {
            Error::Encode("ffmpeg produced more pictures than frames sent".to_string())
        })?;
        Ok(Some(Packet {
            data: sample,
            timestamp_us,
            duration_us: self.config.frame_duration_us(),
            is_keyframe,
        }))
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>> {
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(Error::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }
        self.process.write(&frame.data)?;
        self.timestamps.push_back(frame.timestamp_us);

        let output = self.process.try_read();
        if output.is_empty() {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(&output);
        self.drain(false)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        let rest = self.process.finish()?;
        self.pending.extend_from_slice(&rest);
        let packets = self.drain(true)?;
        if !self.timestamps.is_empty() {
            return Err(Error::Encode(format!(
                "ffmpeg dropped {} frames",
                self.timestamps.len()
            )));
        }
        tracing::debug!(
            sps = self.sps.is_some(),
            pps = self.pps.is_some(),
            "H.264 encoder flushed"
        );
        Ok(packets)
    }

    fn codec_config(&self) -> Option<Vec<u8>> {
        self.sps.clone()
    }

    fn pps(&self) -> Option<Vec<u8>> {
        self.pps.clone()
    }
}

/// Check if ffmpeg with H.264 support is available
pub fn check_available(ffmpeg_path: Option<&str>) -> Result<()> {
    check_ffmpeg_encoder(ffmpeg_path, "libx264")
}

/// A NAL unit inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NalUnit {
    /// Offset of the start code
    start: usize,
    /// Offset of the NAL header byte
    payload: usize,
    /// End offset (next start code or end of data)
    end: usize,
}

fn nal_units(data: &[u8]) -> Vec<NalUnit> {
    let mut units = Vec::new();
    let mut next = find_start_code(data, 0);
    while let Some((start, code_len)) = next {
        let payload = start + code_len;
        next = find_start_code(data, payload);
        let end = next.map_or(data.len(), |(pos, _)| pos);
        units.push(NalUnit {
            start,
            payload,
            end,
        });
    }
    units
}

fn nal_type(payload: &[u8]) -> Option<u8> {
    payload.first().map(|b| b & 0x1F)
}

fn trim_trailing_zeros(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    &payload[..end]
}

/// Find H.264 start code in data
fn find_start_code(data: &[u8], start: usize) -> Option<(usize, usize)> {
    if start + 3 > data.len() {
        return None;
    }

    for i in start..data.len() - 2 {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                return Some((i, 3));
            }
            if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                return Some((i, 4));
            }
        }
    }

    None
}
