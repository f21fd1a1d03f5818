//! Opus encoder using an ffmpeg child process (libopus)
//!
//! Interleaved float PCM goes in on stdin; an Ogg stream comes back on
//! stdout. The first two logical packets are the `OpusHead` and `OpusTags`
//! headers, every later one is a single Opus packet.

use super::process::FfmpegProcess;
use super::{check_ffmpeg_encoder, find_ffmpeg, AudioConfig, AudioEncoder, Packet};
use crate::audio::AudioBlock;
use crate::{Error, Result};

/// Opus always runs at 48 kHz
pub const SAMPLE_RATE: u32 = 48_000;

/// Decoder seek pre-roll recommended for Opus, in nanoseconds
pub const SEEK_PRE_ROLL_NS: u64 = 80_000_000;

const MAX_CHANNELS: u16 = 8;
const FRAME_DURATION_MS: u32 = 20;
const HEADER_PACKETS: usize = 2;

pub struct OpusEncoder {
    process: FfmpegProcess,
    config: AudioConfig,
    head: Vec<u8>,
    ogg: OggReader,
    headers_seen: usize,
    samples_out: u64,
}

impl OpusEncoder {
    pub fn new(config: AudioConfig, ffmpeg_path: Option<&str>) -> Result<Self> {
        if config.sample_rate != SAMPLE_RATE {
            return Err(Error::InvalidInput(format!(
                "Opus encodes 48000 Hz input, got {} Hz",
                config.sample_rate
            )));
        }
        if !(1..=MAX_CHANNELS).contains(&config.channels) {
            return Err(Error::InvalidInput(format!(
                "Opus cannot carry {} channels",
                config.channels
            )));
        }
        let ffmpeg = find_ffmpeg(ffmpeg_path)?;
        let args = ffmpeg_args(&config);

        // The header comes out only once ffmpeg has seen input, but the
        // track header needs it up front: encode one frame of silence with
        // identical settings and keep its OpusHead.
        let head = silent_frame_head(&ffmpeg, &args, config.channels)?;
        let process = FfmpegProcess::spawn(&ffmpeg, &args)?;
        tracing::debug!(
            channels = config.channels,
            bitrate = config.bitrate,
            pre_skip = pre_skip(&head).unwrap_or(0),
            "configured Opus encoder"
        );

        Ok(Self {
            process,
            config,
            head,
            ogg: OggReader::default(),
            headers_seen: 0,
            samples_out: 0,
        })
    }

    fn packets(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        for payload in self.ogg.push(data)? {
            if self.headers_seen < HEADER_PACKETS {
                self.headers_seen += 1;
                continue;
            }
            let samples = packet_samples(&payload).ok_or_else(|| {
                Error::Encode("empty or malformed Opus packet".to_string())
            })?;
            let start_us = samples_to_us(self.samples_out);
            let end_us = samples_to_us(self.samples_out + samples);
            packets.push(Packet {
                data: payload,
                timestamp_us: start_us,
                duration_us: end_us - start_us,
                is_keyframe: true,
            });
            self.samples_out += samples;
        }
        Ok(packets)
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, block: AudioBlock) -> Result<Vec<Packet>> {
        if block.channels() != self.config.channels as usize {
            return Err(Error::Encode(format!(
                "audio block has {} channels, encoder expects {}",
                block.channels(),
                self.config.channels
            )));
        }
        self.process.write(&f32le(&block.interleaved()))?;

        let output = self.process.try_read();
        if output.is_empty() {
            return Ok(Vec::new());
        }
        self.packets(&output)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        let rest = self.process.finish()?;
        let packets = self.packets(&rest)?;
        if self.ogg.has_partial() {
            tracing::warn!("discarding truncated Ogg packet");
        }
        Ok(packets)
    }

    fn codec_private(&self) -> Option<Vec<u8>> {
        Some(self.head.clone())
    }
}

/// Check if ffmpeg was built with libopus
pub fn check_available(ffmpeg_path: Option<&str>) -> Result<()> {
    check_ffmpeg_encoder(ffmpeg_path, "libopus")
}

/// Pre-skip samples from an `OpusHead` packet
pub fn pre_skip(head: &[u8]) -> Option<u16> {
    if head.len() < 19 || &head[..8] != b"OpusHead" {
        return None;
    }
    Some(u16::from_le_bytes([head[10], head[11]]))
}

/// Samples (at 48 kHz) carried by one Opus packet, from its TOC byte
pub fn packet_samples(packet: &[u8]) -> Option<u64> {
    let toc = *packet.first()?;
    let config = (toc >> 3) as usize;
    let frame = match config {
        // SILK: 10, 20, 40, 60 ms
        0..=11 => [480, 960, 1920, 2880][config % 4],
        // hybrid: 10, 20 ms
        12..=15 => [480, 960][config % 2],
        // CELT: 2.5, 5, 10, 20 ms
        _ => [120, 240, 480, 960][config % 4],
    };
    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => (*packet.get(1)? & 0x3F) as u64,
    };
    Some(frame * frames)
}

fn samples_to_us(samples: u64) -> i64 {
    (samples as f64 * 1_000_000.0 / SAMPLE_RATE as f64).round() as i64
}

fn f32le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn ffmpeg_args(config: &AudioConfig) -> Vec<String> {
    [
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
        "libopus",
        "-b:a",
        &config.bitrate.to_string(),
        "-frame_duration",
        &FRAME_DURATION_MS.to_string(),
        "-f",
        "ogg",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn silent_frame_head(ffmpeg: &str, args: &[String], channels: u16) -> Result<Vec<u8>> {
    let mut process = FfmpegProcess::spawn(ffmpeg, args)?;
    let frame = (SAMPLE_RATE / 1000 * FRAME_DURATION_MS) as usize;
    process.write(&vec![0u8; frame * channels as usize * 4])?;
    let output = process.finish()?;

    let mut ogg = OggReader::default();
    ogg.push(&output)?
        .into_iter()
        .next()
        .filter(|head| pre_skip(head).is_some())
        .ok_or_else(|| Error::Encode("libopus produced no OpusHead".to_string()))
}

/// Reassembles logical packets from a single-stream Ogg byte stream
#[derive(Debug, Default)]
struct OggReader {
    buffer: Vec<u8>,
    /// Packet continued on the next page
    partial: Vec<u8>,
}

impl OggReader {
    /// Feed bytes, returning every packet completed by them
    fn push(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(data);
        let mut packets = Vec::new();
        let mut offset = 0;

        loop {
            let page = &self.buffer[offset..];
            if page.len() < 27 {
                break;
            }
            if &page[..4] != b"OggS" {
                return Err(Error::Encode("lost Ogg sync in Opus output".to_string()));
            }
            let segments = page[26] as usize;
            if page.len() < 27 + segments {
                break;
            }
            let lacing = &page[27..27 + segments];
            let body: usize = lacing.iter().map(|&len| len as usize).sum();
            let page_len = 27 + segments + body;
            if page.len() < page_len {
                break;
            }

            let mut pos = 27 + segments;
            for &len in lacing {
                let len = len as usize;
                self.partial.extend_from_slice(&page[pos..pos + len]);
                pos += len;
                // a lacing value below 255 ends the packet
                if len < 255 {
                    packets.push(std::mem::take(&mut self.partial));
                }
            }
            offset += page_len;
        }

        self.buffer.drain(..offset);
        Ok(packets)
    }

    fn has_partial(&self) -> bool {
        !self.partial.is_empty() || !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One Ogg page holding `packets`; the last one may be left open
    fn page(packets: &[&[u8]], last_open: bool) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let mut rest = packet.len();
            while rest >= 255 {
                lacing.push(255u8);
                rest -= 255;
            }
            let open = last_open && i == packets.len() - 1;
            if !open {
                lacing.push(rest as u8);
            }
            body.extend_from_slice(packet);
        }
        let mut out = b"OggS".to_vec();
        out.extend_from_slice(&[0; 22]);
        out.push(lacing.len() as u8);
        out.extend_from_slice(&lacing);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_ogg_packets_across_pages() {
        let long = vec![7u8; 510];
        let mut stream = page(&[b"first".as_slice(), long.as_slice()], true);
        stream.extend(page(&[b"tail".as_slice(), b"next".as_slice()], false));

        let mut reader = OggReader::default();
        // split mid-page to exercise buffering
        let mut packets = reader.push(&stream[..20]).unwrap();
        assert!(packets.is_empty());
        packets.extend(reader.push(&stream[20..]).unwrap());

        let mut joined = long.clone();
        joined.extend_from_slice(b"tail");
        assert_eq!(packets, vec![b"first".to_vec(), joined, b"next".to_vec()]);
        assert!(!reader.has_partial());
    }

    #[test]
    fn test_ogg_lost_sync() {
        let mut reader = OggReader::default();
        assert!(reader.push(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_packet_samples() {
        // CELT 20 ms, one frame
        assert_eq!(packet_samples(&[0xFC]), Some(960));
        // CELT 20 ms, two frames
        assert_eq!(packet_samples(&[0xFD]), Some(1920));
        // SILK 60 ms
        assert_eq!(packet_samples(&[0x18]), Some(2880));
        // hybrid 10 ms, code 3 with 3 frames
        assert_eq!(packet_samples(&[0x63, 0x03]), Some(1440));
        assert_eq!(packet_samples(&[]), None);
        assert_eq!(packet_samples(&[0x03]), None);
    }

    #[test]
    fn test_pre_skip() {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
        assert_eq!(pre_skip(&head), Some(312));
        assert_eq!(pre_skip(b"OpusTags"), None);
    }

    #[test]
    fn test_rejects_other_rates() {
        let config = AudioConfig {
            codec: crate::AudioCodec::Opus,
            sample_rate: 44_100,
            channels: 2,
            bitrate: 96_000,
        };
        assert!(matches!(
            OpusEncoder::new(config, None),
            Err(Error::InvalidInput(_))
        ));
    }
}
