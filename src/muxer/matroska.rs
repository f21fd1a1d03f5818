//! WebM / Matroska container muxer
//!
//! Blocks are collected until [`Muxer::finalize`], then laid out in
//! timestamp order across clusters. Every element has a known size, so the
//! segment carries a duration and needs no seeking on playback start.

use super::{avc_decoder_config, AudioTrackConfig, Muxer, MuxerConfig, Track, VideoTrackConfig};
use crate::encoder::{opus, Packet};
use crate::{AudioCodec, Codec, Container, Error, Result};

// Element IDs
const EBML: u32 = 0x1A45DFA3;
const SEGMENT: u32 = 0x18538067;
const INFO: u32 = 0x1549A966;
const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
const DURATION: u32 = 0x4489;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;
const TRACKS: u32 = 0x1654AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const FLAG_LACING: u32 = 0x9C;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const DEFAULT_DURATION: u32 = 0x23E383;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;
const AUDIO: u32 = 0xE1;
const SAMPLING_FREQUENCY: u32 = 0xB5;
const CHANNELS: u32 = 0x9F;
const BIT_DEPTH: u32 = 0x6264;
const CODEC_DELAY: u32 = 0x56AA;
const SEEK_PRE_ROLL: u32 = 0x56BB;
const CLUSTER: u32 = 0x1F43B675;
const CLUSTER_TIMESTAMP: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;

const VIDEO_TRACK: u64 = 1;
const AUDIO_TRACK: u64 = 2;

/// Block timestamps are in milliseconds
const TIMESTAMP_SCALE_NS: u64 = 1_000_000;

/// Clusters restart well before the signed 16-bit relative timecode wraps
const MAX_CLUSTER_SPAN_MS: i64 = 30_000;

#[derive(Debug)]
struct Block {
    track: u64,
    timestamp_ms: i64,
    end_ms: i64,
    keyframe: bool,
    data: Vec<u8>,
}

/// WebM / Matroska muxer using simple EBML writing
pub struct MatroskaMuxer {
    container: Container,
    config: MuxerConfig,
    blocks: Vec<Block>,
}

impl MatroskaMuxer {
    pub fn new(container: Container, config: MuxerConfig) -> Result<Self> {
        match container {
            // WebM only supports AV1 (and VP8/VP9, but we only implement AV1)
            Container::WebM if config.video.codec != Codec::Av1 => {
                return Err(Error::Mux("WebM container only supports AV1 codec".to_string()));
            }
            Container::WebM
                if config
                    .audio
                    .as_ref()
                    .is_some_and(|audio| audio.codec != AudioCodec::Opus) =>
            {
                return Err(Error::Mux("WebM audio must be Opus".to_string()));
            }
            Container::Mp4 => {
                return Err(Error::Mux("MP4 is not an EBML container".to_string()));
            }
            _ => {}
        }
        if config.video.codec == Codec::H264 {
            h264_private(&config.video)?;
        }

        Ok(Self {
            container,
            config,
            blocks: Vec::new(),
        })
    }

    fn doc_type(&self) -> &'static [u8] {
        match self.container {
            Container::WebM => b"webm",
            _ => b"matroska",
        }
    }

    fn create_ebml_header(&self) -> Vec<u8> {
        let mut data = Vec::new();
        // EBMLVersion, EBMLReadVersion
        data.extend(encode_ebml_element(0x4286, &[1]));
        data.extend(encode_ebml_element(0x42F7, &[1]));
        // EBMLMaxIDLength, EBMLMaxSizeLength
        data.extend(encode_ebml_element(0x42F2, &[4]));
        data.extend(encode_ebml_element(0x42F3, &[8]));
        data.extend(encode_ebml_element(0x4282, self.doc_type()));
        // DocTypeVersion, DocTypeReadVersion
        data.extend(encode_ebml_element(0x4287, &[4]));
        data.extend(encode_ebml_element(0x4285, &[2]));
        data
    }

    fn create_segment_info(&self, duration_ms: i64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(encode_ebml_element(
            TIMESTAMP_SCALE,
            &encode_uint(TIMESTAMP_SCALE_NS),
        ));
        data.extend(encode_ebml_element(
            DURATION,
            &(duration_ms.max(0) as f64).to_be_bytes(),
        ));
        data.extend(encode_ebml_element(MUXING_APP, b"slidecast"));
        data.extend(encode_ebml_element(WRITING_APP, b"slidecast"));
        data
    }

    fn create_tracks(&self) -> Result<Vec<u8>> {
        let mut data = encode_ebml_element(TRACK_ENTRY, &video_track_entry(&self.config.video)?);
        if let Some(audio) = &self.config.audio {
            data.extend(encode_ebml_element(TRACK_ENTRY, &audio_track_entry(audio)?));
        }
        Ok(data)
    }
}

fn video_track_entry(video: &VideoTrackConfig) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.extend(encode_ebml_element(TRACK_NUMBER, &encode_uint(VIDEO_TRACK)));
    data.extend(encode_ebml_element(TRACK_UID, &encode_uint(VIDEO_TRACK)));
    // TrackType 1 = video
    data.extend(encode_ebml_element(TRACK_TYPE, &[1]));
    data.extend(encode_ebml_element(FLAG_LACING, &[0]));
    match video.codec {
        Codec::Av1 => data.extend(encode_ebml_element(CODEC_ID, b"V_AV1")),
        Codec::H264 => {
            data.extend(encode_ebml_element(CODEC_ID, b"V_MPEG4/ISO/AVC"));
            data.extend(encode_ebml_element(CODEC_PRIVATE, &h264_private(video)?));
        }
    }
    let frame_ns = 1_000_000_000 / video.fps.max(1) as u64;
    data.extend(encode_ebml_element(DEFAULT_DURATION, &encode_uint(frame_ns)));

    let mut settings = encode_ebml_element(PIXEL_WIDTH, &encode_uint(video.width as u64));
    settings.extend(encode_ebml_element(
        PIXEL_HEIGHT,
        &encode_uint(video.height as u64),
    ));
    data.extend(encode_ebml_element(VIDEO, &settings));
    Ok(data)
}

fn audio_track_entry(audio: &AudioTrackConfig) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.extend(encode_ebml_element(TRACK_NUMBER, &encode_uint(AUDIO_TRACK)));
    data.extend(encode_ebml_element(TRACK_UID, &encode_uint(AUDIO_TRACK)));
    // TrackType 2 = audio
    data.extend(encode_ebml_element(TRACK_TYPE, &[2]));
    data.extend(encode_ebml_element(FLAG_LACING, &[0]));

    let mut settings = encode_ebml_element(
        SAMPLING_FREQUENCY,
        &(audio.sample_rate as f64).to_be_bytes(),
    );
    settings.extend(encode_ebml_element(
        CHANNELS,
        &encode_uint(audio.channels as u64),
    ));

    match audio.codec {
        AudioCodec::Pcm => {
            data.extend(encode_ebml_element(CODEC_ID, b"A_PCM/FLOAT/IEEE"));
            settings.extend(encode_ebml_element(BIT_DEPTH, &[32]));
        }
        AudioCodec::Aac => {
            let asc = audio
                .codec_private
                .as_deref()
                .ok_or_else(|| Error::Mux("AAC track has no AudioSpecificConfig".to_string()))?;
            data.extend(encode_ebml_element(CODEC_ID, b"A_AAC"));
            data.extend(encode_ebml_element(CODEC_PRIVATE, asc));
        }
        AudioCodec::Opus => {
            let head = audio
                .codec_private
                .as_deref()
                .ok_or_else(|| Error::Mux("Opus track has no OpusHead".to_string()))?;
            let pre_skip = opus::pre_skip(head)
                .ok_or_else(|| Error::Mux("malformed OpusHead".to_string()))?;
            let delay_ns = pre_skip as u64 * 1_000_000_000 / opus::SAMPLE_RATE as u64;
            data.extend(encode_ebml_element(CODEC_ID, b"A_OPUS"));
            data.extend(encode_ebml_element(CODEC_PRIVATE, head));
            data.extend(encode_ebml_element(CODEC_DELAY, &encode_uint(delay_ns)));
            data.extend(encode_ebml_element(
                SEEK_PRE_ROLL,
                &encode_uint(opus::SEEK_PRE_ROLL_NS),
            ));
        }
    }
    data.extend(encode_ebml_element(AUDIO, &settings));
    Ok(data)
}

fn h264_private(video: &VideoTrackConfig) -> Result<Vec<u8>> {
    match (&video.sps, &video.pps) {
        (Some(sps), Some(pps)) => avc_decoder_config(sps, pps)
            .ok_or_else(|| Error::Mux("malformed H.264 parameter sets".to_string())),
        _ => Err(Error::Mux(
            "H.264 stream has no SPS/PPS for the track header".to_string(),
        )),
    }
}

/// Round microseconds to the nearest block tick
fn to_ms(us: i64) -> i64 {
    (us as f64 / 1000.0).round() as i64
}

/// Lay blocks out into clusters
///
/// A cluster starts at the first block, at every video keyframe that is
/// later than the cluster start, and whenever the next block would sit
/// more than [`MAX_CLUSTER_SPAN_MS`] past the cluster timestamp.
fn write_clusters(blocks: &[Block]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut cluster: Vec<u8> = Vec::new();
    let mut cluster_start: Option<i64> = None;

    for block in blocks {
        let restart = match cluster_start {
            None => true,
            Some(start) => {
                (block.track == VIDEO_TRACK && block.keyframe && block.timestamp_ms > start)
                    || block.timestamp_ms - start > MAX_CLUSTER_SPAN_MS
            }
        };
        if restart {
            if !cluster.is_empty() {
                out.extend(encode_ebml_element(CLUSTER, &cluster));
            }
            cluster = encode_ebml_element(
                CLUSTER_TIMESTAMP,
                &encode_uint(block.timestamp_ms.max(0) as u64),
            );
            cluster_start = Some(block.timestamp_ms);
        }

        let relative = (block.timestamp_ms - cluster_start.unwrap_or(0)) as i16;
        let mut block_data = encode_vint(block.track);
        block_data.extend_from_slice(&relative.to_be_bytes());
        // Flags: keyframe if applicable
        block_data.push(if block.keyframe { 0x80 } else { 0x00 });
        block_data.extend_from_slice(&block.data);
        cluster.extend(encode_ebml_element(SIMPLE_BLOCK, &block_data));
    }
    if !cluster.is_empty() {
        out.extend(encode_ebml_element(CLUSTER, &cluster));
    }
    out
}

impl Muxer for MatroskaMuxer {
    fn write_packet(&mut self, track: Track, packet: Packet) -> Result<()> {
        let track = match track {
            Track::Video => VIDEO_TRACK,
            Track::Audio if self.config.audio.is_some() => AUDIO_TRACK,
            Track::Audio => {
                return Err(Error::Mux("container has no audio track".to_string()));
            }
        };
        let timestamp_ms = to_ms(packet.timestamp_us);
        self.blocks.push(Block {
            track,
            timestamp_ms,
            end_ms: to_ms(packet.timestamp_us + packet.duration_us),
            keyframe: packet.is_keyframe,
            data: packet.data,
        });
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        // Stable: blocks of one track keep their submission order
        self.blocks.sort_by_key(|block| block.timestamp_ms);
        let duration_ms = self.blocks.iter().map(|b| b.end_ms).max().unwrap_or(0);

        let mut segment = encode_ebml_element(INFO, &self.create_segment_info(duration_ms));
        segment.extend(encode_ebml_element(TRACKS, &self.create_tracks()?));
        segment.extend(write_clusters(&self.blocks));

        let mut out = encode_ebml_element(EBML, &self.create_ebml_header());
        out.extend(encode_ebml_element(SEGMENT, &segment));
        tracing::debug!(
            blocks = self.blocks.len(),
            bytes = out.len(),
            duration_ms,
            "Matroska finalized"
        );
        Ok(out)
    }
}

// EBML encoding helpers

/// Encode an EBML element ID.
///
/// IDs carry their own length marker in the leading bits, so the value is
/// written as its big-endian bytes without leading zeros.
fn encode_ebml_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

/// Encode an unsigned variable-length integer (element sizes, track numbers)
fn encode_vint(value: u64) -> Vec<u8> {
    // Lengths 1..=8 hold 7*len value bits; all-ones is reserved
    let len = (1..=8usize)
        .find(|&len| value < (1u64 << (7 * len)) - 1)
        .unwrap_or(8);
    let marked = value | (1u64 << (7 * len));
    marked.to_be_bytes()[8 - len..].to_vec()
}

fn encode_ebml_element(id: u32, data: &[u8]) -> Vec<u8> {
    let mut result = encode_ebml_id(id);
    result.extend(encode_vint(data.len() as u64));
    result.extend(data);
    result
}

fn encode_uint(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}
