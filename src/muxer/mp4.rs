//! MP4 container muxer (H.264 video, optional AAC audio)

use super::{AudioTrackConfig, Muxer, MuxerConfig, Track};
use crate::encoder::Packet;
use crate::{AudioCodec, Codec, Error, Result};
use mp4::{Mp4Config, Mp4Writer, TrackConfig};
use std::io::Cursor;

/// Video samples are timed in microseconds, matching packet timestamps
const VIDEO_TIMESCALE: u32 = 1_000_000;

const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

/// MP4 muxer writing into memory
pub struct Mp4Muxer {
    writer: Mp4Writer<Cursor<Vec<u8>>>,
    audio_timescale: Option<u32>,
    video_samples: u32,
    audio_samples: u32,
}

impl Mp4Muxer {
    pub fn new(config: MuxerConfig) -> Result<Self> {
        // The mp4 crate only writes avc1 sample entries
        if config.video.codec == Codec::Av1 {
            return Err(Error::Mux(
                "MP4 container with AV1 codec is not supported. Use WebM or Matroska for AV1."
                    .to_string(),
            ));
        }
        let (sps, pps) = match (&config.video.sps, &config.video.pps) {
            (Some(sps), Some(pps)) => (sps.clone(), pps.clone()),
            _ => {
                return Err(Error::Mux(
                    "H.264 stream has no SPS/PPS for the MP4 header".to_string(),
                ))
            }
        };

        let mp4_config = Mp4Config {
            major_brand: str_to_brand("isom"),
            minor_version: 512,
            compatible_brands: vec![
                str_to_brand("isom"),
                str_to_brand("iso2"),
                str_to_brand("avc1"),
                str_to_brand("mp41"),
            ],
            timescale: 1000, // milliseconds
        };

        let mut writer = Mp4Writer::write_start(Cursor::new(Vec::new()), &mp4_config)
            .map_err(|e| Error::Mux(format!("Failed to create MP4 writer: {}", e)))?;

        let video_track = TrackConfig {
            track_type: mp4::TrackType::Video,
            timescale: VIDEO_TIMESCALE,
            language: String::from("und"),
            media_conf: mp4::MediaConfig::AvcConfig(mp4::AvcConfig {
                width: dimension(config.video.width)?,
                height: dimension(config.video.height)?,
                seq_param_set: sps,
                pic_param_set: pps,
            }),
        };
        writer
            .add_track(&video_track)
            .map_err(|e| Error::Mux(format!("Failed to add video track: {}", e)))?;

        let audio_timescale = match &config.audio {
            Some(audio) => {
                writer
                    .add_track(&audio_track(audio)?)
                    .map_err(|e| Error::Mux(format!("Failed to add audio track: {}", e)))?;
                Some(audio.sample_rate)
            }
            None => None,
        };

        Ok(Self {
            writer,
            audio_timescale,
            video_samples: 0,
            audio_samples: 0,
        })
    }
}

fn audio_track(audio: &AudioTrackConfig) -> Result<TrackConfig> {
    if audio.codec != AudioCodec::Aac {
        return Err(Error::Mux("MP4 audio must be AAC".to_string()));
    }
    let asc = audio
        .codec_private
        .as_deref()
        .filter(|asc| asc.len() >= 2)
        .ok_or_else(|| Error::Mux("AAC track has no AudioSpecificConfig".to_string()))?;

    // Frequency index and channel configuration straight from the ASC
    let freq_index = ((asc[0] & 0x07) << 1) | (asc[1] >> 7);
    let channel_config = (asc[1] >> 3) & 0x0F;

    Ok(TrackConfig {
        track_type: mp4::TrackType::Audio,
        timescale: audio.sample_rate,
        language: String::from("und"),
        media_conf: mp4::MediaConfig::AacConfig(mp4::AacConfig {
            bitrate: audio.bitrate,
            profile: mp4::AudioObjectType::AacLowComplexity,
            freq_index: mp4::SampleFreqIndex::try_from(freq_index)
                .map_err(|e| Error::Mux(format!("Unsupported AAC sample rate: {}", e)))?,
            chan_conf: mp4::ChannelConfig::try_from(channel_config)
                .map_err(|e| Error::Mux(format!("Unsupported AAC channel layout: {}", e)))?,
        }),
    })
}

fn dimension(value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::Mux(format!("dimension {} too large for MP4", value)))
}

/// Rescale microseconds to `timescale` units
fn rescale(us: i64, timescale: u32) -> u64 {
    (us.max(0) as f64 * timescale as f64 / 1_000_000.0).round() as u64
}

impl Muxer for Mp4Muxer {
    fn write_packet(&mut self, track: Track, packet: Packet) -> Result<()> {
        let (track_id, timescale) = match track {
            Track::Video => (VIDEO_TRACK_ID, VIDEO_TIMESCALE),
            Track::Audio => match self.audio_timescale {
                Some(timescale) => (AUDIO_TRACK_ID, timescale),
                None => return Err(Error::Mux("MP4 has no audio track".to_string())),
            },
        };

        let start_time = rescale(packet.timestamp_us, timescale);
        let end_time = rescale(packet.timestamp_us + packet.duration_us, timescale);
        let sample = mp4::Mp4Sample {
            start_time,
            duration: end_time.saturating_sub(start_time) as u32,
            rendering_offset: 0,
            is_sync: packet.is_keyframe,
            bytes: mp4::Bytes::from(packet.data),
        };

        self.writer
            .write_sample(track_id, &sample)
            .map_err(|e| Error::Mux(format!("Failed to write sample: {}", e)))?;

        match track {
            Track::Video => self.video_samples += 1,
            Track::Audio => self.audio_samples += 1,
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.writer
            .write_end()
            .map_err(|e| Error::Mux(format!("Failed to finalize MP4: {}", e)))?;
        tracing::debug!(
            video_samples = self.video_samples,
            audio_samples = self.audio_samples,
            "MP4 finalized"
        );
        Ok(self.writer.into_writer().into_inner())
    }
}

fn str_to_brand(s: &str) -> mp4::FourCC {
    let bytes = s.as_bytes();
    mp4::FourCC {
        value: [
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
            bytes.get(2).copied().unwrap_or(0),
            bytes.get(3).copied().unwrap_or(0),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muxer::VideoTrackConfig;

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(33_333, VIDEO_TIMESCALE), 33_333);
        assert_eq!(rescale(21_333, 48_000), 1024);
        assert_eq!(rescale(-5, 48_000), 0);
    }

    #[test]
    fn test_h264_without_parameter_sets_rejected() {
        let config = MuxerConfig {
            video: VideoTrackConfig {
                codec: Codec::H264,
                width: 64,
                height: 64,
                fps: 30,
                sps: None,
                pps: None,
            },
            audio: None,
        };
        assert!(matches!(Mp4Muxer::new(config), Err(Error::Mux(_))));
    }

    #[test]
    fn test_mp4_written_to_memory() {
        let config = MuxerConfig {
            video: VideoTrackConfig {
                codec: Codec::H264,
                width: 64,
                height: 64,
                fps: 30,
                sps: Some(vec![0x67, 0x42, 0xC0, 0x1E, 0xD9]),
                pps: Some(vec![0x68, 0xCB, 0x83, 0xCB, 0x20]),
            },
            audio: Some(AudioTrackConfig {
                codec: AudioCodec::Aac,
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
                codec_private: Some(vec![0x11, 0x90]),
            }),
        };
        let mut muxer: Box<dyn Muxer> = Box::new(Mp4Muxer::new(config).unwrap());
        muxer
            .write_packet(
                Track::Video,
                Packet {
                    data: vec![0, 0, 0, 2, 0x65, 0x88],
                    timestamp_us: 0,
                    duration_us: 33_333,
                    is_keyframe: true,
                },
            )
            .unwrap();
        muxer
            .write_packet(
                Track::Audio,
                Packet {
                    data: vec![0x21, 0x10],
                    timestamp_us: 0,
                    duration_us: 21_333,
                    is_keyframe: true,
                },
            )
            .unwrap();
        let bytes = muxer.finalize().unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(bytes.windows(4).any(|w| w == b"moov"));
        assert!(bytes.windows(4).any(|w| w == b"mp4a"));
    }
}
