//! Container muxers
//!
//! Muxers are built once both encoders have flushed, so codec parameters
//! (H.264 SPS/PPS, AAC AudioSpecificConfig) are known at construction.
//! The finished container is returned as a byte buffer.

pub mod matroska;
pub mod mp4;

use crate::encoder::Packet;
use crate::{AudioCodec, Codec, Container, Error, Result};

/// Stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Video,
    Audio,
}

/// Container muxer
pub trait Muxer: Send {
    /// Write one packet; packets of a single track arrive in
    /// non-decreasing timestamp order
    fn write_packet(&mut self, track: Track, packet: Packet) -> Result<()>;

    /// Finish the container and return its bytes
    fn finalize(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Video track parameters
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// H.264 sequence parameter set
    pub sps: Option<Vec<u8>>,
    /// H.264 picture parameter set
    pub pps: Option<Vec<u8>>,
}

/// Audio track parameters
#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    /// Decoder configuration (AudioSpecificConfig for AAC)
    pub codec_private: Option<Vec<u8>>,
}

/// Muxer configuration
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    pub video: VideoTrackConfig,
    pub audio: Option<AudioTrackConfig>,
}

/// Create a muxer for the specified container format
pub fn create_muxer(container: Container, config: MuxerConfig) -> Result<Box<dyn Muxer>> {
    if !container.supports_codec(config.video.codec) {
        return Err(Error::ContainerCodecMismatch {
            container,
            codec: config.video.codec,
        });
    }
    if let Some(audio) = &config.audio {
        if !container.supports_audio(audio.codec) {
            return Err(Error::ContainerAudioMismatch {
                container,
                codec: audio.codec,
            });
        }
    }
    match container {
        Container::Mp4 => Ok(Box::new(mp4::Mp4Muxer::new(config)?)),
        Container::WebM | Container::Matroska => {
            Ok(Box::new(matroska::MatroskaMuxer::new(container, config)?))
        }
    }
}

/// AVCDecoderConfigurationRecord (`avcC`) from one SPS and one PPS
pub fn avc_decoder_config(sps: &[u8], pps: &[u8]) -> Option<Vec<u8>> {
    if sps.len() < 4 || pps.is_empty() {
        return None;
    }
    let sps_len = u16::try_from(sps.len()).ok()?;
    let pps_len = u16::try_from(pps.len()).ok()?;

    let mut record = Vec::with_capacity(11 + sps.len() + pps.len());
    record.push(1);
    // profile, compatibility, level
    record.extend_from_slice(&sps[1..4]);
    // 4-byte NAL lengths
    record.push(0xFF);
    record.push(0xE1);
    record.extend_from_slice(&sps_len.to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1);
    record.extend_from_slice(&pps_len.to_be_bytes());
    record.extend_from_slice(pps);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_decoder_config() {
        let sps = [0x67, 0x64, 0x00, 0x1F, 0xAC];
        let pps = [0x68, 0xEE, 0x3C];
        let record = avc_decoder_config(&sps, &pps).unwrap();
        assert_eq!(&record[..6], &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE1]);
        assert_eq!(&record[6..8], &[0, 5]);
        assert_eq!(&record[8..13], &sps);
        assert_eq!(record[13], 1);
        assert_eq!(&record[14..16], &[0, 3]);
        assert_eq!(&record[16..], &pps);

        assert!(avc_decoder_config(&[0x67], &pps).is_none());
    }

    #[test]
    fn test_mismatched_container_rejected() {
        let config = MuxerConfig {
            video: VideoTrackConfig {
                codec: Codec::Av1,
                width: 64,
                height: 64,
                fps: 30,
                sps: None,
                pps: None,
            },
            audio: None,
        };
        assert!(matches!(
            create_muxer(Container::Mp4, config),
            Err(Error::ContainerCodecMismatch { .. })
        ));
    }
}
