//! 32-bit float PCM "encoder"

use super::{AudioConfig, AudioEncoder, Packet};
use crate::audio::AudioBlock;
use crate::{Error, Result};

/// Packs planar blocks into interleaved little-endian f32 samples
pub struct PcmEncoder {
    config: AudioConfig,
}

impl PcmEncoder {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioEncoder for PcmEncoder {
    fn encode(&mut self, block: AudioBlock) -> Result<Vec<Packet>> {
        if block.channels() != self.config.channels as usize {
            return Err(Error::Encode(format!(
                "audio block has {} channels, encoder expects {}",
                block.channels(),
                self.config.channels
            )));
        }
        if block.frames() == 0 {
            return Ok(Vec::new());
        }
        let data = block
            .interleaved()
            .into_iter()
            .flat_map(f32::to_le_bytes)
            .collect();
        Ok(vec![Packet {
            data,
            timestamp_us: block.timestamp_us,
            duration_us: block.duration_us(),
            is_keyframe: true,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}
