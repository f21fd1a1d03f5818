//! AV1 encoder using rav1e

use super::{Frame, Packet, VideoConfig, VideoEncoder};
use crate::{Error, Result};
use rav1e::prelude::*;

/// AV1 encoder using rav1e
pub struct Av1Encoder {
    context: Context<u8>,
    config: VideoConfig,
    /// Timestamps of submitted frames, indexed by input frame number
    timestamps: Vec<i64>,
}

impl Av1Encoder {
    /// Create a new AV1 encoder
    pub fn new(config: VideoConfig) -> Result<Self> {
        // Higher quality = lower quantizer
        let quantizer = ((100 - config.quality.min(100)) as usize * 255) / 100;
        let min_quantizer = (quantizer.saturating_sub(10)) as u8;
        let bitrate = config
            .bitrate
            .map_or(0, |b| b.min(i32::MAX as u32) as i32);

        let enc_config = rav1e::config::EncoderConfig {
            width: config.width as usize,
            height: config.height as usize,
            speed_settings: SpeedSettings::from_preset(6),
            time_base: Rational::new(1, config.fps as u64),
            sample_aspect_ratio: Rational::new(1, 1),
            bit_depth: 8,
            chroma_sampling: ChromaSampling::Cs420,
            chroma_sample_position: ChromaSamplePosition::Unknown,
            pixel_range: PixelRange::Limited,
            color_description: None,
            mastering_display: None,
            content_light: None,
            enable_timing_info: false,
            still_picture: false,
            error_resilient: false,
            switch_frame_interval: 0,
            min_key_frame_interval: 0,
            max_key_frame_interval: 240,
            reservoir_frame_delay: None,
            low_latency: false,
            quantizer,
            min_quantizer,
            bitrate,
            tune: Tune::Psychovisual,
            tile_cols: 0,
            tile_rows: 0,
            tiles: 0,
            ..Default::default()
        };

        let rav1e_config = Config::new()
            .with_encoder_config(enc_config)
            .with_threads(0);

        let context = rav1e_config
            .new_context()
            .map_err(|e| Error::Encode(format!("Failed to create AV1 context: {}", e)))?;

        tracing::debug!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            quantizer,
            bitrate,
            "configured AV1 encoder"
        );

        Ok(Self {
            context,
            config,
            timestamps: Vec::new(),
        })
    }

    /// Convert an RGBA frame to BT.601 YUV 4:2:0
    fn rgba_to_yuv420(&self, frame: &Frame) -> rav1e::Frame<u8> {
        let mut yuv_frame = self.context.new_frame();

        let width = frame.width as usize;
        let height = frame.height as usize;

        let mut luma = vec![0u8; width * height];
        for (px, y) in frame.data.chunks_exact(4).zip(luma.iter_mut()) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            *y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
        }

        // U and V planes (subsampled 2x2)
        let uv_width = width.div_ceil(2);
        let uv_height = height.div_ceil(2);
        let mut u_plane = vec![0u8; uv_width * uv_height];
        let mut v_plane = vec![0u8; uv_width * uv_height];

        for y in 0..uv_height {
            for x in 0..uv_width {
                let mut sum = [0u32; 3];
                for dy in 0..2 {
                    for dx in 0..2 {
                        let sx = (x * 2 + dx).min(width - 1);
                        let sy = (y * 2 + dy).min(height - 1);
                        let idx = (sy * width + sx) * 4;
                        for (c, s) in sum.iter_mut().enumerate() {
                            *s += frame.data[idx + c] as u32;
                        }
                    }
                }

                let r = (sum[0] / 4) as f32;
                let g = (sum[1] / 4) as f32;
                let b = (sum[2] / 4) as f32;

                let u = ((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0).clamp(0.0, 255.0) as u8;
                let v = ((0.500 * r - 0.419 * g - 0.081 * b) + 128.0).clamp(0.0, 255.0) as u8;

                u_plane[y * uv_width + x] = u;
                v_plane[y * uv_width + x] = v;
            }
        }

        // rav1e planes are padded, so rows go through the stride-aware copy
        yuv_frame.planes[0].copy_from_raw_u8(&luma, width, 1);
        yuv_frame.planes[1].copy_from_raw_u8(&u_plane, uv_width, 1);
        yuv_frame.planes[2].copy_from_raw_u8(&v_plane, uv_width, 1);

        yuv_frame
    }

    fn to_packet(&self, pkt: rav1e::Packet<u8>) -> Packet {
        let frame_duration = self.config.frame_duration_us();
        let index = pkt.input_frameno as usize;
        let timestamp_us = self
            .timestamps
            .get(index)
            .copied()
            .unwrap_or(index as i64 * frame_duration);
        Packet {
            data: pkt.data,
            timestamp_us,
            duration_us: frame_duration,
            is_keyframe: pkt.frame_type == FrameType::KEY,
        }
    }

    fn receive_packets(&mut self, draining: bool) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();

        loop {
            match self.context.receive_packet() {
                Ok(pkt) => packets.push(self.to_packet(pkt)),
                Err(EncoderStatus::Encoded) => continue,
                Err(EncoderStatus::NeedMoreData) => break,
                Err(EncoderStatus::LimitReached) => break,
                Err(e) if !draining => {
                    return Err(Error::Encode(format!("AV1 encoding error: {}", e)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "AV1 encoder stopped while draining");
                    break;
                }
            }
        }

        Ok(packets)
    }
}

impl VideoEncoder for Av1Encoder {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>> {
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(Error::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }
        let yuv_frame = self.rgba_to_yuv420(&frame);

        self.context
            .send_frame(yuv_frame)
            .map_err(|e| Error::Encode(format!("Failed to send frame: {}", e)))?;

        self.timestamps.push(frame.timestamp_us);
        self.receive_packets(false)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        self.context.flush();
        self.receive_packets(true)
    }
}
