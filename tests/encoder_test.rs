//! Integration tests for encoder functionality

mod common;

use common::*;
use slidecast::audio::AudioBlock;
use slidecast::encoder::{
    create_audio_encoder, create_video_encoder, AudioConfig, Frame, Packet, VideoConfig,
};
use slidecast::{available, available_audio, AudioCodec, Codec};

fn video_config(codec: Codec) -> VideoConfig {
    VideoConfig {
        codec,
        width: 64,
        height: 48,
        fps: 10,
        quality: 40,
        bitrate: None,
    }
}

fn frames(count: u32) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            let img = generate_numbered_image(64, 48, i);
            Frame {
                width: 64,
                height: 48,
                data: img.into_raw(),
                timestamp_us: i as i64 * 100_000,
            }
        })
        .collect()
}

fn encode_all(codec: Codec, count: u32) -> (Vec<Packet>, Option<Vec<u8>>, Option<Vec<u8>>) {
    let mut encoder = create_video_encoder(&video_config(codec), None).unwrap();
    let mut packets = Vec::new();
    for frame in frames(count) {
        packets.extend(encoder.encode(frame).unwrap());
    }
    packets.extend(encoder.flush().unwrap());
    (packets, encoder.codec_config(), encoder.pps())
}

/// Test AV1 encoder availability
#[test]
fn test_av1_available() {
    let result = available(Codec::Av1, None);
    // AV1 should be available when compiled with the av1 feature
    #[cfg(feature = "av1")]
    assert!(result.is_ok(), "AV1 should be available: {:?}", result);
    #[cfg(not(feature = "av1"))]
    assert!(result.is_err());
}

#[test]
fn test_pcm_always_available() {
    assert!(available_audio(AudioCodec::Pcm, None).is_ok());
}

#[test]
fn test_h264_availability_reported() {
    // May or may not be available depending on ffmpeg installation
    let result = available(Codec::H264, None);
    println!("H.264 availability: {:?}", result);
}

#[test]
#[cfg(feature = "av1")]
fn test_av1_one_packet_per_frame_in_order() {
    let (packets, _, _) = encode_all(Codec::Av1, 12);
    assert_eq!(packets.len(), 12);
    let timestamps: Vec<i64> = packets.iter().map(|p| p.timestamp_us).collect();
    let expected: Vec<i64> = (0..12).map(|i| i * 100_000).collect();
    assert_eq!(timestamps, expected);
    assert!(packets[0].is_keyframe);
    assert!(packets.iter().all(|p| !p.data.is_empty()));
}

#[test]
fn test_h264_access_units() {
    if available(Codec::H264, None).is_err() {
        eprintln!("ffmpeg with libx264 not found, skipping");
        return;
    }
    let (packets, sps, pps) = encode_all(Codec::H264, 12);
    assert_eq!(packets.len(), 12);
    assert!(packets.windows(2).all(|w| w[1].timestamp_us > w[0].timestamp_us));
    assert!(packets[0].is_keyframe);

    let sps = sps.expect("SPS captured");
    assert_eq!(sps[0] & 0x1F, 7);
    assert_eq!(pps.expect("PPS captured")[0] & 0x1F, 8);

    // AVCC: every sample is a chain of 4-byte length prefixed NAL units
    for packet in &packets {
        let mut offset = 0;
        while offset < packet.data.len() {
            let len = u32::from_be_bytes(packet.data[offset..offset + 4].try_into().unwrap());
            offset += 4 + len as usize;
        }
        assert_eq!(offset, packet.data.len());
    }
}

#[test]
fn test_aac_frames_timed_by_samples() {
    if available_audio(AudioCodec::Aac, None).is_err() {
        eprintln!("ffmpeg with aac not found, skipping");
        return;
    }
    let config = AudioConfig {
        codec: AudioCodec::Aac,
        sample_rate: 48_000,
        channels: 2,
        bitrate: 128_000,
    };
    let mut encoder = create_audio_encoder(&config, None).unwrap();
    assert_eq!(encoder.codec_private(), Some(vec![0x11, 0x90]));

    let mut packets = Vec::new();
    for i in 0..10 {
        let plane: Vec<f32> = (0..4800)
            .map(|n| ((i * 4800 + n) as f32 * 0.05).sin() * 0.2)
            .collect();
        let block = AudioBlock {
            timestamp_us: i as i64 * 100_000,
            sample_rate: 48_000,
            planes: vec![plane.clone(), plane],
        };
        packets.extend(encoder.encode(block).unwrap());
    }
    packets.extend(encoder.flush().unwrap());

    // one second of audio is at least 46 full 1024-sample frames
    assert!(packets.len() >= 46, "{} packets", packets.len());
    assert_eq!(packets[0].timestamp_us, 0);
    assert_eq!(packets[1].timestamp_us, 21_333);
    assert!(packets.windows(2).all(|w| w[1].timestamp_us > w[0].timestamp_us));
}

#[test]
fn test_aac_rejects_seven_channels() {
    let config = AudioConfig {
        codec: AudioCodec::Aac,
        sample_rate: 48_000,
        channels: 7,
        bitrate: 128_000,
    };
    assert!(create_audio_encoder(&config, None).is_err());
}

#[test]
fn test_opus_packets_timed_by_toc() {
    if available_audio(AudioCodec::Opus, None).is_err() {
        eprintln!("ffmpeg with libopus not found, skipping");
        return;
    }
    let config = AudioConfig {
        codec: AudioCodec::Opus,
        sample_rate: 48_000,
        channels: 2,
        bitrate: 96_000,
    };
    let mut encoder = create_audio_encoder(&config, None).unwrap();
    let head = encoder.codec_private().expect("OpusHead");
    assert_eq!(&head[..8], b"OpusHead");
    assert_eq!(head[9], 2);

    let mut packets = Vec::new();
    for i in 0..10 {
        let plane: Vec<f32> = (0..4800)
            .map(|n| ((i * 4800 + n) as f32 * 0.05).sin() * 0.2)
            .collect();
        let block = AudioBlock {
            timestamp_us: i as i64 * 100_000,
            sample_rate: 48_000,
            planes: vec![plane.clone(), plane],
        };
        packets.extend(encoder.encode(block).unwrap());
    }
    packets.extend(encoder.flush().unwrap());

    // one second in 20 ms frames, plus possible padding
    assert!(packets.len() >= 50, "{} packets", packets.len());
    assert_eq!(packets[0].timestamp_us, 0);
    assert_eq!(packets[1].timestamp_us, 20_000);
    assert!(packets.iter().all(|p| p.duration_us == 20_000));
}
