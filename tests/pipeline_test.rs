//! Integration tests for render orchestration

mod common;

use common::*;
use slidecast::config::{IntroStyle, MediaSource, SlideSpec};
use slidecast::encoder::{
    AudioConfig, AudioEncoder, Frame, Packet, VideoConfig, VideoEncoder,
};
use slidecast::muxer::{Muxer, MuxerConfig, Track};
use slidecast::pipeline::{CodecFactory, EncoderFactory};
use slidecast::timeline::SAMPLE_RATE;
use slidecast::{
    render, render_with, AudioCodec, CancelToken, Codec, Container, EncodeOptions, Error, Phase,
    Progress, Timeline,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// What the fake collaborators saw
#[derive(Debug, Default)]
struct Record {
    video_configs: Vec<VideoConfig>,
    frame_timestamps: Vec<i64>,
    frame_checksums: Vec<u64>,
    video_flushed: bool,
    /// Packets the muxer had received when the video encoder was flushed
    muxed_at_flush: usize,
    audio_blocks: usize,
    muxed: Vec<(Track, i64)>,
    finalized: bool,
}

#[derive(Clone, Default)]
struct FakeFactory {
    record: Arc<Mutex<Record>>,
}

struct FakeVideo {
    record: Arc<Mutex<Record>>,
    duration_us: i64,
}

impl VideoEncoder for FakeVideo {
    fn encode(&mut self, frame: Frame) -> slidecast::Result<Vec<Packet>> {
        let checksum = frame
            .data
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc.wrapping_add((i as u64 + 1) * b as u64));
        let mut record = self.record.lock().unwrap();
        record.frame_timestamps.push(frame.timestamp_us);
        record.frame_checksums.push(checksum);
        Ok(vec![Packet {
            data: vec![0; 8],
            timestamp_us: frame.timestamp_us,
            duration_us: self.duration_us,
            is_keyframe: record.frame_timestamps.len() == 1,
        }])
    }

    fn flush(&mut self) -> slidecast::Result<Vec<Packet>> {
        let mut record = self.record.lock().unwrap();
        record.video_flushed = true;
        record.muxed_at_flush = record.muxed.len();
        Ok(Vec::new())
    }
}

struct FakeAudio {
    record: Arc<Mutex<Record>>,
}

impl AudioEncoder for FakeAudio {
    fn encode(&mut self, block: slidecast::audio::AudioBlock) -> slidecast::Result<Vec<Packet>> {
        self.record.lock().unwrap().audio_blocks += 1;
        Ok(vec![Packet {
            data: vec![0; 4],
            timestamp_us: block.timestamp_us,
            duration_us: block.duration_us(),
            is_keyframe: true,
        }])
    }

    fn flush(&mut self) -> slidecast::Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}

struct FakeMuxer {
    record: Arc<Mutex<Record>>,
}

impl Muxer for FakeMuxer {
    fn write_packet(&mut self, track: Track, packet: Packet) -> slidecast::Result<()> {
        self.record
            .lock()
            .unwrap()
            .muxed
            .push((track, packet.timestamp_us));
        Ok(())
    }

    fn finalize(self: Box<Self>) -> slidecast::Result<Vec<u8>> {
        self.record.lock().unwrap().finalized = true;
        Ok(b"fake container".to_vec())
    }
}

impl EncoderFactory for FakeFactory {
    fn video_encoder(&self, config: &VideoConfig) -> slidecast::Result<Box<dyn VideoEncoder>> {
        self.record
            .lock()
            .unwrap()
            .video_configs
            .push(config.clone());
        Ok(Box::new(FakeVideo {
            record: self.record.clone(),
            duration_us: config.frame_duration_us(),
        }))
    }

    fn audio_encoder(&self, _config: &AudioConfig) -> slidecast::Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(FakeAudio {
            record: self.record.clone(),
        }))
    }

    fn muxer(&self, _config: MuxerConfig) -> slidecast::Result<Box<dyn Muxer>> {
        Ok(Box::new(FakeMuxer {
            record: self.record.clone(),
        }))
    }
}

fn logo_source() -> MediaSource {
    MediaSource::Bytes(png_bytes(&generate_test_image(32, 32, [250, 220, 0, 255])))
}

/// 1 slide, no intro, no audio, 30 fps, 3 s per slide
#[test]
fn test_single_slide_renders_ninety_frames() {
    let mut config = small_project(1, 160, 100);
    config.fps = 30;
    config.slide_duration = 3.0;

    let factory = FakeFactory::default();
    let mut messages: Vec<Progress> = Vec::new();
    let output = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |p| messages.push(p),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(output.frames, 90);
    assert_eq!(output.audio_chunks, 0);
    assert!((output.duration - 3.0).abs() < 1e-9);
    assert_eq!((output.width, output.height), (160, 100));
    assert_eq!(output.data, b"fake container");

    let record = factory.record.lock().unwrap();
    assert_eq!(record.frame_timestamps.len(), 90);
    for (i, &ts) in record.frame_timestamps.iter().enumerate() {
        assert_eq!(ts, (i as f64 * 1_000_000.0 / 30.0).round() as i64);
    }
    assert!(record
        .frame_timestamps
        .windows(2)
        .all(|pair| pair[1] > pair[0]));
    assert!(record.video_flushed);
    assert!(record.finalized);
    assert_eq!(record.audio_blocks, 0);
    assert!(record.muxed.iter().all(|(track, _)| *track == Track::Video));

    let config = &record.video_configs[0];
    assert_eq!((config.width, config.height, config.fps), (160, 100, 30));
}

#[test]
fn test_packets_reach_muxer_as_encoded() {
    let mut config = small_project(1, 160, 100);
    config.fps = 30;
    config.slide_duration = 3.0;

    let factory = FakeFactory::default();
    render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |_| {},
        &CancelToken::new(),
    )
    .unwrap();

    let record = factory.record.lock().unwrap();
    assert!(record.video_flushed);
    assert_eq!(record.muxed_at_flush, 90);
    let timestamps: Vec<i64> = record.muxed.iter().map(|(_, ts)| *ts).collect();
    assert_eq!(timestamps, record.frame_timestamps);
}

#[test]
fn test_progress_messages() {
    let config = small_project(2, 160, 100);
    let factory = FakeFactory::default();
    let mut messages: Vec<Progress> = Vec::new();
    render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |p| messages.push(p),
        &CancelToken::new(),
    )
    .unwrap();

    let texts: Vec<&str> = messages.iter().map(|p| p.message.as_str()).collect();
    assert_eq!(texts[0], "Preparing resources...");
    assert!(texts.contains(&"Processing image 1/2..."));
    assert!(texts.contains(&"Processing image 2/2..."));
    assert!(texts.contains(&"Configuring encoders..."));
    assert!(texts.contains(&"Finalizing file..."));
    assert!(!texts.contains(&"Mixing audio..."));
    assert_eq!(texts.last(), Some(&"Done"));
    assert_eq!(messages.last().map(|p| p.percent), Some(100.0));

    let video: Vec<&Progress> = messages
        .iter()
        .filter(|p| p.message.starts_with("Rendering video: "))
        .collect();
    assert!(!video.is_empty());
    assert!(video.iter().all(|p| p.percent <= 80.0));
    assert!(video.windows(2).all(|w| w[1].percent >= w[0].percent));
    assert!(video.last().unwrap().message.starts_with("Rendering video: 100%"));
}

/// 3 slides with a 2 s intro at 24 fps
#[test]
fn test_intro_then_slides() {
    let mut config = small_project(3, 160, 100);
    config.fps = 24;
    config.slide_duration = 1.0;
    config.intro.enabled = true;
    config.intro.duration = 2.0;
    config.intro.style = IntroStyle::Grid;
    config.logo = Some(logo_source());

    let timeline = Timeline::new(&config);
    assert_eq!(timeline.total_frames, ((2.0 + 3.0 * 1.0) * 24.0f64).ceil() as u64);
    for frame in 0..48 {
        assert!(matches!(timeline.phase(frame), Phase::Intro { .. }));
    }
    assert!(matches!(
        timeline.phase(48),
        Phase::Slide { index: 0, .. }
    ));

    let factory = FakeFactory::default();
    let output = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |_| {},
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(output.frames, 120);
    assert_eq!(factory.record.lock().unwrap().frame_timestamps.len(), 120);
}

#[test]
fn test_missing_images_rejected_before_work() {
    let mut config = small_project(3, 160, 100);
    config.slides[0].image = None;
    config.slides[2].image = None;

    let factory = FakeFactory::default();
    let mut messages = Vec::new();
    let result = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |p| messages.push(p),
        &CancelToken::new(),
    );

    match result {
        Err(Error::ConfigValidation(message)) => {
            assert!(message.contains("slide-1"), "{}", message);
            assert!(message.contains("slide-3"), "{}", message);
            assert!(!message.contains("slide-2"), "{}", message);
        }
        other => panic!("expected a validation error, got {:?}", other.map(|o| o.frames)),
    }
    assert!(messages.is_empty());
    assert!(factory.record.lock().unwrap().video_configs.is_empty());
}

#[test]
fn test_undecodable_image_aborts() {
    let mut config = small_project(2, 160, 100);
    config.slides[1] = SlideSpec {
        id: "broken".to_string(),
        image: Some(MediaSource::Bytes(b"not an image".to_vec())),
        caption: String::new(),
    };

    let factory = FakeFactory::default();
    let result = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |_| {},
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::ResourceLoad(_))));
    assert!(!factory.record.lock().unwrap().finalized);
}

#[test]
fn test_container_codec_mismatch_rejected() {
    let config = small_project(1, 160, 100);
    let options = EncodeOptions {
        container: Container::Mp4,
        codec: Codec::Av1,
        ..EncodeOptions::default()
    };
    let result = render_with(
        &config,
        &options,
        &FakeFactory::default(),
        |_| {},
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::ContainerCodecMismatch { .. })));
}

#[test]
fn test_webm_with_audio_rejected() {
    let mut config = small_project(1, 160, 100);
    config.audio = Some(MediaSource::Bytes(wav_bytes(SAMPLE_RATE, 2, 0.5)));
    let options = EncodeOptions {
        container: Container::WebM,
        ..EncodeOptions::default()
    };
    let result = render_with(
        &config,
        &options,
        &FakeFactory::default(),
        |_| {},
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::ContainerAudioMismatch { .. })));
}

#[test]
fn test_cancel_during_frames() {
    let mut config = small_project(1, 160, 100);
    config.slide_duration = 5.0;

    let factory = FakeFactory::default();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let result = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |p| {
            if p.message.starts_with("Rendering video: ") {
                trigger.cancel();
            }
        },
        &cancel,
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    let record = factory.record.lock().unwrap();
    // one batch went through before the cancel was seen
    assert_eq!(record.frame_timestamps.len(), 30);
    assert!(!record.video_flushed);
    assert!(!record.finalized);
}

#[test]
fn test_parallel_matches_sequential() {
    let mut config = small_project(2, 160, 100);
    config.slide_duration = 1.5;
    config.transition = slidecast::config::TransitionKind::Slide;

    let run = |parallel: bool| {
        let factory = FakeFactory::default();
        let options = EncodeOptions {
            parallel,
            ..EncodeOptions::default()
        };
        render_with(&config, &options, &factory, |_| {}, &CancelToken::new()).unwrap();
        let record = factory.record.lock().unwrap();
        (
            record.frame_timestamps.clone(),
            record.frame_checksums.clone(),
        )
    };

    let sequential = run(false);
    let parallel = run(true);
    assert_eq!(sequential.0.len(), 90);
    assert_eq!(sequential, parallel);
}

#[test]
fn test_audio_track_is_blocked_and_muxed() {
    if !ffmpeg_available() {
        eprintln!("ffmpeg not found, skipping");
        return;
    }
    let mut config = small_project(1, 160, 100);
    config.slide_duration = 1.0;
    // shorter than the video, so it loops
    config.audio = Some(MediaSource::Bytes(wav_bytes(44_100, 2, 0.3)));

    let factory = FakeFactory::default();
    let mut messages = Vec::new();
    let output = render_with(
        &config,
        &EncodeOptions::default(),
        &factory,
        |p| messages.push(p.message),
        &CancelToken::new(),
    )
    .unwrap();

    // 48000 samples in 4800-sample blocks
    assert_eq!(output.audio_chunks, 10);
    assert!(messages.iter().any(|m| m == "Mixing audio..."));
    assert!(messages.iter().any(|m| m == "Encoding audio..."));

    let record = factory.record.lock().unwrap();
    assert_eq!(record.audio_blocks, 10);
    let audio: Vec<i64> = record
        .muxed
        .iter()
        .filter(|(track, _)| *track == Track::Audio)
        .map(|(_, ts)| *ts)
        .collect();
    assert_eq!(audio.len(), 10);
    assert_eq!(audio[1], 100_000);
}

#[test]
#[cfg(feature = "av1")]
fn test_av1_matroska_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.mkv");

    let mut config = small_project(2, 160, 100);
    config.fps = 10;
    config.slide_duration = 1.0;

    let options = EncodeOptions {
        output_path: path.display().to_string(),
        container: Container::Matroska,
        codec: Codec::Av1,
        audio_codec: AudioCodec::Pcm,
        quality: 30,
        ..EncodeOptions::default()
    };
    let output = render(&config, &options, |_| {}).unwrap();
    assert_eq!(output.frames, 20);

    let data = std::fs::read(&path).unwrap();
    assert_eq!(data, output.data);
    assert!(verify_ebml_header(&data, "matroska"));
    assert_eq!(count_pattern(&data, b"V_AV1"), 1);
    // at least one cluster
    assert!(count_pattern(&data, &[0x1F, 0x43, 0xB6, 0x75]) >= 1);
}

#[test]
#[cfg(feature = "av1")]
fn test_av1_webm_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.webm");

    let mut config = small_project(1, 160, 100);
    config.fps = 10;
    config.slide_duration = 1.0;

    let options = EncodeOptions {
        output_path: path.display().to_string(),
        container: Container::WebM,
        codec: Codec::Av1,
        ..EncodeOptions::default()
    };
    let factory = CodecFactory::new(&options);
    let output = render_with(&config, &options, &factory, |_| {}, &CancelToken::new()).unwrap();
    assert!(verify_ebml_header(&output.data, "webm"));
    // render_with leaves the filesystem alone
    assert!(!path.exists());
}

#[test]
#[cfg(feature = "av1")]
fn test_av1_opus_webm_end_to_end() {
    if slidecast::available_audio(AudioCodec::Opus, None).is_err() {
        eprintln!("ffmpeg with libopus not found, skipping");
        return;
    }
    let mut config = small_project(1, 160, 100);
    config.fps = 10;
    config.slide_duration = 1.0;
    config.audio = Some(MediaSource::Bytes(wav_bytes(SAMPLE_RATE, 2, 1.0)));

    let options = EncodeOptions {
        container: Container::WebM,
        codec: Codec::Av1,
        audio_codec: AudioCodec::Opus,
        ..EncodeOptions::default()
    };
    let factory = CodecFactory::new(&options);
    let output = render_with(&config, &options, &factory, |_| {}, &CancelToken::new()).unwrap();
    assert_eq!(output.audio_chunks, 10);
    assert!(verify_ebml_header(&output.data, "webm"));
    assert_eq!(count_pattern(&output.data, b"A_OPUS"), 1);
    assert_eq!(count_pattern(&output.data, b"OpusHead"), 1);
}

#[test]
fn test_h264_aac_mp4_end_to_end() {
    if !ffmpeg_available()
        || slidecast::available(Codec::H264, None).is_err()
        || slidecast::available_audio(AudioCodec::Aac, None).is_err()
    {
        eprintln!("ffmpeg with libx264/aac not found, skipping");
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.mp4");

    let mut config = small_project(2, 160, 100);
    config.fps = 15;
    config.slide_duration = 1.0;
    config.audio = Some(MediaSource::Bytes(wav_bytes(SAMPLE_RATE, 2, 1.0)));

    let options = EncodeOptions {
        output_path: path.display().to_string(),
        container: Container::Mp4,
        codec: Codec::H264,
        audio_codec: AudioCodec::Aac,
        ..EncodeOptions::default()
    };
    let output = render(&config, &options, |_| {}).unwrap();
    assert_eq!(output.frames, 30);
    assert_eq!(output.audio_chunks, 20);

    let data = std::fs::read(&path).unwrap();
    assert!(verify_mp4_header(&data));
    assert!(count_pattern(&data, b"avc1") >= 1);
    assert!(count_pattern(&data, b"mp4a") >= 1);
}

#[test]
fn test_h264_matroska_end_to_end() {
    if !ffmpeg_available() || slidecast::available(Codec::H264, None).is_err() {
        eprintln!("ffmpeg with libx264 not found, skipping");
        return;
    }
    let mut config = small_project(1, 160, 100);
    config.fps = 10;
    config.slide_duration = 1.0;

    let options = EncodeOptions {
        container: Container::Matroska,
        codec: Codec::H264,
        ..EncodeOptions::default()
    };
    let factory = CodecFactory::new(&options);
    let output = render_with(&config, &options, &factory, |_| {}, &CancelToken::new()).unwrap();
    assert!(verify_ebml_header(&output.data, "matroska"));
    assert_eq!(count_pattern(&output.data, b"V_MPEG4/ISO/AVC"), 1);
}
