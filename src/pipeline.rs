//! Render orchestration
//!
//! One run validates the project, decodes every resource, renders the audio
//! track, then walks frames `0..total_frames` in order: composite, encode,
//! hand every packet to the muxer as soon as the encoder returns it.
//! H.264 track headers need the parameter sets from the first access unit,
//! so for H.264 the muxer opens when that unit arrives.

use crate::audio::{self, AudioBuffer, BLOCK_FRAMES};
use crate::compositor::{Compositor, Resources};
use crate::config::ProjectConfig;
use crate::encoder::{
    create_audio_encoder, create_video_encoder, AudioConfig, AudioEncoder, Frame, Packet,
    VideoConfig, VideoEncoder,
};
use crate::muxer::{create_muxer, AudioTrackConfig, Muxer, MuxerConfig, Track, VideoTrackConfig};
use crate::timeline::{Timeline, SAMPLE_RATE};
use crate::{Codec, Container, EncodeOptions, Error, Result};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Frames composited between yield points
const FRAME_BATCH: u64 = 30;
/// Audio blocks encoded between yield points
const AUDIO_BATCH: usize = 10;

/// Share of the progress bar owned by the frame loop
const VIDEO_PROGRESS: f32 = 80.0;
const AUDIO_PROGRESS_END: f32 = 95.0;

/// One progress report
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 0 to 100
    pub percent: f32,
    pub message: String,
}

impl Progress {
    fn new(percent: f32, message: impl Into<String>) -> Self {
        Self {
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}

/// Shared flag that stops a run at its next yield point
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// The finished container
    pub data: Vec<u8>,
    /// Video frames submitted to the encoder
    pub frames: u64,
    /// Audio blocks submitted to the encoder
    pub audio_chunks: usize,
    /// Seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// Builds the encoder and muxer collaborators of a run
pub trait EncoderFactory {
    fn video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoEncoder>>;

    fn audio_encoder(&self, config: &AudioConfig) -> Result<Box<dyn AudioEncoder>>;

    fn muxer(&self, config: MuxerConfig) -> Result<Box<dyn Muxer>>;
}

/// Encoders and muxers selected by [`EncodeOptions`]
#[derive(Debug, Clone)]
pub struct CodecFactory {
    container: Container,
    ffmpeg_path: Option<String>,
}

impl CodecFactory {
    pub fn new(options: &EncodeOptions) -> Self {
        Self {
            container: options.container,
            ffmpeg_path: options.ffmpeg_path.clone(),
        }
    }
}

impl EncoderFactory for CodecFactory {
    fn video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoEncoder>> {
        create_video_encoder(config, self.ffmpeg_path.as_deref())
    }

    fn audio_encoder(&self, config: &AudioConfig) -> Result<Box<dyn AudioEncoder>> {
        create_audio_encoder(config, self.ffmpeg_path.as_deref())
    }

    fn muxer(&self, config: MuxerConfig) -> Result<Box<dyn Muxer>> {
        create_muxer(self.container, config)
    }
}

/// Render `config` and write the container to `options.output_path`
pub fn render(
    config: &ProjectConfig,
    options: &EncodeOptions,
    progress: impl FnMut(Progress),
) -> Result<RenderOutput> {
    let factory = CodecFactory::new(options);
    let output = render_with(config, options, &factory, progress, &CancelToken::new())?;
    std::fs::write(&options.output_path, &output.data)?;
    tracing::info!(
        path = %options.output_path,
        bytes = output.data.len(),
        "wrote output file"
    );
    Ok(output)
}

/// Render `config` with caller-supplied collaborators, returning the container bytes
#[tracing::instrument(
    skip_all,
    fields(slides = config.slides.len(), container = ?options.container, codec = ?options.codec)
)]
pub fn render_with(
    config: &ProjectConfig,
    options: &EncodeOptions,
    factory: &dyn EncoderFactory,
    mut progress: impl FnMut(Progress),
    cancel: &CancelToken,
) -> Result<RenderOutput> {
    config.validate()?;
    options.validate(config.has_audio())?;
    cancel.check()?;

    progress(Progress::new(0.0, "Preparing resources..."));
    let resources = Resources::load(config, |i, n| {
        progress(Progress::new(0.0, format!("Processing image {}/{}...", i, n)));
    })?;
    cancel.check()?;

    let timeline = Timeline::new(config);
    tracing::info!(
        frames = timeline.total_frames,
        duration = timeline.total_duration,
        "timeline ready"
    );

    let audio_track = match &config.audio {
        Some(source) => {
            progress(Progress::new(0.0, "Mixing audio..."));
            Some(audio::render_track(
                source,
                timeline.audio_sample_count(),
                options.ffmpeg_path.as_deref(),
            )?)
        }
        None => None,
    };
    cancel.check()?;

    let compositor = Compositor::new(config, resources)?;
    let (width, height) = compositor.dimensions();

    progress(Progress::new(0.0, "Configuring encoders..."));
    let video_config = VideoConfig {
        codec: options.codec,
        width,
        height,
        fps: timeline.fps,
        quality: options.quality,
        bitrate: options.video_bitrate,
    };
    let mut video_encoder = factory.video_encoder(&video_config)?;
    let audio_config = audio_track.as_ref().map(|track| AudioConfig {
        codec: options.audio_codec,
        sample_rate: SAMPLE_RATE,
        channels: track.channels() as u16,
        bitrate: options.audio_bitrate,
    });
    let mut audio_encoder = audio_config
        .as_ref()
        .map(|config| factory.audio_encoder(config))
        .transpose()?;

    let mut sink = PacketSink::new(
        factory,
        MuxerConfig {
            video: VideoTrackConfig {
                codec: options.codec,
                width,
                height,
                fps: timeline.fps,
                sps: None,
                pps: None,
            },
            audio: audio_config.map(|config| AudioTrackConfig {
                codec: config.codec,
                sample_rate: config.sample_rate,
                channels: config.channels,
                bitrate: config.bitrate,
                codec_private: audio_encoder
                    .as_ref()
                    .and_then(|encoder| encoder.codec_private()),
            }),
        },
    );
    sink.open_if_ready()?;

    encode_video(
        &compositor,
        video_encoder.as_mut(),
        &mut sink,
        options.parallel,
        &mut progress,
        cancel,
    )?;

    let audio_chunks = match (&audio_track, audio_encoder.as_deref_mut()) {
        (Some(track), Some(encoder)) => {
            encode_audio(track, encoder, &mut sink, &mut progress, cancel)?
        }
        _ => 0,
    };

    progress(Progress::new(AUDIO_PROGRESS_END, "Finalizing file..."));
    let tail = video_encoder.flush()?;
    sink.write_video(tail, &*video_encoder)?;
    if let Some(encoder) = audio_encoder.as_mut() {
        sink.write_audio(encoder.flush()?)?;
    }
    let data = sink.finalize()?;

    progress(Progress::new(100.0, "Done"));
    tracing::info!(bytes = data.len(), "render complete");

    Ok(RenderOutput {
        data,
        frames: timeline.total_frames,
        audio_chunks,
        duration: timeline.total_duration,
        width,
        height,
    })
}

/// Composite and encode every frame in order
fn encode_video(
    compositor: &Compositor,
    encoder: &mut dyn VideoEncoder,
    sink: &mut PacketSink<'_>,
    parallel: bool,
    progress: &mut impl FnMut(Progress),
    cancel: &CancelToken,
) -> Result<()> {
    let timeline = *compositor.timeline();
    let total = timeline.total_frames;
    let mut start = 0;

    while start < total {
        cancel.check()?;
        let end = (start + FRAME_BATCH).min(total);

        let frames: Vec<Frame> = if parallel {
            (start..end)
                .into_par_iter()
                .map(|index| compositor.render_frame(index))
                .collect::<Result<_>>()?
        } else {
            (start..end)
                .map(|index| compositor.render_frame(index))
                .collect::<Result<_>>()?
        };
        for frame in frames {
            let packets = encoder.encode(frame)?;
            sink.write_video(packets, &*encoder)?;
        }

        let fraction = end as f64 / total as f64;
        progress(Progress::new(
            VIDEO_PROGRESS * fraction as f32,
            format!(
                "Rendering video: {}% ({:.1} / {:.1} s)",
                (fraction * 100.0).round(),
                timeline.time_of(end).min(timeline.total_duration),
                timeline.total_duration
            ),
        ));
        std::thread::yield_now();
        start = end;
    }

    Ok(())
}

/// Encode the rendered track in 100 ms blocks
fn encode_audio(
    track: &AudioBuffer,
    encoder: &mut dyn AudioEncoder,
    sink: &mut PacketSink<'_>,
    progress: &mut impl FnMut(Progress),
    cancel: &CancelToken,
) -> Result<usize> {
    let total = track.block_count(BLOCK_FRAMES);

    progress(Progress::new(VIDEO_PROGRESS, "Encoding audio..."));
    for (index, block) in track.blocks(BLOCK_FRAMES).enumerate() {
        if index % AUDIO_BATCH == 0 {
            cancel.check()?;
            let fraction = index as f32 / total.max(1) as f32;
            progress(Progress::new(
                VIDEO_PROGRESS + (AUDIO_PROGRESS_END - VIDEO_PROGRESS) * fraction,
                "Encoding audio...",
            ));
            std::thread::yield_now();
        }
        sink.write_audio(encoder.encode(block)?)?;
    }

    Ok(total)
}

/// Forwards encoder output to the muxer
///
/// Packets are written the moment they are produced. Until the muxer can
/// open (an H.264 stream before its first access unit) they wait in
/// `pending`, which then drains into the new muxer in arrival order.
struct PacketSink<'a> {
    factory: &'a dyn EncoderFactory,
    config: MuxerConfig,
    muxer: Option<Box<dyn Muxer>>,
    pending: Vec<(Track, Packet)>,
    written: usize,
}

impl<'a> PacketSink<'a> {
    fn new(factory: &'a dyn EncoderFactory, config: MuxerConfig) -> Self {
        Self {
            factory,
            config,
            muxer: None,
            pending: Vec::new(),
            written: 0,
        }
    }

    fn headers_complete(&self) -> bool {
        let video = &self.config.video;
        video.codec != Codec::H264 || (video.sps.is_some() && video.pps.is_some())
    }

    /// Open the muxer once the track headers are known
    fn open_if_ready(&mut self) -> Result<()> {
        if self.muxer.is_none() && self.headers_complete() {
            self.open()?;
        }
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let mut muxer = self.factory.muxer(self.config.clone())?;
        tracing::debug!(pending = self.pending.len(), "muxer opened");
        for (track, packet) in self.pending.drain(..) {
            muxer.write_packet(track, packet)?;
            self.written += 1;
        }
        self.muxer = Some(muxer);
        Ok(())
    }

    fn write_video(&mut self, packets: Vec<Packet>, encoder: &dyn VideoEncoder) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        if self.muxer.is_none() {
            self.config.video.sps = encoder.codec_config();
            self.config.video.pps = encoder.pps();
            self.open_if_ready()?;
        }
        self.write(Track::Video, packets)
    }

    fn write_audio(&mut self, packets: Vec<Packet>) -> Result<()> {
        self.write(Track::Audio, packets)
    }

    fn write(&mut self, track: Track, packets: Vec<Packet>) -> Result<()> {
        match self.muxer.as_mut() {
            Some(muxer) => {
                for packet in packets {
                    muxer.write_packet(track, packet)?;
                    self.written += 1;
                }
            }
            None => self
                .pending
                .extend(packets.into_iter().map(|packet| (track, packet))),
        }
        Ok(())
    }

    /// Finish the container; a stream that never produced its parameter
    /// sets is handed to the muxer as is, which reports the problem
    fn finalize(mut self) -> Result<Vec<u8>> {
        if self.muxer.is_none() {
            self.open()?;
        }
        tracing::debug!(packets = self.written, "muxing complete");
        match self.muxer {
            Some(muxer) => muxer.finalize(),
            None => Err(Error::Mux("muxer was never opened".to_string())),
        }
    }
}
