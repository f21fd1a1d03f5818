//! Timeline model: durations, frame count and the phase of every frame

use crate::config::ProjectConfig;
use serde::Serialize;

/// Seconds spent blending into the next slide, at the end of each slide
pub const TRANSITION_DURATION: f64 = 0.8;
/// Seconds at the end of the intro during which the first slide fades in
pub const INTRO_CROSSFADE_DURATION: f64 = 0.5;
/// Audio sample rate for the rendered track and every audio encoder
pub const SAMPLE_RATE: u32 = 48_000;

// Absorbs binary floating point noise in products such as 2.1 * 3 * 30
const EPSILON: f64 = 1e-9;

/// Derived, read-only timing values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timeline {
    pub fps: u32,
    pub slide_count: usize,
    /// Zero when the intro is disabled
    pub intro_duration: f64,
    pub slide_duration: f64,
    pub transition_duration: f64,
    pub text_anim_duration: f64,
    pub total_duration: f64,
    pub total_frames: u64,
}

/// What a frame shows
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Intro choreography at global time `time`
    Intro {
        time: f64,
        /// Opacity of the incoming first slide during the last half second
        crossfade: Option<f64>,
    },
    /// Static display of one slide
    Slide { index: usize, local_time: f64 },
    /// Blend from `from` into `to`; `progress` runs 0..1 over the transition window
    Transition {
        from: usize,
        to: usize,
        local_time: f64,
        progress: f64,
    },
}

impl Timeline {
    /// Derive the timeline from a validated configuration
    pub fn new(config: &ProjectConfig) -> Self {
        let fps = config.fps;
        let slide_count = config.slides.len();
        let intro_duration = if config.intro.enabled {
            config.intro.duration
        } else {
            0.0
        };
        let slide_duration = config.slide_duration;
        let total_duration = intro_duration + slide_count as f64 * slide_duration;
        let total_frames = (total_duration * fps as f64 - EPSILON).ceil().max(0.0) as u64;

        Self {
            fps,
            slide_count,
            intro_duration,
            slide_duration,
            transition_duration: TRANSITION_DURATION,
            text_anim_duration: (slide_duration * 0.6).min(1.5),
            total_duration,
            total_frames,
        }
    }

    /// Global time of a frame in seconds
    pub fn time_of(&self, frame: u64) -> f64 {
        frame as f64 / self.fps as f64
    }

    /// Presentation timestamp of a frame in microseconds
    pub fn timestamp_us(&self, frame: u64) -> i64 {
        (frame as f64 * (1_000_000.0 / self.fps as f64)).round() as i64
    }

    /// Number of samples in the rendered audio track
    pub fn audio_sample_count(&self) -> usize {
        (SAMPLE_RATE as f64 * self.total_duration).round() as usize
    }

    /// Phase of the frame at `frame`
    pub fn phase(&self, frame: u64) -> Phase {
        let time = self.time_of(frame);

        if self.intro_duration > 0.0 && time < self.intro_duration {
            let fade_start = self.intro_duration - INTRO_CROSSFADE_DURATION;
            let crossfade = (time > fade_start)
                .then(|| ((time - fade_start) / INTRO_CROSSFADE_DURATION).clamp(0.0, 1.0));
            return Phase::Intro { time, crossfade };
        }

        let elapsed = (time - self.intro_duration).max(0.0);
        let slot = (elapsed / self.slide_duration + EPSILON).floor();
        let local_time = (elapsed - slot * self.slide_duration).max(0.0);
        let count = self.slide_count.max(1);
        let index = (slot as usize) % count;

        let transition_start = self.slide_duration - self.transition_duration;
        if local_time > transition_start {
            let progress =
                ((local_time - transition_start) / self.transition_duration).clamp(0.0, 1.0);
            Phase::Transition {
                from: index,
                to: (index + 1) % count,
                local_time,
                progress,
            }
        } else {
            Phase::Slide { index, local_time }
        }
    }

    /// Text reveal progress `p` for a slide at `local_time`
    pub fn text_progress(&self, local_time: f64) -> f64 {
        ((local_time - 0.2) / self.text_anim_duration).clamp(0.0, 1.0)
    }
}
