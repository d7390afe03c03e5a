//! Immutable configuration: [`FormatParameters`] and [`PhaseLengths`].
//!
//! Frame rates are kept as exact rationals (`num_rational::Ratio<i64>`)
//! end-to-end rather than truncated to a float or integer frames-per-second.
//! This is the single most important correctness constraint in the whole
//! codec (spec.md §9): any component that needs `samples_per_frame` must
//! derive it from `fps` at the point of use, never precompute and round it
//! once up front.

use num_rational::Ratio;

/// Frames-per-second as an exact rational (e.g. 25/1 for PAL, 30000/1001 for
/// NTSC). Using `Ratio<i64>` rather than `f64` keeps the generator's
/// frame-boundary arithmetic exact to the precision of `i64`.
pub type Fps = Ratio<i64>;

/// Immutable parameters describing one video/audio format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatParameters {
    pub fps: Fps,
    pub video_width: u32,
    pub video_height: u32,
    pub audio_sample_rate: u32,
}

impl FormatParameters {
    /// PAL: 25/1 fps, 720x576, 48 kHz mono.
    pub fn pal() -> Self {
        Self {
            fps: Ratio::new(25, 1),
            video_width: 720,
            video_height: 576,
            audio_sample_rate: 48_000,
        }
    }

    /// NTSC: 30000/1001 fps, 720x480, 48 kHz mono.
    pub fn ntsc() -> Self {
        Self {
            fps: Ratio::new(30_000, 1_001),
            video_width: 720,
            video_height: 480,
            audio_sample_rate: 48_000,
        }
    }

    /// `sample_rate / fps` as an exact floating-point quantity. Must never be
    /// truncated to an integer before use — callers multiply it by a frame
    /// index and round per-frame instead (see [`crate::pattern`]).
    pub fn samples_per_frame_exact(&self) -> f64 {
        self.audio_sample_rate as f64 / fps_as_f64(self.fps)
    }
}

/// Convert an exact rational fps to `f64` for use in rounding arithmetic.
/// Rounding happens downstream of this conversion, never here.
pub fn fps_as_f64(fps: Fps) -> f64 {
    *fps.numer() as f64 / *fps.denom() as f64
}

/// Round-half-away-from-zero, matching the spec's `round()` in frame-exact
/// boundary formulas (e.g. `round(k * samples_per_frame_exact)`).
pub fn round_half_away_from_zero(x: f64) -> i64 {
    x.round() as i64
}

/// The fixed 4-phase cycle structure (spec.md §3/§4.3), in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseLengths {
    pub test_chart_frames: u32,
    pub pre_silence_frames: u32,
    pub timecode_frames: u32,
    pub post_silence_frames: u32,
}

impl PhaseLengths {
    pub fn total_frames(&self) -> u32 {
        self.test_chart_frames
            + self.pre_silence_frames
            + self.timecode_frames
            + self.post_silence_frames
    }
}

impl Default for PhaseLengths {
    /// Default PAL phase lengths: 75 / 25 / 750 / 25 frames (35.00 s at 25 fps).
    fn default() -> Self {
        Self {
            test_chart_frames: 75,
            pre_silence_frames: 25,
            timecode_frames: 750,
            post_silence_frames: 25,
        }
    }
}

impl PhaseLengths {
    /// Same wall-clock durations as the PAL default, with frame counts
    /// rounded to the nearest frame at `fps` (spec.md §4.3: "For NTSC, use
    /// the same wall-clock durations and round frames to nearest").
    pub fn for_fps(fps: Fps) -> Self {
        let pal = Self::default();
        let pal_fps = Ratio::new(25i64, 1);
        let scale = fps_as_f64(fps) / fps_as_f64(pal_fps);
        Self {
            test_chart_frames: (pal.test_chart_frames as f64 * scale).round() as u32,
            pre_silence_frames: (pal.pre_silence_frames as f64 * scale).round() as u32,
            timecode_frames: (pal.timecode_frames as f64 * scale).round() as u32,
            post_silence_frames: (pal.post_silence_frames as f64 * scale).round() as u32,
        }
    }
}
