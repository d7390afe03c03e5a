//! Correlator: pairs audio and video timecode detections carrying the same
//! frame id and reduces the pairs to a sync-offset statistic (spec.md §4.5).
//!
//! Matching is sequential, not an exhaustive cross product: `spec.md`
//! explicitly calls this out because a naive "every audio detection against
//! every video detection with a matching id" approach produces spurious
//! pairings whenever a frame id repeats across more than one cycle. Instead,
//! each id's audio and video occurrences are consumed in the temporal order
//! they were detected, one-for-one, so the n-th sighting of id `k` on the
//! audio side only ever pairs with the n-th sighting of id `k` on the video
//! side.

use std::collections::{HashMap, VecDeque};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::detection::{AudioDetection, VideoDetection};
use crate::format::{fps_as_f64, FormatParameters};

/// One successfully paired audio/video detection.
///
/// Field names follow spec.md §6's `OffsetReport` serialisation contract
/// exactly (`video_time_seconds`/`audio_time_seconds`, not raw sample/frame
/// indices) since this struct is what gets persisted as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetMatch {
    pub frame_id: u32,
    pub video_time_seconds: f64,
    pub audio_time_seconds: f64,
    /// `audio_time_seconds - video_time_seconds`; positive means audio lags
    /// video.
    pub offset_seconds: f64,
    /// Mean of the two detections' individual confidences.
    pub confidence: f64,
}

/// Aggregate statistics over every matched pair.
///
/// All of `mean_offset_seconds`, `std_dev_seconds`, `min_offset_seconds`,
/// `max_offset_seconds`, and `mean_confidence` are `0.0` and meaningless
/// when `match_count == 0` — callers must check `match_count` first rather
/// than trusting the numeric fields on their own (spec.md §7: no matches is
/// a normal outcome, not an error, so there's no `Result` to short-circuit
/// on here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetReport {
    pub mean_offset_seconds: f64,
    pub std_dev_seconds: f64,
    pub min_offset_seconds: f64,
    pub max_offset_seconds: f64,
    pub match_count: usize,
    pub mean_confidence: f64,
    pub matches: Vec<OffsetMatch>,
    pub outliers_trimmed: usize,
}

/// Tuning for the correlation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// After computing the initial mean/stddev, drop matches more than 3
    /// standard deviations from the mean and recompute statistics on the
    /// remainder. Off by default: outlier trimming changes the reported
    /// offset and should be an explicit caller choice.
    pub trim_outliers: bool,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self { trim_outliers: false }
    }
}

/// Match audio and video detections by frame id and reduce to an offset
/// report. `audio` and `video` need not be pre-sorted; this function sorts
/// its own working copies by position before grouping.
pub fn correlate(
    audio: &[AudioDetection],
    video: &[VideoDetection],
    format: &FormatParameters,
    config: &CorrelatorConfig,
) -> OffsetReport {
    let mut audio_sorted = audio.to_vec();
    audio_sorted.sort_by_key(|d| d.sample_position);
    let mut video_sorted = video.to_vec();
    video_sorted.sort_by_key(|d| d.video_frame_index);

    let mut audio_by_id: HashMap<u32, VecDeque<AudioDetection>> = HashMap::new();
    for detection in audio_sorted {
        audio_by_id.entry(detection.frame_id).or_default().push_back(detection);
    }
    let mut video_by_id: HashMap<u32, VecDeque<VideoDetection>> = HashMap::new();
    for detection in video_sorted {
        video_by_id.entry(detection.frame_id).or_default().push_back(detection);
    }

    let sample_rate = format.audio_sample_rate as f64;
    let fps = fps_as_f64(format.fps);

    let mut matches = Vec::new();
    for (frame_id, mut audio_queue) in audio_by_id {
        let Some(mut video_queue) = video_by_id.remove(&frame_id) else {
            continue;
        };
        while let (Some(a), Some(v)) = (audio_queue.pop_front(), video_queue.pop_front()) {
            let audio_time = a.sample_position as f64 / sample_rate;
            let video_time = v.video_frame_index as f64 / fps;
            matches.push(OffsetMatch {
                frame_id,
                video_time_seconds: video_time,
                audio_time_seconds: audio_time,
                offset_seconds: audio_time - video_time,
                confidence: (a.confidence + v.confidence) / 2.0,
            });
        }
    }

    matches.sort_by(|a, b| a.audio_time_seconds.partial_cmp(&b.audio_time_seconds).unwrap());
    let report = build_report(matches, config);
    info!(
        "correlated {} audio / {} video detections into {} matches, mean_offset={:.6}s",
        audio.len(),
        video.len(),
        report.match_count,
        report.mean_offset_seconds
    );
    report
}

fn build_report(matches: Vec<OffsetMatch>, config: &CorrelatorConfig) -> OffsetReport {
    if matches.is_empty() {
        return OffsetReport {
            mean_offset_seconds: 0.0,
            std_dev_seconds: 0.0,
            min_offset_seconds: 0.0,
            max_offset_seconds: 0.0,
            match_count: 0,
            mean_confidence: 0.0,
            matches,
            outliers_trimmed: 0,
        };
    }

    let (mean, std_dev) = offset_mean_stddev(&matches);

    if !config.trim_outliers || matches.len() < 2 {
        return finish_report(matches, mean, std_dev, 0);
    }

    let lower = mean - 3.0 * std_dev;
    let upper = mean + 3.0 * std_dev;
    let trimmed: Vec<OffsetMatch> = matches
        .iter()
        .copied()
        .filter(|m| m.offset_seconds >= lower && m.offset_seconds <= upper)
        .collect();

    if trimmed.is_empty() || trimmed.len() == matches.len() {
        return finish_report(matches, mean, std_dev, 0);
    }

    let outliers_trimmed = matches.len() - trimmed.len();
    warn!("outlier trimming dropped {outliers_trimmed} match(es) beyond 3σ of the mean offset");
    let (trimmed_mean, trimmed_std_dev) = offset_mean_stddev(&trimmed);
    finish_report(trimmed, trimmed_mean, trimmed_std_dev, outliers_trimmed)
}

fn offset_mean_stddev(matches: &[OffsetMatch]) -> (f64, f64) {
    let n = matches.len() as f64;
    let mean = matches.iter().map(|m| m.offset_seconds).sum::<f64>() / n;
    let variance = matches
        .iter()
        .map(|m| (m.offset_seconds - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

fn finish_report(matches: Vec<OffsetMatch>, mean: f64, std_dev: f64, outliers_trimmed: usize) -> OffsetReport {
    let min = matches
        .iter()
        .map(|m| m.offset_seconds)
        .fold(f64::INFINITY, f64::min);
    let max = matches
        .iter()
        .map(|m| m.offset_seconds)
        .fold(f64::NEG_INFINITY, f64::max);
    let mean_confidence = matches.iter().map(|m| m.confidence).sum::<f64>() / matches.len() as f64;
    OffsetReport {
        mean_offset_seconds: mean,
        std_dev_seconds: std_dev,
        min_offset_seconds: min,
        max_offset_seconds: max,
        match_count: matches.len(),
        mean_confidence,
        matches,
        outliers_trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PhaseLengths;
    use crate::framecodec::{decode_audio_timecodes, decode_frame_visual, DecodeMode};
    use crate::locker::lock_cycles;
    use crate::pattern::{generate_cycle, CyclePhase};

    #[test]
    fn end_to_end_reference_cycle_yields_sub_sample_offset() {
        let format = FormatParameters::pal();
        let phases = PhaseLengths {
            test_chart_frames: 5,
            pre_silence_frames: 3,
            timecode_frames: 40,
            post_silence_frames: 3,
        };
        let mut audio = Vec::new();
        let mut video_frames = Vec::new();
        generate_cycle(
            &format,
            &phases,
            |s| audio.extend_from_slice(s),
            |phase, frame| {
                if phase == CyclePhase::Timecode {
                    video_frames.push(frame.clone());
                }
            },
        )
        .unwrap();

        let locked = lock_cycles(&audio, &format, &phases);
        assert_eq!(locked.regions.len(), 1, "reason={:?}", locked.reason);
        let region = &locked.regions[0];

        let timecode_audio = &audio[region.audio_sample_start as usize..region.audio_sample_end as usize];
        let audio_detections =
            decode_audio_timecodes(timecode_audio, &format, DecodeMode::Strict, region.audio_sample_start)
                .unwrap();

        let video_detections: Vec<VideoDetection> = video_frames
            .iter()
            .enumerate()
            .filter_map(|(i, frame)| {
                decode_frame_visual(frame).map(|d| VideoDetection {
                    video_frame_index: region.video_frame_start + i as u64,
                    frame_id: d.frame_id,
                    confidence: d.confidence,
                })
            })
            .collect();

        let report = correlate(&audio_detections, &video_detections, &format, &CorrelatorConfig::default());
        assert!(report.match_count >= (phases.timecode_frames as usize * 9) / 10);
        assert!(
            report.mean_offset_seconds.abs() < 1.0 / format.audio_sample_rate as f64,
            "mean_offset_seconds={}",
            report.mean_offset_seconds
        );
    }

    fn fmt() -> FormatParameters {
        FormatParameters::pal()
    }

    #[test]
    fn no_matches_when_no_shared_ids() {
        let audio = vec![AudioDetection { sample_position: 0, frame_id: 1, confidence: 0.9 }];
        let video = vec![VideoDetection { video_frame_index: 0, frame_id: 2, confidence: 0.9 }];
        let report = correlate(&audio, &video, &fmt(), &CorrelatorConfig::default());
        assert_eq!(report.match_count, 0);
    }

    #[test]
    fn matches_same_id_and_computes_offset() {
        let format = fmt();
        // Video frame 10 at 25fps lands at t=0.4s; audio at sample 19200 at
        // 48kHz lands at t=0.4s plus a 0.1s offset = 0.5s -> sample 24000.
        let audio = vec![AudioDetection { sample_position: 24_000, frame_id: 10, confidence: 1.0 }];
        let video = vec![VideoDetection { video_frame_index: 10, frame_id: 10, confidence: 1.0 }];
        let report = correlate(&audio, &video, &format, &CorrelatorConfig::default());
        assert_eq!(report.match_count, 1);
        assert!((report.mean_offset_seconds - 0.1).abs() < 1e-9);
    }

    #[test]
    fn repeated_ids_across_cycles_pair_in_occurrence_order_not_cross_product() {
        let audio = vec![
            AudioDetection { sample_position: 100, frame_id: 0, confidence: 1.0 },
            AudioDetection { sample_position: 50_100, frame_id: 0, confidence: 1.0 },
        ];
        let video = vec![
            VideoDetection { video_frame_index: 1000, frame_id: 0, confidence: 1.0 },
            VideoDetection { video_frame_index: 2000, frame_id: 0, confidence: 1.0 },
        ];
        let report = correlate(&audio, &video, &fmt(), &CorrelatorConfig::default());
        // Exactly 2 matches (first-with-first, second-with-second), never
        // the 4 a cross product would produce.
        assert_eq!(report.match_count, 2);
    }

    #[test]
    fn outlier_trimming_drops_far_outlier_and_reduces_spread() {
        let audio: Vec<AudioDetection> = (0..10)
            .map(|i| AudioDetection {
                sample_position: 48_000 + i * 100,
                frame_id: i as u32,
                confidence: 1.0,
            })
            .collect();
        let mut video: Vec<VideoDetection> = (0..10)
            .map(|i| VideoDetection { video_frame_index: i as u64, frame_id: i as u32, confidence: 1.0 })
            .collect();
        // Make one detection a wild outlier by shifting its frame index far away.
        video[5].video_frame_index = 100_000;

        let config = CorrelatorConfig { trim_outliers: true };
        let report = correlate(&audio, &video, &fmt(), &config);
        assert_eq!(report.outliers_trimmed, 1);
        assert_eq!(report.match_count, 9);
    }

    #[test]
    fn empty_inputs_yield_zeroed_report_not_panic() {
        let report = correlate(&[], &[], &fmt(), &CorrelatorConfig::default());
        assert_eq!(report.match_count, 0);
        assert_eq!(report.mean_offset_seconds, 0.0);
    }
}
