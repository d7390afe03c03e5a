//! Cycle Locker: finds cycle boundaries in a captured audio stream by
//! tracking its RMS envelope, without any prior knowledge of where a cycle
//! starts (spec.md §4.4). This is what makes the Correlator usable against
//! a real VHS capture instead of only against audio generated in lock-step
//! by [`crate::pattern`].

use log::{debug, info, warn};

use crate::format::{round_half_away_from_zero, FormatParameters, PhaseLengths};

/// RMS classification of one envelope window.
///
/// Thresholds are expressed here as normalized `[-1.0, 1.0]`-scale floats.
/// The spec's boundary values (RMS > 1000 is High, RMS < 100 is Low) were
/// written against 16-bit PCM; this codec works in normalized `f32` samples
/// throughout, so both thresholds are divided by `32768.0` to carry the same
/// meaning (see DESIGN.md for this conversion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmsLevel {
    High,
    Low,
    Ambiguous,
}

const RMS_HIGH_THRESHOLD: f64 = 1000.0 / 32768.0;
const RMS_LOW_THRESHOLD: f64 = 100.0 / 32768.0;

fn classify_rms(rms: f64) -> RmsLevel {
    if rms > RMS_HIGH_THRESHOLD {
        RmsLevel::High
    } else if rms < RMS_LOW_THRESHOLD {
        RmsLevel::Low
    } else {
        RmsLevel::Ambiguous
    }
}

/// `(window_start_sample, rms)` for consecutive, non-overlapping windows of
/// `window` samples, hopping by `hop`. The tail shorter than one window is
/// dropped rather than padded.
fn rms_envelope(samples: &[f32], window: usize, hop: usize) -> Vec<(usize, f64)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    while start + window <= samples.len() {
        let sum_sq: f64 = samples[start..start + window]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        out.push((start, (sum_sq / window as f64).sqrt()));
        start += hop;
    }
    out
}

/// One located cycle, with every phase boundary derived frame-exactly from
/// the detected Test Chart onset.
///
/// `video_frame_start`/`video_frame_end` and `audio_sample_start`/
/// `audio_sample_end` name the Timecode phase specifically — the only
/// phase a decoder ever processes (spec.md glossary) — matching the
/// external-interface field names in spec.md §6's worked scenarios. The
/// remaining fields locate the other phases for callers that want them
/// (e.g. to re-validate Pre/Post-Silence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedRegion {
    pub cycle_index: u64,
    pub video_frame_start: u64,
    pub video_frame_end: u64,
    pub audio_sample_start: u64,
    pub audio_sample_end: u64,
    pub test_chart_start_sample: u64,
    pub pre_silence_start_sample: u64,
    pub cycle_end_sample: u64,
}

impl LockedRegion {
    pub fn timecode_span(&self) -> (u64, u64) {
        (self.audio_sample_start, self.audio_sample_end)
    }
}

/// Result of a lock attempt. Finding zero cycles is a normal outcome (no
/// signal present, or the capture doesn't contain one), not an error —
/// `reason` carries a human-readable explanation for logging/diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct LockOutcome {
    pub regions: Vec<LockedRegion>,
    pub reason: Option<String>,
}

/// Scan `samples` for cycle boundaries matching `phases`' structure at
/// `format`'s frame rate.
///
/// Detection heuristic (spec.md §4.4): a candidate cycle starts at the
/// onset of a High-RMS run at least 80% as long as the Test Chart phase,
/// immediately followed by a Low-RMS run at least 50% as long as the
/// Pre-Silence phase. From that onset, every subsequent phase boundary is
/// derived by frame-exact arithmetic (`round(frames * samples_per_frame)`)
/// rather than by continuing to track the envelope — once the Test Chart
/// onset is known, the rest of the cycle's shape is fully determined by
/// `phases` and `format`.
pub fn lock_cycles(samples: &[f32], format: &FormatParameters, phases: &PhaseLengths) -> LockOutcome {
    if samples.is_empty() {
        return LockOutcome {
            regions: Vec::new(),
            reason: Some("empty audio input".to_string()),
        };
    }

    let spf_exact = format.samples_per_frame_exact();
    let window = round_half_away_from_zero(spf_exact / 4.0).max(1) as usize;
    let hop = window;

    let test_chart_duration = round_half_away_from_zero(phases.test_chart_frames as f64 * spf_exact) as usize;
    let pre_silence_duration = round_half_away_from_zero(phases.pre_silence_frames as f64 * spf_exact) as usize;

    let min_high_run = (test_chart_duration as f64 * 0.8) as usize;
    let min_low_run = (pre_silence_duration as f64 * 0.5) as usize;

    let envelope: Vec<(usize, RmsLevel)> = rms_envelope(samples, window, hop)
        .into_iter()
        .map(|(start, rms)| (start, classify_rms(rms)))
        .collect();

    let mut regions = Vec::new();
    let mut i = 0usize;
    while i < envelope.len() {
        if envelope[i].1 != RmsLevel::High {
            i += 1;
            continue;
        }
        let high_start_sample = envelope[i].0;
        let mut j = i;
        while j < envelope.len() && envelope[j].1 == RmsLevel::High {
            j += 1;
        }
        let high_end_sample = envelope.get(j).map(|&(s, _)| s).unwrap_or(samples.len());
        if high_end_sample - high_start_sample < min_high_run {
            debug!(
                "candidate high run at sample {} too short ({} < {} needed)",
                high_start_sample,
                high_end_sample - high_start_sample,
                min_high_run
            );
            i = j.max(i + 1);
            continue;
        }

        let mut k = j;
        while k < envelope.len() && envelope[k].1 == RmsLevel::Low {
            k += 1;
        }
        let low_start_sample = envelope.get(j).map(|&(s, _)| s).unwrap_or(samples.len());
        let low_end_sample = envelope.get(k).map(|&(s, _)| s).unwrap_or(samples.len());
        if low_end_sample.saturating_sub(low_start_sample) < min_low_run {
            i = j.max(i + 1);
            continue;
        }

        let test_chart_start = high_start_sample;
        // Each boundary is rounded once, cumulatively, from `test_chart_start`
        // (spec.md §4.4's `s_cycle + round(frames · spf)` formula) rather than
        // as a running sum of independently-rounded phase durations — the
        // latter can land a sample off whenever `spf` is non-integral (NTSC)
        // and a phase's frame count doesn't divide it exactly. This must
        // match the generator's own cumulative rounding (`pattern.rs`) for
        // the `audio_sample_start == round(video_frame_start · spf)` invariant
        // to hold exactly.
        let pre_silence_start = test_chart_start
            + round_half_away_from_zero(phases.test_chart_frames as f64 * spf_exact) as usize;
        let timecode_start = test_chart_start
            + round_half_away_from_zero(
                (phases.test_chart_frames + phases.pre_silence_frames) as f64 * spf_exact,
            ) as usize;
        let post_silence_start = test_chart_start
            + round_half_away_from_zero(
                (phases.test_chart_frames + phases.pre_silence_frames + phases.timecode_frames) as f64
                    * spf_exact,
            ) as usize;
        let cycle_end = test_chart_start + round_half_away_from_zero(phases.total_frames() as f64 * spf_exact) as usize;

        if cycle_end > samples.len() {
            i = j.max(i + 1);
            continue;
        }

        let valid = region_is_valid(&envelope, timecode_start, post_silence_start, cycle_end);
        if !valid {
            warn!("candidate cycle at sample {test_chart_start} rejected: timecode/post-silence energy check failed");
        }
        if valid {
            // Nearest frame boundary to the Test Chart onset, in case of
            // non-frame-aligned pre-padding ahead of the cycle; the
            // Timecode phase's frame numbering is offset from there.
            let test_chart_start_frame =
                round_half_away_from_zero(test_chart_start as f64 / spf_exact).max(0) as u64;
            let video_frame_start =
                test_chart_start_frame + (phases.test_chart_frames + phases.pre_silence_frames) as u64;
            let video_frame_end = video_frame_start + phases.timecode_frames as u64;

            info!(
                "locked cycle {}: video frames {}..{}, audio samples {}..{}",
                regions.len(),
                video_frame_start,
                video_frame_end,
                timecode_start,
                post_silence_start
            );
            regions.push(LockedRegion {
                cycle_index: regions.len() as u64,
                video_frame_start,
                video_frame_end,
                audio_sample_start: timecode_start as u64,
                audio_sample_end: post_silence_start as u64,
                test_chart_start_sample: test_chart_start as u64,
                pre_silence_start_sample: pre_silence_start as u64,
                cycle_end_sample: cycle_end as u64,
            });
            i = envelope
                .iter()
                .position(|&(s, _)| s >= cycle_end)
                .unwrap_or(envelope.len());
        } else {
            i = j.max(i + 1);
        }
    }

    if regions.is_empty() {
        let reason = "no cycle boundaries found matching the expected phase structure".to_string();
        warn!("{reason}");
        LockOutcome { regions, reason: Some(reason) }
    } else {
        info!("locked {} cycle(s) in {} samples", regions.len(), samples.len());
        LockOutcome { regions, reason: None }
    }
}

/// Validate that the Timecode span isn't predominantly silent, and the
/// Post-Silence span is (spec.md §4.4's cross-check against the detected
/// boundaries before accepting a candidate cycle).
fn region_is_valid(
    envelope: &[(usize, RmsLevel)],
    timecode_start: usize,
    post_silence_start: usize,
    cycle_end: usize,
) -> bool {
    let timecode_windows: Vec<RmsLevel> = envelope
        .iter()
        .filter(|&&(s, _)| s >= timecode_start && s < post_silence_start)
        .map(|&(_, l)| l)
        .collect();
    if !timecode_windows.is_empty() {
        let low_count = timecode_windows.iter().filter(|&&l| l == RmsLevel::Low).count();
        if low_count * 2 > timecode_windows.len() {
            return false;
        }
    }

    let post_windows: Vec<RmsLevel> = envelope
        .iter()
        .filter(|&&(s, _)| s >= post_silence_start && s < cycle_end)
        .map(|&(_, l)| l)
        .collect();
    if !post_windows.is_empty() {
        let low_count = post_windows.iter().filter(|&&l| l == RmsLevel::Low).count();
        if low_count * 2 < post_windows.len() {
            return false;
        }
    }

    true
}
