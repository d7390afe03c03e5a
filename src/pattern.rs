//! Pattern Generator: drives the fixed 4-phase cycle (spec.md §4.3),
//! producing frame-exact audio and video for each frame via caller-supplied
//! callbacks rather than building an in-memory buffer — callers differ in
//! whether they want a WAV, a live stream, or an in-memory vector, and the
//! generator shouldn't need to know which.

use log::{debug, info};

use crate::bitcodec::encode_bit;
use crate::error::CoreResult;
use crate::format::{round_half_away_from_zero, FormatParameters, PhaseLengths};
use crate::framecodec::{encode_frame_audio, encode_frame_visual, FrameBuffer};
use crate::record::FrameRecord;
use crate::symbol::BitSymbol;

/// Which of the 4 fixed phases a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    TestChart,
    PreSilence,
    Timecode,
    PostSilence,
}

const TEST_TONE_HZ: f64 = 1000.0;
const TEST_TONE_AMPLITUDE: f32 = 0.6;

/// Continuous (unfaded) sine tone for the Test Chart phase. Unlike
/// [`encode_bit`], this has no edge fade: the tone is meant to run
/// uninterrupted across the whole phase, so there's no block boundary to
/// suppress a transient at.
fn generate_test_tone(sample_count: usize, sample_rate: f64, phase_in: f64) -> (Vec<f32>, f64) {
    let omega = 2.0 * std::f64::consts::PI * TEST_TONE_HZ / sample_rate;
    let mut samples = Vec::with_capacity(sample_count);
    for n in 0..sample_count {
        let phase = phase_in + omega * n as f64;
        samples.push(TEST_TONE_AMPLITUDE * phase.sin() as f32);
    }
    let phase_out = (phase_in + omega * sample_count as f64).rem_euclid(2.0 * std::f64::consts::PI);
    (samples, phase_out)
}

fn phase_for_frame(local_frame: u32, phases: &PhaseLengths) -> CyclePhase {
    let test_chart_end = phases.test_chart_frames;
    let pre_silence_end = test_chart_end + phases.pre_silence_frames;
    let timecode_end = pre_silence_end + phases.timecode_frames;
    if local_frame < test_chart_end {
        CyclePhase::TestChart
    } else if local_frame < pre_silence_end {
        CyclePhase::PreSilence
    } else if local_frame < timecode_end {
        CyclePhase::Timecode
    } else {
        CyclePhase::PostSilence
    }
}

/// Generate one full cycle: `phases.total_frames()` frames, each delivered
/// as one audio callback and one video callback. Frame id assignment within
/// the Timecode phase restarts at 0 for every cycle (spec.md §4.3); a
/// caller composing multiple cycles back-to-back is responsible for however
/// it wants to label them at a higher level (e.g. by cycle index).
///
/// Sample boundaries for each frame are computed independently as
/// `round(k * samples_per_frame_exact)` for the cumulative frame count `k`,
/// never as a running sum of previously-rounded block lengths — this is
/// what keeps a long cycle's audio length exact instead of drifting by a
/// sample every few frames (spec.md §9).
pub fn generate_cycle(
    format: &FormatParameters,
    phases: &PhaseLengths,
    mut audio_out: impl FnMut(&[f32]),
    mut video_out: impl FnMut(CyclePhase, &FrameBuffer),
) -> CoreResult<()> {
    let spf_exact = format.samples_per_frame_exact();
    let sample_rate = format.audio_sample_rate as f64;
    let total_frames = phases.total_frames();
    let timecode_start = phases.test_chart_frames + phases.pre_silence_frames;

    let mut test_chart_phase = 0.0f64;
    let mut timecode_phase = 0.0f64;
    let mut prev_boundary = 0usize;

    info!(
        "generating cycle: {} frames ({}/{}/{}/{} test-chart/pre/timecode/post), {:.3} samples/frame",
        total_frames,
        phases.test_chart_frames,
        phases.pre_silence_frames,
        phases.timecode_frames,
        phases.post_silence_frames,
        spf_exact
    );

    for k in 0..total_frames {
        let boundary = round_half_away_from_zero((k + 1) as f64 * spf_exact) as usize;
        let frame_samples = boundary - prev_boundary;
        prev_boundary = boundary;

        let phase_kind = phase_for_frame(k, phases);
        let mut frame = FrameBuffer::new_black(format.video_width as usize, format.video_height as usize);

        match phase_kind {
            CyclePhase::TestChart => {
                let (samples, phase_out) =
                    generate_test_tone(frame_samples, sample_rate, test_chart_phase);
                test_chart_phase = phase_out;
                audio_out(&samples);
            }
            CyclePhase::PreSilence | CyclePhase::PostSilence => {
                audio_out(&vec![0f32; frame_samples]);
            }
            CyclePhase::Timecode => {
                let frame_id = k - timecode_start;
                let record = FrameRecord::new(frame_id);
                let (samples, phase_out) =
                    encode_frame_audio(record, frame_samples, sample_rate, timecode_phase);
                timecode_phase = phase_out;
                audio_out(&samples);
                encode_frame_visual(record, &mut frame)?;
                debug!("encoded timecode frame {frame_id} ({frame_samples} samples)");
            }
        }

        video_out(phase_kind, &frame);
    }

    info!("cycle generation complete");
    Ok(())
}

/// Encode a single isolated FSK bit tone, exposed for callers (e.g. test
/// fixtures) that want to build audio outside the fixed cycle structure.
/// Thin re-export wrapper kept here rather than requiring callers to reach
/// into [`crate::bitcodec`] directly, since [`CyclePhase`]-aware callers are
/// this module's primary audience.
pub fn encode_isolated_bit(symbol: BitSymbol, sample_count: usize, sample_rate: f64) -> Vec<f32> {
    encode_bit(symbol, sample_count, sample_rate, 0.0).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framecodec::{decode_audio_timecodes, decode_frame_visual, DecodeMode};

    #[test]
    fn cycle_emits_expected_frame_count_and_phase_sequence() {
        let format = FormatParameters::pal();
        let phases = PhaseLengths::default();
        let mut phase_sequence = Vec::new();
        let mut audio_sample_count = 0usize;

        generate_cycle(
            &format,
            &phases,
            |samples| audio_sample_count += samples.len(),
            |phase, _frame| phase_sequence.push(phase),
        )
        .unwrap();

        assert_eq!(phase_sequence.len(), phases.total_frames() as usize);
        assert_eq!(phase_sequence[0], CyclePhase::TestChart);
        assert_eq!(
            phase_sequence[phases.test_chart_frames as usize],
            CyclePhase::PreSilence
        );
        assert_eq!(
            phase_sequence[(phases.test_chart_frames + phases.pre_silence_frames) as usize],
            CyclePhase::Timecode
        );
        assert_eq!(*phase_sequence.last().unwrap(), CyclePhase::PostSilence);

        let expected_samples =
            round_half_away_from_zero(phases.total_frames() as f64 * format.samples_per_frame_exact());
        assert_eq!(audio_sample_count, expected_samples as usize);
    }

    #[test]
    fn timecode_phase_frame_ids_restart_at_zero_and_visual_decodes() {
        let format = FormatParameters::pal();
        let phases = PhaseLengths::default();
        let mut video_frames = Vec::new();

        generate_cycle(
            &format,
            &phases,
            |_samples| {},
            |phase, frame| {
                if phase == CyclePhase::Timecode {
                    video_frames.push(frame.clone());
                }
            },
        )
        .unwrap();

        assert_eq!(video_frames.len(), phases.timecode_frames as usize);
        let first = decode_frame_visual(&video_frames[0]).expect("must decode");
        assert_eq!(first.frame_id, 0);
        let last = decode_frame_visual(video_frames.last().unwrap()).expect("must decode");
        assert_eq!(last.frame_id, phases.timecode_frames - 1);
    }

    #[test]
    fn full_cycle_audio_decodes_timecode_ids_in_order() {
        let format = FormatParameters::pal();
        let phases = PhaseLengths {
            test_chart_frames: 2,
            pre_silence_frames: 1,
            timecode_frames: 5,
            post_silence_frames: 1,
        };
        let mut audio = Vec::new();
        generate_cycle(&format, &phases, |samples| audio.extend_from_slice(samples), |_, _| {}).unwrap();

        let test_chart_samples =
            round_half_away_from_zero(phases.test_chart_frames as f64 * format.samples_per_frame_exact());
        let pre_silence_samples = round_half_away_from_zero(
            (phases.test_chart_frames + phases.pre_silence_frames) as f64
                * format.samples_per_frame_exact(),
        ) - test_chart_samples;
        let timecode_start = (test_chart_samples + pre_silence_samples) as usize;
        let timecode_end = round_half_away_from_zero(
            (phases.test_chart_frames + phases.pre_silence_frames + phases.timecode_frames) as f64
                * format.samples_per_frame_exact(),
        ) as usize;

        let detections = decode_audio_timecodes(
            &audio[timecode_start..timecode_end],
            &format,
            DecodeMode::Strict,
            0,
        )
        .unwrap();
        let ids: Vec<u32> = detections.iter().map(|d| d.frame_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }
}
