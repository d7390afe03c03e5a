//! Frame Codec: packs one [`FrameRecord`] into 32 FSK-coded audio bits, or
//! into the 32-block visual binary strip, and recovers it from either
//! (spec.md §4.2 and §4.3's "Timecode" phase).

use log::{info, warn};

use crate::bitcodec::{decode_bit, encode_bit};
use crate::detection::{AudioDetection, VideoDetection};
use crate::error::{CoreError, CoreResult};
use crate::format::{round_half_away_from_zero, FormatParameters};
use crate::record::FrameRecord;
use crate::symbol::BitSymbol;

const BITS_PER_FRAME: usize = 32;

/// Per-bit sample boundaries within a frame's audio block, computed fresh
/// from `block_samples` rather than as a precomputed constant — mirrors the
/// frame-exact discipline in [`crate::format`]: `samples_per_frame_exact`
/// must never be truncated once and reused.
fn bit_boundaries(block_samples: usize) -> [usize; BITS_PER_FRAME + 1] {
    let bit_samples_exact = block_samples as f64 / BITS_PER_FRAME as f64;
    let mut boundaries = [0usize; BITS_PER_FRAME + 1];
    for (i, b) in boundaries.iter_mut().enumerate() {
        *b = round_half_away_from_zero(i as f64 * bit_samples_exact) as usize;
    }
    boundaries
}

/// Encode one frame's 32 bits as phase-continuous FSK audio, `block_samples`
/// samples long. Returns the samples and the carrier phase to hand to the
/// next frame's `encode_frame_audio` call.
pub fn encode_frame_audio(
    record: FrameRecord,
    block_samples: usize,
    sample_rate: f64,
    phase_in: f64,
) -> (Vec<f32>, f64) {
    let bits = record.bits();
    let boundaries = bit_boundaries(block_samples);
    let mut out = Vec::with_capacity(block_samples);
    let mut phase = phase_in;
    for i in 0..BITS_PER_FRAME {
        let len = boundaries[i + 1] - boundaries[i];
        let symbol = if bits[i] { BitSymbol::One } else { BitSymbol::Zero };
        let (samples, phase_out) = encode_bit(symbol, len, sample_rate, phase);
        out.extend(samples);
        phase = phase_out;
    }
    (out, phase)
}

/// Decode one frame's worth of audio (exactly `samples.len()` == the block
/// length used at encode time) into a frame id and a confidence. Returns
/// `None` if any of the 32 bits fails to decode, or the checksum fails —
/// both are normal no-decision outcomes, not errors.
fn decode_frame_block(samples: &[f32], sample_rate: f64) -> Option<(u32, f64)> {
    if samples.len() < BITS_PER_FRAME {
        return None;
    }
    let boundaries = bit_boundaries(samples.len());
    let mut bits = [false; BITS_PER_FRAME];
    let mut confidence_sum = 0.0;
    for i in 0..BITS_PER_FRAME {
        let slice = &samples[boundaries[i]..boundaries[i + 1]];
        let decoded = decode_bit(slice, sample_rate)?;
        bits[i] = decoded.symbol == BitSymbol::One;
        confidence_sum += decoded.confidence;
    }
    let record = FrameRecord::from_bits(&bits)?;
    Some((record.frame_id(), confidence_sum / BITS_PER_FRAME as f64))
}

/// How the audio decoder locates frame boundaries within a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Assume `samples` begins exactly on a frame boundary and frames are
    /// laid out back-to-back with no drift (spec.md §4.2, strict path).
    Strict,
    /// Search nearby start offsets to tolerate VHS mechanical jitter that
    /// has shifted frame boundaries away from their nominal positions
    /// (spec.md §4.2, tolerant path).
    Tolerant,
}

/// Recover every frame from a contiguous span of audio samples.
///
/// `slice_start_sample` is the absolute sample position of `samples[0]`,
/// added to every detection's `sample_position` so offsets returned by this
/// function are meaningful against the original recording rather than the
/// caller's buffer.
pub fn decode_audio_timecodes(
    samples: &[f32],
    format: &FormatParameters,
    mode: DecodeMode,
    slice_start_sample: u64,
) -> CoreResult<Vec<AudioDetection>> {
    if samples.is_empty() {
        return match mode {
            DecodeMode::Tolerant => Err(CoreError::MalformedInput(
                "tolerant audio decode requested on empty input".to_string(),
            )),
            DecodeMode::Strict => Ok(Vec::new()),
        };
    }

    let sample_rate = format.audio_sample_rate as f64;
    let spf_exact = format.samples_per_frame_exact();
    let nominal_block_samples = round_half_away_from_zero(spf_exact).max(1) as usize;

    match mode {
        DecodeMode::Strict => {
            let mut detections = Vec::new();
            let mut frame_index: u64 = 0;
            loop {
                let start =
                    round_half_away_from_zero(frame_index as f64 * spf_exact) as usize;
                let end = round_half_away_from_zero((frame_index + 1) as f64 * spf_exact) as usize;
                if end > samples.len() {
                    break;
                }
                if let Some((frame_id, confidence)) =
                    decode_frame_block(&samples[start..end], sample_rate)
                {
                    detections.push(AudioDetection {
                        sample_position: slice_start_sample + start as u64,
                        frame_id,
                        confidence,
                    });
                }
                frame_index += 1;
            }
            if detections.is_empty() {
                warn!("strict audio decode found zero checksum-valid frames in {} samples", samples.len());
            } else {
                info!("strict audio decode found {} frame(s) in {} samples", detections.len(), samples.len());
            }
            Ok(detections)
        }
        DecodeMode::Tolerant => {
            let bit_samples = (nominal_block_samples as f64 / BITS_PER_FRAME as f64).max(1.0);
            let step = ((bit_samples / 8.0).round() as usize).max(1);

            let mut candidates: Vec<(usize, u32, f64)> = Vec::new();
            let mut offset = 0usize;
            while offset + nominal_block_samples <= samples.len() {
                if let Some((frame_id, confidence)) =
                    decode_frame_block(&samples[offset..offset + nominal_block_samples], sample_rate)
                {
                    candidates.push((offset, frame_id, confidence));
                }
                offset += step;
            }

            let candidate_count = candidates.len();
            let merged = merge_tolerant_candidates(candidates, nominal_block_samples);
            if merged.is_empty() {
                warn!("tolerant audio decode found zero checksum-valid frames in {} samples", samples.len());
            } else {
                info!(
                    "tolerant audio decode found {} frame(s) from {} sliding-window candidate(s)",
                    merged.len(),
                    candidate_count
                );
            }
            Ok(merged
                .into_iter()
                .map(|(offset, frame_id, confidence)| AudioDetection {
                    sample_position: slice_start_sample + offset as u64,
                    frame_id,
                    confidence,
                })
                .collect())
        }
    }
}

/// Collapse near-duplicate detections produced by adjacent sliding-window
/// offsets in tolerant mode: candidates with the same frame id whose
/// positions fall within one frame length of each other are the same
/// physical frame, and only the highest-confidence one is kept.
fn merge_tolerant_candidates(
    mut candidates: Vec<(usize, u32, f64)>,
    block_samples: usize,
) -> Vec<(usize, u32, f64)> {
    candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let mut merged: Vec<(usize, u32, f64)> = Vec::new();
    for candidate in candidates {
        if let Some(last) = merged.last_mut() {
            let close = last.1 == candidate.1
                && candidate.0.abs_diff(last.0) <= block_samples;
            if close {
                if candidate.2 > last.2 {
                    *last = candidate;
                }
                continue;
            }
        }
        merged.push(candidate);
    }
    merged
}

/// A luminance-only pixel buffer for one video frame, row-major, top-left
/// origin. The codec only ever reads/writes the top strip, but the buffer
/// carries full frame dimensions since the Cycle Locker and the visual
/// corner-marker fallback both need to validate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub width: usize,
    pub height: usize,
    luminance: Vec<u8>,
}

impl FrameBuffer {
    pub fn new_black(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            luminance: vec![0u8; width * height],
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.luminance[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        let i = self.index(x, y);
        self.luminance[i] = value;
    }
}

/// Strip geometry (spec.md §4.3): the top 20 rows, excluding a 40px border
/// on each side, divided into 32 equal-width blocks.
pub const STRIP_ROWS: usize = 20;
pub const BORDER_PX: usize = 40;
pub const NUM_BLOCKS: usize = 32;
const BLACK_WHITE_THRESHOLD: u8 = 128;

/// Block boundaries (in x, within `effective_width`) for `num_blocks` equal
/// divisions, rounded per-block rather than via a precomputed block width —
/// same frame-exact discipline as the audio bit boundaries.
fn block_boundaries(effective_width: usize, num_blocks: usize) -> Vec<usize> {
    (0..=num_blocks)
        .map(|i| round_half_away_from_zero(i as f64 * effective_width as f64 / num_blocks as f64) as usize)
        .collect()
}

/// Paint `record`'s 32 bits into the top strip of `frame` as black/white
/// blocks (spec.md §4.3).
pub fn encode_frame_visual(record: FrameRecord, frame: &mut FrameBuffer) -> CoreResult<()> {
    if frame.width <= 2 * BORDER_PX {
        return Err(CoreError::MalformedInput(format!(
            "frame width {} too narrow for {}px borders",
            frame.width, BORDER_PX
        )));
    }
    let effective_width = frame.width - 2 * BORDER_PX;
    let boundaries = block_boundaries(effective_width, NUM_BLOCKS);
    let bits = record.bits();
    let rows = STRIP_ROWS.min(frame.height);

    for i in 0..NUM_BLOCKS {
        let value: u8 = if bits[i] { 255 } else { 0 };
        for x in (BORDER_PX + boundaries[i])..(BORDER_PX + boundaries[i + 1]) {
            for y in 0..rows {
                frame.set(x, y, value);
            }
        }
    }
    Ok(())
}

/// A visual decode's frame id and confidence. The visual strip is a clean
/// binary signal, so a successful decode always carries the same fixed
/// confidence (spec.md §4.3).
pub const VISUAL_STRIP_CONFIDENCE: f64 = 0.90;
/// Confidence assigned to a corner-marker fallback decode — lower than the
/// main strip since it samples a much smaller pixel area per bit.
pub const CORNER_MARKER_CONFIDENCE: f64 = 0.70;

/// Average the pixels in a small square centered on `(cx, cy)`, clipped to
/// `[x_min, x_max) x [0, rows)`.
fn sample_block_average(frame: &FrameBuffer, cx: usize, cy: usize, x_min: usize, x_max: usize, rows: usize) -> f64 {
    const HALF: usize = 3;
    let x_lo = cx.saturating_sub(HALF).max(x_min);
    let x_hi = (cx + HALF).min(x_max);
    let y_lo = cy.saturating_sub(HALF);
    let y_hi = (cy + HALF).min(rows);
    let mut sum = 0u32;
    let mut count = 0u32;
    for y in y_lo..y_hi {
        for x in x_lo..x_hi {
            sum += frame.get(x, y) as u32;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Decode the visual strip into a frame id, returning `None` on checksum
/// failure (a normal no-decision, not an error).
pub fn decode_frame_visual(frame: &FrameBuffer) -> Option<VideoDetectionBits> {
    if frame.width <= 2 * BORDER_PX || frame.height == 0 {
        return None;
    }
    let effective_width = frame.width - 2 * BORDER_PX;
    let boundaries = block_boundaries(effective_width, NUM_BLOCKS);
    let rows = STRIP_ROWS.min(frame.height);
    let cy = rows / 2;

    let mut bits = [false; BITS_PER_FRAME];
    for i in 0..NUM_BLOCKS {
        let x_min = BORDER_PX + boundaries[i];
        let x_max = BORDER_PX + boundaries[i + 1];
        let cx = (x_min + x_max) / 2;
        let avg = sample_block_average(frame, cx, cy, x_min, x_max, rows);
        bits[i] = avg >= BLACK_WHITE_THRESHOLD as f64;
    }

    let record = FrameRecord::from_bits(&bits)?;
    Some(VideoDetectionBits {
        frame_id: record.frame_id(),
        confidence: VISUAL_STRIP_CONFIDENCE,
    })
}

/// A frame id recovered from a single video frame, not yet stamped with its
/// position in the sequence (the caller — [`decode_video_timecodes`] —
/// attaches that).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoDetectionBits {
    pub frame_id: u32,
    pub confidence: f64,
}

/// Decode every frame in `frames`, in order, attaching sequential indices
/// starting at `first_frame_index`. Frames that fail to decode are simply
/// absent from the result, matching the "partial success is the norm, not
/// an error" design (spec.md §7) — only an inconsistent frame size among the
/// sequence is treated as malformed input.
pub fn decode_video_timecodes<'a, I>(frames: I, first_frame_index: u64) -> CoreResult<Vec<VideoDetection>>
where
    I: IntoIterator<Item = &'a FrameBuffer>,
{
    let mut detections = Vec::new();
    let mut expected_dims: Option<(usize, usize)> = None;

    for (i, frame) in frames.into_iter().enumerate() {
        let dims = (frame.width, frame.height);
        match expected_dims {
            None => expected_dims = Some(dims),
            Some(d) if d != dims => {
                return Err(CoreError::MalformedInput(format!(
                    "inconsistent video frame dimensions: expected {:?}, got {:?} at index {}",
                    d, dims, i
                )))
            }
            _ => {}
        }
        if let Some(bits) = decode_frame_visual(frame) {
            detections.push(VideoDetection {
                video_frame_index: first_frame_index + i as u64,
                frame_id: bits.frame_id,
                confidence: bits.confidence,
            });
        }
    }
    info!("video timecode decode found {} frame(s) in the supplied sequence", detections.len());
    Ok(detections)
}

/// Redundant fallback encoding of the same 32-bit record into the left and
/// right border strips (16 blocks each), for recovery when the main strip
/// is damaged. Not used by [`crate::pattern`]'s default cycle generation;
/// callers opt in explicitly.
pub fn encode_frame_corner_markers(record: FrameRecord, frame: &mut FrameBuffer) -> CoreResult<()> {
    if frame.width <= 2 * BORDER_PX {
        return Err(CoreError::MalformedInput(format!(
            "frame width {} too narrow for {}px borders",
            frame.width, BORDER_PX
        )));
    }
    const HALF_BLOCKS: usize = 16;
    let bits = record.bits();
    let rows = STRIP_ROWS.min(frame.height);
    let left_boundaries = block_boundaries(BORDER_PX, HALF_BLOCKS);
    let right_boundaries = block_boundaries(BORDER_PX, HALF_BLOCKS);

    for i in 0..HALF_BLOCKS {
        let value: u8 = if bits[i] { 255 } else { 0 };
        for x in left_boundaries[i]..left_boundaries[i + 1] {
            for y in 0..rows {
                frame.set(x, y, value);
            }
        }
    }
    for i in 0..HALF_BLOCKS {
        let value: u8 = if bits[HALF_BLOCKS + i] { 255 } else { 0 };
        let x0 = frame.width - BORDER_PX + right_boundaries[i];
        let x1 = frame.width - BORDER_PX + right_boundaries[i + 1];
        for x in x0..x1 {
            for y in 0..rows {
                frame.set(x, y, value);
            }
        }
    }
    Ok(())
}

/// Decode the corner-marker fallback, returning `None` on checksum failure.
pub fn decode_frame_corner_markers(frame: &FrameBuffer) -> Option<VideoDetectionBits> {
    if frame.width <= 2 * BORDER_PX || frame.height == 0 {
        return None;
    }
    const HALF_BLOCKS: usize = 16;
    let rows = STRIP_ROWS.min(frame.height);
    let cy = rows / 2;
    let left_boundaries = block_boundaries(BORDER_PX, HALF_BLOCKS);
    let right_boundaries = block_boundaries(BORDER_PX, HALF_BLOCKS);

    let mut bits = [false; BITS_PER_FRAME];
    for i in 0..HALF_BLOCKS {
        let x_min = left_boundaries[i];
        let x_max = left_boundaries[i + 1];
        let cx = (x_min + x_max) / 2;
        bits[i] = sample_block_average(frame, cx, cy, x_min, x_max, rows) >= BLACK_WHITE_THRESHOLD as f64;
    }
    for i in 0..HALF_BLOCKS {
        let x_min = frame.width - BORDER_PX + right_boundaries[i];
        let x_max = frame.width - BORDER_PX + right_boundaries[i + 1];
        let cx = (x_min + x_max) / 2;
        bits[HALF_BLOCKS + i] =
            sample_block_average(frame, cx, cy, x_min, x_max, rows) >= BLACK_WHITE_THRESHOLD as f64;
    }

    let record = FrameRecord::from_bits(&bits)?;
    Some(VideoDetectionBits {
        frame_id: record.frame_id(),
        confidence: CORNER_MARKER_CONFIDENCE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48_000.0;

    #[test]
    fn audio_frame_round_trips_strict() {
        let record = FrameRecord::new(42);
        let (samples, _) = encode_frame_audio(record, 1920, SAMPLE_RATE, 0.0);
        let format = FormatParameters::pal();
        let detections =
            decode_audio_timecodes(&samples, &format, DecodeMode::Strict, 0).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].frame_id, 42);
        assert_eq!(detections[0].sample_position, 0);
        assert!(detections[0].confidence > 0.8);
    }

    #[test]
    fn audio_frames_chain_with_continuous_phase() {
        let format = FormatParameters::pal();
        let block_samples = round_half_away_from_zero(format.samples_per_frame_exact()) as usize;
        let mut phase = 0.0;
        let mut all_samples = Vec::new();
        for id in [10u32, 11, 12] {
            let (samples, phase_out) =
                encode_frame_audio(FrameRecord::new(id), block_samples, SAMPLE_RATE, phase);
            all_samples.extend(samples);
            phase = phase_out;
        }
        let detections =
            decode_audio_timecodes(&all_samples, &format, DecodeMode::Strict, 0).unwrap();
        let ids: Vec<u32> = detections.iter().map(|d| d.frame_id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn strict_decode_of_empty_input_is_empty_not_error() {
        let format = FormatParameters::pal();
        let detections = decode_audio_timecodes(&[], &format, DecodeMode::Strict, 0).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn tolerant_decode_of_empty_input_is_malformed() {
        let format = FormatParameters::pal();
        let result = decode_audio_timecodes(&[], &format, DecodeMode::Tolerant, 0);
        assert!(matches!(result, Err(CoreError::MalformedInput(_))));
    }

    #[test]
    fn tolerant_decode_recovers_frame_shifted_from_nominal_start() {
        let format = FormatParameters::pal();
        let block_samples = round_half_away_from_zero(format.samples_per_frame_exact()) as usize;
        let (samples, _) = encode_frame_audio(FrameRecord::new(7), block_samples, SAMPLE_RATE, 0.0);
        let mut shifted = vec![0f32; 10];
        shifted.extend(samples);
        let detections =
            decode_audio_timecodes(&shifted, &format, DecodeMode::Tolerant, 0).unwrap();
        assert!(detections.iter().any(|d| d.frame_id == 7));
    }

    #[test]
    fn visual_frame_round_trips() {
        let record = FrameRecord::new(99);
        let mut frame = FrameBuffer::new_black(720, 576);
        encode_frame_visual(record, &mut frame).unwrap();
        let decoded = decode_frame_visual(&frame).expect("must decode");
        assert_eq!(decoded.frame_id, 99);
        assert!((decoded.confidence - VISUAL_STRIP_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn visual_decode_rejects_corrupted_strip() {
        let record = FrameRecord::new(5);
        let mut frame = FrameBuffer::new_black(720, 576);
        encode_frame_visual(record, &mut frame).unwrap();
        // Flip the whole first block: flipping a single pixel wouldn't
        // necessarily move its block's average across the threshold.
        let effective_width = frame.width - 2 * BORDER_PX;
        let boundaries = block_boundaries(effective_width, NUM_BLOCKS);
        for x in (BORDER_PX + boundaries[0])..(BORDER_PX + boundaries[1]) {
            for y in 0..STRIP_ROWS {
                let v = frame.get(x, y);
                frame.set(x, y, 255 - v);
            }
        }
        assert!(decode_frame_visual(&frame).is_none());
    }

    #[test]
    fn video_sequence_decode_assigns_sequential_indices() {
        let mut frames = Vec::new();
        for id in [1u32, 2, 3] {
            let mut frame = FrameBuffer::new_black(720, 576);
            encode_frame_visual(FrameRecord::new(id), &mut frame).unwrap();
            frames.push(frame);
        }
        let detections = decode_video_timecodes(frames.iter(), 1000).unwrap();
        let indices: Vec<u64> = detections.iter().map(|d| d.video_frame_index).collect();
        assert_eq!(indices, vec![1000, 1001, 1002]);
        let ids: Vec<u32> = detections.iter().map(|d| d.frame_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn video_sequence_rejects_inconsistent_dimensions() {
        let frame_a = FrameBuffer::new_black(720, 576);
        let frame_b = FrameBuffer::new_black(640, 480);
        let frames = vec![frame_a, frame_b];
        let result = decode_video_timecodes(frames.iter(), 0);
        assert!(matches!(result, Err(CoreError::MalformedInput(_))));
    }

    #[test]
    fn corner_markers_round_trip() {
        let record = FrameRecord::new(123);
        let mut frame = FrameBuffer::new_black(720, 576);
        encode_frame_corner_markers(record, &mut frame).unwrap();
        let decoded = decode_frame_corner_markers(&frame).expect("must decode");
        assert_eq!(decoded.frame_id, 123);
        assert!((decoded.confidence - CORNER_MARKER_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn visual_encode_rejects_too_narrow_frame() {
        let mut frame = FrameBuffer::new_black(70, 100);
        let result = encode_frame_visual(FrameRecord::new(1), &mut frame);
        assert!(matches!(result, Err(CoreError::MalformedInput(_))));
    }
}
