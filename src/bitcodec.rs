//! Bit Codec: FSK encode/decode of a single logical bit, and the
//! three-method weighted-voting combiner (spec.md §4.1).

use log::debug;

use crate::dsp;
use crate::symbol::{classify_frequency, BitSymbol};

/// Confidence in `[0.0, 1.0]`.
pub type BitConfidence = f64;

/// One successful (or attempted) bit decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedBit {
    pub symbol: BitSymbol,
    pub confidence: BitConfidence,
}

/// Fixed analysis-method weights (spec.md §4.1).
const WEIGHT_FFT: f64 = 2.0;
const WEIGHT_ZCR: f64 = 1.0;
const WEIGHT_AUTOCORR: f64 = 1.0;

const AMPLITUDE: f32 = 0.6;
const EDGE_FADE_FRACTION: f64 = 0.05;

/// Encode one logical bit as `sample_count` audio samples at `sample_rate`.
///
/// `phase_in` is the carrier phase (radians) carried over from the previous
/// bit, so consecutive bits within a frame (and frames within a section)
/// produce a phase-continuous tone with no discontinuity at the boundary.
/// Returns the samples and the phase to hand to the next call.
pub fn encode_bit(
    symbol: BitSymbol,
    sample_count: usize,
    sample_rate: f64,
    phase_in: f64,
) -> (Vec<f32>, f64) {
    let omega = 2.0 * std::f64::consts::PI * symbol.nominal_freq_hz() / sample_rate;
    let mut samples = Vec::with_capacity(sample_count);
    for n in 0..sample_count {
        let phase = phase_in + omega * n as f64;
        samples.push((AMPLITUDE as f64 * phase.sin()) as f32);
    }
    dsp::apply_edge_fade(&mut samples, EDGE_FADE_FRACTION);
    let phase_out = (phase_in + omega * sample_count as f64).rem_euclid(2.0 * std::f64::consts::PI);
    (samples, phase_out)
}

/// Recover a logical bit from a block of samples by running all three
/// analysis methods and combining their classifications by weighted vote.
/// Never fails — absence of a decision is a normal `None` return.
pub fn decode_bit(samples: &[f32], sample_rate: f64) -> Option<DecodedBit> {
    let mut votes: Vec<(BitSymbol, f64, f64)> = Vec::with_capacity(3);

    if let Some((freq, conf)) = dsp::fft_peak(samples, sample_rate) {
        if let Some(sym) = classify_frequency(freq) {
            votes.push((sym, conf, WEIGHT_FFT));
        }
    }

    if let Some(crossings) = dsp::zero_crossing_frequency(samples) {
        let freq = dsp::crossings_to_frequency(crossings, sample_rate, samples.len());
        if let Some(sym) = classify_frequency(freq) {
            let conf = dsp::nominal_deviation_confidence(freq, sym.nominal_freq_hz());
            votes.push((sym, conf, WEIGHT_ZCR));
        }
    }

    if let Some((freq, conf)) = dsp::autocorrelation_peak(samples, sample_rate) {
        if let Some(sym) = classify_frequency(freq) {
            votes.push((sym, conf, WEIGHT_AUTOCORR));
        }
    }

    let decision = combine_votes(&votes);
    debug!("bit decode: {} method(s) voted -> {:?}", votes.len(), decision);
    decision
}

/// Weighted-vote combiner (spec.md §4.1, steps 1–6).
fn combine_votes(votes: &[(BitSymbol, f64, f64)]) -> Option<DecodedBit> {
    if votes.is_empty() {
        return None;
    }

    let mut zero_weight = 0.0;
    let mut zero_conf_weighted = 0.0;
    let mut one_weight = 0.0;
    let mut one_conf_weighted = 0.0;

    for &(symbol, confidence, weight) in votes {
        match symbol {
            BitSymbol::Zero => {
                zero_weight += weight;
                zero_conf_weighted += confidence * weight;
            }
            BitSymbol::One => {
                one_weight += weight;
                one_conf_weighted += confidence * weight;
            }
        }
    }

    if (zero_weight - one_weight).abs() < 1e-12 {
        // Exact tie: the decision comes from the single highest-confidence
        // method, using that method's own confidence (not a weighted mean).
        let (symbol, confidence, _) = votes
            .iter()
            .copied()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .expect("votes is non-empty");
        return Some(DecodedBit { symbol, confidence });
    }

    if zero_weight > one_weight {
        Some(DecodedBit {
            symbol: BitSymbol::Zero,
            confidence: zero_conf_weighted / zero_weight,
        })
    } else {
        Some(DecodedBit {
            symbol: BitSymbol::One,
            confidence: one_conf_weighted / one_weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48_000.0;

    #[test]
    fn round_trips_zero_and_one() {
        for &symbol in &[BitSymbol::Zero, BitSymbol::One] {
            let (samples, _) = encode_bit(symbol, 1_000, SAMPLE_RATE, 0.0);
            let decoded = decode_bit(&samples, SAMPLE_RATE).expect("must decode");
            assert_eq!(decoded.symbol, symbol);
            assert!(decoded.confidence > 0.8, "confidence={}", decoded.confidence);
        }
    }

    #[test]
    fn phase_continuity_across_bits() {
        let (_, phase_after_first) = encode_bit(BitSymbol::One, 480, SAMPLE_RATE, 0.0);
        let (second, _) = encode_bit(BitSymbol::One, 480, SAMPLE_RATE, phase_after_first);
        // No discontinuity: the first sample of the second block should
        // continue the sinusoid smoothly, i.e. decode cleanly as the same
        // symbol with high confidence despite starting mid-cycle.
        let decoded = decode_bit(&second, SAMPLE_RATE).unwrap();
        assert_eq!(decoded.symbol, BitSymbol::One);
    }

    #[test]
    fn combine_votes_empty_is_none() {
        assert!(combine_votes(&[]).is_none());
    }

    #[test]
    fn combine_votes_majority_wins() {
        let votes = vec![
            (BitSymbol::One, 0.9, WEIGHT_FFT),
            (BitSymbol::Zero, 0.5, WEIGHT_ZCR),
            (BitSymbol::Zero, 0.5, WEIGHT_AUTOCORR),
        ];
        // One has weight 2.0, Zero has weight 1.0 + 1.0 = 2.0: exact tie.
        // FFT (One, 0.9) has the highest confidence, so it wins the tie.
        let decoded = combine_votes(&votes).unwrap();
        assert_eq!(decoded.symbol, BitSymbol::One);
        assert!((decoded.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn combine_votes_weighted_mean_confidence() {
        let votes = vec![
            (BitSymbol::Zero, 1.0, WEIGHT_FFT),
            (BitSymbol::Zero, 0.5, WEIGHT_ZCR),
            (BitSymbol::One, 0.9, WEIGHT_AUTOCORR),
        ];
        // Zero: weight 3.0 (2.0 + 1.0), One: weight 1.0 -> Zero wins.
        let decoded = combine_votes(&votes).unwrap();
        assert_eq!(decoded.symbol, BitSymbol::Zero);
        let expected = (1.0 * WEIGHT_FFT + 0.5 * WEIGHT_ZCR) / (WEIGHT_FFT + WEIGHT_ZCR);
        assert!((decoded.confidence - expected).abs() < 1e-9);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_all_block_sizes(n in 480usize..4000) {
            for &symbol in &[BitSymbol::Zero, BitSymbol::One] {
                let (samples, _) = encode_bit(symbol, n, SAMPLE_RATE, 0.0);
                let decoded = decode_bit(&samples, SAMPLE_RATE);
                proptest::prop_assert!(decoded.is_some());
                let decoded = decoded.unwrap();
                proptest::prop_assert_eq!(decoded.symbol, symbol);
                proptest::prop_assert!(decoded.confidence > 0.8);
            }
        }
    }
}
