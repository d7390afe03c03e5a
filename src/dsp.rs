//! Shared pure DSP primitives used by both the encoder and the decoder.
//!
//! Per spec.md §9's design notes: rather than modeling FFT/ZCR/Autocorr as
//! polymorphic objects behind a shared trait, each is a small free function
//! operating on a sample slice. [`crate::bitcodec`] combines their outputs
//! by weighted vote.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::symbol::{classify_frequency, BitSymbol, ONE_RANGE_HZ, ZERO_RANGE_HZ};

/// Apply a 5%-of-block raised-cosine fade-in and fade-out in place, leaving
/// the interior unwindowed (spec.md §4.1: suppresses transients at bit
/// boundaries without smearing the tone's spectral purity).
pub fn apply_edge_fade(samples: &mut [f32], fade_fraction: f64) {
    let n = samples.len();
    if n == 0 {
        return;
    }
    let fade_len = ((n as f64) * fade_fraction).round() as usize;
    let fade_len = fade_len.min(n / 2);
    for i in 0..fade_len {
        let t = i as f64 / fade_len.max(1) as f64;
        let gain = 0.5 - 0.5 * (std::f64::consts::PI * t).cos();
        samples[i] *= gain as f32;
        samples[n - 1 - i] *= gain as f32;
    }
}

/// FFT magnitude-spectrum peak frequency within the combined Zero∪One band,
/// plus a confidence derived from how dominant that peak is. Zero-pads the
/// block to improve frequency resolution — bit blocks at PAL/48kHz (~60
/// samples) are far too short for a raw-length FFT to resolve 800 Hz from
/// 1600 Hz.
pub fn fft_peak(samples: &[f32], sample_rate: f64) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let fft_len = 4096usize.max(samples.len().next_power_of_two());
    let mut buf: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    buf.resize(fft_len, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);
    fft.process(&mut buf);

    let bin_hz = sample_rate / fft_len as f64;
    let half = fft_len / 2;
    let band_lo = (ZERO_RANGE_HZ.0 - 200.0).max(0.0);
    let band_hi = ONE_RANGE_HZ.1 + 200.0;
    let lo_bin = (band_lo / bin_hz).floor().max(1.0) as usize;
    let hi_bin = ((band_hi / bin_hz).ceil() as usize).min(half.saturating_sub(1));
    if lo_bin >= hi_bin {
        return None;
    }

    let mags: Vec<f64> = (lo_bin..=hi_bin).map(|b| buf[b].norm() as f64).collect();
    let (rel_idx, &peak_mag) = mags
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    let peak_bin = lo_bin + rel_idx;
    let freq_hz = peak_bin as f64 * bin_hz;

    // Confidence denominator is the energy inside the two classification
    // ranges only (spec.md §4.1: "combined Zero∪One bands") — the wider
    // search band above also covers the guard band and margins so the peak
    // isn't missed when it sits near a range edge, but including that extra
    // energy in the denominator would dilute confidence on a noisy capture.
    let total_energy: f64 = (lo_bin..=hi_bin)
        .filter(|&b| {
            let f = b as f64 * bin_hz;
            (f >= ZERO_RANGE_HZ.0 && f <= ZERO_RANGE_HZ.1) || (f >= ONE_RANGE_HZ.0 && f <= ONE_RANGE_HZ.1)
        })
        .map(|b| buf[b].norm() as f64)
        .sum();
    if total_energy <= 0.0 {
        return None;
    }
    let confidence = (peak_mag / total_energy).clamp(0.0, 1.0);
    Some((freq_hz, confidence))
}

/// Zero-crossing-rate frequency estimate: crossings converted to an
/// estimated frequency assuming a single dominant tone.
pub fn zero_crossing_frequency(samples: &[f32]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    Some(crossings as f64)
}

/// Convert a raw crossing count into a frequency estimate given the block's
/// sample rate and length.
pub fn crossings_to_frequency(crossings: f64, sample_rate: f64, sample_count: usize) -> f64 {
    (crossings * sample_rate) / (2.0 * sample_count as f64)
}

/// Confidence for a ZCR (or any nominal-frequency-based) measurement:
/// `1 - |measured - nominal| / (nominal * 0.5)`, floored at 0.
pub fn nominal_deviation_confidence(measured_hz: f64, nominal_hz: f64) -> f64 {
    (1.0 - (measured_hz - nominal_hz).abs() / (nominal_hz * 0.5)).max(0.0)
}

/// Autocorrelation peak within the lag range corresponding to 500–2000 Hz,
/// inverted back to a frequency, with a peak-to-sidelobe confidence.
pub fn autocorrelation_peak(samples: &[f32], sample_rate: f64) -> Option<(f64, f64)> {
    let n = samples.len();
    if n < 4 {
        return None;
    }
    let min_lag = ((sample_rate / 2000.0).floor() as usize).max(1);
    let max_lag = ((sample_rate / 500.0).ceil() as usize).min(n - 1);
    if min_lag >= max_lag {
        return None;
    }

    let mut corr = vec![0f64; max_lag + 1];
    for lag in min_lag..=max_lag {
        let mut sum = 0f64;
        for i in 0..(n - lag) {
            sum += samples[i] as f64 * samples[i + lag] as f64;
        }
        corr[lag] = sum;
    }

    let (peak_lag, &peak_val) = corr
        .iter()
        .enumerate()
        .skip(min_lag)
        .take(max_lag - min_lag + 1)
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;

    if peak_val <= 0.0 {
        return None;
    }

    let sidelobe_sum: f64 = (min_lag..=max_lag)
        .filter(|&lag| lag != peak_lag)
        .map(|lag| corr[lag].abs())
        .sum();
    let sidelobe_count = (max_lag - min_lag).max(1) as f64;
    let mean_sidelobe = sidelobe_sum / sidelobe_count;

    let confidence = (peak_val / (peak_val + mean_sidelobe)).clamp(0.0, 1.0);
    let freq_hz = sample_rate / peak_lag as f64;
    Some((freq_hz, confidence))
}

/// Classify a frequency estimate and pair it with a confidence, discarding
/// the pair entirely if the frequency falls in the guard band or outside
/// both ranges (no-decision).
pub fn classify_with_confidence(freq_hz: f64, confidence: f64) -> Option<(BitSymbol, f64)> {
    classify_frequency(freq_hz).map(|sym| (sym, confidence))
}
