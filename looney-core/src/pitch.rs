//! # Pitch Detection Module
//!
//! Pitch estimation strategies behind the [`PitchEstimator`] trait.
//!
//! ## Strategies
//! - [`PeakPicking`]: loudest spectrum bin; cheap, but prone to octave errors
//!   when a harmonic is louder than the fundamental
//! - [`Yin`]: time-domain YIN with noise gating, an absolute threshold and
//!   parabolic interpolation; preferred. The difference function can be
//!   computed directly or through an FFT cross-correlation.

use crate::audio::AudioBlock;
use crate::config::{EstimatorConfig, EstimatorKind};
use crate::fft::Spectrum;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchEstimate {
    /// Silence, noise, or no periodicity the estimator trusts.
    NoPitch,
    Detected {
        /// Fundamental frequency in Hz, always positive.
        frequency: f32,
        /// How much the estimator trusts the result, 0.0 to 1.0.
        confidence: f32,
    },
}

impl PitchEstimate {
    pub fn frequency(&self) -> Option<f32> {
        match self {
            PitchEstimate::Detected { frequency, .. } => Some(*frequency),
            PitchEstimate::NoPitch => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self {
            PitchEstimate::Detected { confidence, .. } => Some(*confidence),
            PitchEstimate::NoPitch => None,
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, PitchEstimate::Detected { .. })
    }
}

/// A pitch detection strategy.
///
/// Implementations must be deterministic: identical inputs give identical
/// estimates. `&mut self` only serves internal caches.
pub trait PitchEstimator: Send {
    fn name(&self) -> &'static str;

    fn estimate(&mut self, block: &AudioBlock, spectrum: &Spectrum) -> PitchEstimate;
}

/// Builds the estimator selected in `config`.
pub fn build_estimator(config: &EstimatorConfig) -> Box<dyn PitchEstimator> {
    match config.kind {
        EstimatorKind::PeakPicking => Box::new(PeakPicking::new(config.peak_floor)),
        EstimatorKind::Yin => Box::new(Yin::from_config(config, DifferenceMethod::Direct)),
        EstimatorKind::FastYin => Box::new(Yin::from_config(config, DifferenceMethod::Fft)),
    }
}

/// Reports the frequency of the loudest non-DC bin.
#[derive(Debug, Clone, Default)]
pub struct PeakPicking {
    floor: f32,
}

impl PeakPicking {
    /// `floor`: the peak must be strictly louder than this to count.
    pub fn new(floor: f32) -> Self {
        Self { floor }
    }
}

impl PitchEstimator for PeakPicking {
    fn name(&self) -> &'static str {
        "peak-picking"
    }

    fn estimate(&mut self, _block: &AudioBlock, spectrum: &Spectrum) -> PitchEstimate {
        let Some(peak) = spectrum.peak() else {
            return PitchEstimate::NoPitch;
        };
        if peak.magnitude <= self.floor {
            return PitchEstimate::NoPitch;
        }

        let total: f32 = spectrum.bins().iter().skip(1).map(|b| b.magnitude).sum();
        PitchEstimate::Detected {
            frequency: peak.frequency,
            confidence: (peak.magnitude / total).clamp(0.0, 1.0),
        }
    }
}

/// How the YIN difference function is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceMethod {
    /// Nested loop, O(N²).
    Direct,
    /// Autocorrelation through an FFT, O(N log N).
    Fft,
}

/// A robust implementation of the YIN pitch detection algorithm.
///
/// Enhancements over the textbook version:
/// - Amplitude gating to filter out silence
/// - Lag search limited to the configured frequency range
/// - Descent to the bottom of the first dip to prevent octave errors
/// - Parabolic interpolation for sub-sample accuracy
/// - Optional spectrum refinement of the final estimate
pub struct Yin {
    threshold: f32,
    amplitude_threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
    method: DifferenceMethod,
    refine_with_spectrum: bool,
    plans: HashMap<usize, (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>)>,
}

impl Yin {
    pub fn new(threshold: f32, amplitude_threshold: f32) -> Self {
        let defaults = EstimatorConfig::default();
        Self {
            threshold,
            amplitude_threshold,
            min_frequency: defaults.min_frequency,
            max_frequency: defaults.max_frequency,
            method: DifferenceMethod::Direct,
            refine_with_spectrum: false,
            plans: HashMap::new(),
        }
    }

    pub fn from_config(config: &EstimatorConfig, method: DifferenceMethod) -> Self {
        Self::new(config.yin_threshold, config.amplitude_threshold)
            .with_range(config.min_frequency, config.max_frequency)
            .with_method(method)
            .with_spectrum_refinement(config.refine_with_spectrum)
    }

    pub fn with_range(mut self, min_frequency: f32, max_frequency: f32) -> Self {
        self.min_frequency = min_frequency;
        self.max_frequency = max_frequency;
        self
    }

    pub fn with_method(mut self, method: DifferenceMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_spectrum_refinement(mut self, enabled: bool) -> Self {
        self.refine_with_spectrum = enabled;
        self
    }

    /// Squared difference `d(τ)` over a window of `window` samples.
    fn difference(&mut self, signal: &[f32], window: usize) -> Vec<f32> {
        match self.method {
            DifferenceMethod::Direct => difference_direct(signal, window),
            DifferenceMethod::Fft => {
                let fft_size = signal.len().next_power_of_two();
                let (forward, inverse) = self.plans.entry(fft_size).or_insert_with(|| {
                    let mut planner = FftPlanner::new();
                    (
                        planner.plan_fft_forward(fft_size),
                        planner.plan_fft_inverse(fft_size),
                    )
                });
                difference_fft(signal, window, fft_size, &**forward, &**inverse)
            }
        }
    }

    /// Runs YIN on a raw signal. Returns `(frequency, confidence)`.
    fn detect(&mut self, signal: &[f32], sample_rate: u32) -> Option<(f32, f32)> {
        let frame_size = signal.len();
        let window = frame_size / 2;
        if window < 4 {
            return None;
        }

        // --- Difference function and cumulative mean normalization ---
        let mut yin_buffer = self.difference(signal, window);
        cumulative_mean_normalize(&mut yin_buffer);

        // --- First dip under the threshold, then down to its bottom ---
        let sr = sample_rate as f32;
        let tau_min = ((sr / self.max_frequency).floor() as usize).max(2);
        let tau_max = ((sr / self.min_frequency).ceil() as usize).min(window - 2);
        if tau_min >= tau_max {
            return None;
        }

        let mut period = (tau_min..=tau_max).find(|&tau| yin_buffer[tau] < self.threshold)?;
        while period < tau_max && yin_buffer[period + 1] < yin_buffer[period] {
            period += 1;
        }

        // A dip cut off by either end of the lag range belongs to a period
        // outside the frequency range.
        if period == tau_max && yin_buffer[period + 1] < yin_buffer[period] {
            return None;
        }
        if period == tau_min && yin_buffer[period - 1] < yin_buffer[period] {
            return None;
        }

        // --- Parabolic interpolation for better precision ---
        let y1 = yin_buffer[period - 1];
        let y2 = yin_buffer[period];
        let y3 = yin_buffer[period + 1];
        let curvature = y1 - 2.0 * y2 + y3;
        let shift = if curvature > 0.0 {
            (y1 - y3) / (2.0 * curvature)
        } else {
            0.0
        };
        // Shifts beyond a neighbour mean the parabola does not fit the dip.
        let period_float = if shift.abs() <= 1.0 {
            period as f32 + shift
        } else {
            period as f32
        };

        let frequency = sr / period_float;
        if frequency.is_finite() && frequency > 0.0 {
            Some((frequency, (1.0 - y2).clamp(0.0, 1.0)))
        } else {
            None
        }
    }
}

impl PitchEstimator for Yin {
    fn name(&self) -> &'static str {
        match self.method {
            DifferenceMethod::Direct => "yin",
            DifferenceMethod::Fft => "fast-yin",
        }
    }

    fn estimate(&mut self, block: &AudioBlock, spectrum: &Spectrum) -> PitchEstimate {
        // Noise gate: RMS below threshold is silence.
        if block.rms() < self.amplitude_threshold {
            return PitchEstimate::NoPitch;
        }

        match self.detect(block.samples(), block.sample_rate()) {
            Some((rough, confidence)) => {
                let frequency = if self.refine_with_spectrum {
                    refine_from_spectrum(spectrum, rough)
                } else {
                    rough
                };
                PitchEstimate::Detected {
                    frequency,
                    confidence,
                }
            }
            None => PitchEstimate::NoPitch,
        }
    }
}

fn difference_direct(signal: &[f32], window: usize) -> Vec<f32> {
    let mut diff = vec![0.0; window];
    for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
        let mut sum = 0.0;
        for i in 0..window {
            let delta = signal[i] - signal[i + tau];
            sum += delta * delta;
        }
        *slot = sum;
    }
    diff
}

/// `d(τ) = p(0) + p(τ) - 2·r(τ)`, where `p` is windowed energy and `r` the
/// cross-correlation of the signal with its first `window` samples.
fn difference_fft(
    signal: &[f32],
    window: usize,
    fft_size: usize,
    forward: &dyn Fft<f32>,
    inverse: &dyn Fft<f32>,
) -> Vec<f32> {
    let zero = Complex { re: 0.0, im: 0.0 };

    let mut spectrum: Vec<Complex<f32>> = signal.iter().map(|&s| Complex { re: s, im: 0.0 }).collect();
    spectrum.resize(fft_size, zero);
    let mut kernel: Vec<Complex<f32>> = signal[..window].iter().map(|&s| Complex { re: s, im: 0.0 }).collect();
    kernel.resize(fft_size, zero);

    forward.process(&mut spectrum);
    forward.process(&mut kernel);
    for (s, k) in spectrum.iter_mut().zip(&kernel) {
        *s *= k.conj();
    }
    inverse.process(&mut spectrum);

    // Prefix sums of squares give every windowed energy in O(1).
    let mut energy = Vec::with_capacity(signal.len() + 1);
    energy.push(0.0f64);
    for &s in signal {
        let last = energy[energy.len() - 1];
        energy.push(last + (s as f64) * (s as f64));
    }
    let window_energy = |start: usize| energy[start + window] - energy[start];

    let scale = 1.0 / fft_size as f64;
    let mut diff = vec![0.0; window];
    for (tau, slot) in diff.iter_mut().enumerate().skip(1) {
        let correlation = spectrum[tau].re as f64 * scale;
        *slot = (window_energy(0) + window_energy(tau) - 2.0 * correlation).max(0.0) as f32;
    }
    diff
}

/// Turns `d(τ)` into `d'(τ)` in place, with `d'(0) = 1`.
fn cumulative_mean_normalize(yin_buffer: &mut [f32]) {
    let mut running_sum = 0.0;
    yin_buffer[0] = 1.0;
    for tau in 1..yin_buffer.len() {
        running_sum += yin_buffer[tau];
        if running_sum != 0.0 {
            yin_buffer[tau] *= tau as f32 / running_sum;
        } else {
            yin_buffer[tau] = 1.0;
        }
    }
}

/// Refines a frequency estimate using a pre-computed magnitude spectrum.
///
/// Looks for the loudest bin within two bins of `rough_freq` and fits a
/// parabola through the log magnitudes around it.
///
/// # Arguments
/// * `spectrum` - Magnitude spectrum of the same block
/// * `rough_freq` - Initial estimate in Hz, e.g. from YIN
///
/// # Returns
/// The interpolated peak frequency, or `rough_freq` unchanged whenever the
/// fit is not usable (edge bins, zero magnitudes, flat peak).
pub fn refine_from_spectrum(spectrum: &Spectrum, rough_freq: f32) -> f32 {
    let magnitudes = spectrum.bins();
    let bin_width = spectrum.bin_width();
    if rough_freq <= 0.0 || magnitudes.len() < 3 || bin_width <= 0.0 {
        return rough_freq;
    }

    let target_bin = rough_freq / bin_width;
    let search_radius = 2.0;
    let start_bin = (target_bin - search_radius).max(0.0) as usize;
    let end_bin = (target_bin + search_radius).min((magnitudes.len() - 1) as f32) as usize;
    if start_bin >= end_bin {
        return rough_freq;
    }

    let peak_bin = magnitudes[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.magnitude.total_cmp(&b.1.magnitude))
        .map(|(offset, _)| start_bin + offset)
        .unwrap_or(start_bin);
    if peak_bin == 0 || peak_bin >= magnitudes.len() - 1 {
        return rough_freq;
    }

    let y1 = magnitudes[peak_bin - 1].magnitude.ln();
    let y2 = magnitudes[peak_bin].magnitude.ln();
    let y3 = magnitudes[peak_bin + 1].magnitude.ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return rough_freq;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return rough_freq;
    }

    let peak_shift = (y3 - y1) / (2.0 * denominator);
    let final_freq = (peak_bin as f32 + peak_shift) * bin_width;
    if final_freq.is_finite() && final_freq > 0.0 {
        final_freq
    } else {
        rough_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Window;
    use crate::fft::SpectralAnalyzer;

    const SR: u32 = 44100;

    fn cents_between(a: f32, b: f32) -> f32 {
        1200.0 * (a / b).log2()
    }

    fn run(estimator: &mut dyn PitchEstimator, block: &AudioBlock) -> PitchEstimate {
        let spectrum = SpectralAnalyzer::new(Window::Rectangular).transform(block);
        estimator.estimate(block, &spectrum)
    }

    /// Fundamental with a louder second harmonic.
    fn bright_tone(fundamental: f32, len: usize) -> AudioBlock {
        let low = AudioBlock::sine(fundamental, 0.3, SR, len);
        let high = AudioBlock::sine(fundamental * 2.0, 0.8, SR, len);
        let mixed = low.samples().iter().zip(high.samples()).map(|(a, b)| a + b).collect();
        AudioBlock::new(mixed, SR)
    }

    /// Deterministic white noise in [-0.5, 0.5].
    fn noise(len: usize) -> AudioBlock {
        let mut state: u32 = 0x1234_5678;
        let samples = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as f32 / u32::MAX as f32 - 0.5
            })
            .collect();
        AudioBlock::new(samples, SR)
    }

    #[test]
    fn yin_tracks_guitar_strings() {
        let mut yin = Yin::new(0.15, 0.01);
        for &freq in &[82.41_f32, 110.0, 146.83, 196.0, 246.94, 329.63, 440.0, 1046.5] {
            let estimate = run(&mut yin, &AudioBlock::sine(freq, 0.5, SR, 2048));
            let detected = estimate.frequency().expect("sine should be pitched");
            assert!(
                cents_between(detected, freq).abs() < 2.0,
                "{} Hz detected as {} Hz",
                freq,
                detected
            );
            assert!(estimate.confidence().unwrap() > 0.9);
        }
    }

    #[test]
    fn yin_gates_silence_and_noise() {
        let mut yin = Yin::new(0.15, 0.01);
        assert_eq!(run(&mut yin, &AudioBlock::new(vec![0.0; 2048], SR)), PitchEstimate::NoPitch);
        assert_eq!(
            run(&mut yin, &AudioBlock::sine(220.0, 0.005, SR, 2048)),
            PitchEstimate::NoPitch
        );
        assert_eq!(run(&mut yin, &noise(2048)), PitchEstimate::NoPitch);
    }

    #[test]
    fn yin_rejects_periods_beyond_the_lag_range() {
        for method in [DifferenceMethod::Direct, DifferenceMethod::Fft] {
            let mut yin = Yin::new(0.15, 0.01).with_method(method);

            // E2's period (535 samples) does not fit a 1024-sample block's window.
            let low_e = AudioBlock::sine(82.41, 0.5, SR, 1024);
            assert_eq!(run(&mut yin, &low_e), PitchEstimate::NoPitch, "{:?}", method);

            // 55 Hz is below the 60 Hz floor.
            let low_a = AudioBlock::sine(55.0, 0.5, SR, 2048);
            assert_eq!(run(&mut yin, &low_a), PitchEstimate::NoPitch, "{:?}", method);

            // The same string is still tracked once the block is long enough.
            let detected = run(&mut yin, &AudioBlock::sine(82.41, 0.5, SR, 2048))
                .frequency()
                .unwrap();
            assert!(cents_between(detected, 82.41).abs() < 2.0);
        }
    }

    #[test]
    fn yin_finds_fundamental_under_loud_harmonic() {
        let block = bright_tone(110.0, 2048);

        let yin = run(&mut Yin::new(0.15, 0.01), &block).frequency().unwrap();
        assert!(cents_between(yin, 110.0).abs() < 5.0);

        // Peak-picking locks onto the louder harmonic.
        let peak = run(&mut PeakPicking::default(), &block).frequency().unwrap();
        assert!((peak - 220.0).abs() <= SR as f32 / 2048.0);
    }

    #[test]
    fn fft_difference_matches_direct() {
        let block = bright_tone(196.0, 2048);
        let window = block.len() / 2;

        let direct = difference_direct(block.samples(), window);
        let mut fast = Yin::new(0.15, 0.01).with_method(DifferenceMethod::Fft);
        let via_fft = fast.difference(block.samples(), window);

        let scale = direct.iter().cloned().fold(0.0f32, f32::max);
        for (tau, (a, b)) in direct.iter().zip(&via_fft).enumerate() {
            assert!((a - b).abs() <= scale * 1e-4, "tau {}: {} vs {}", tau, a, b);
        }
    }

    #[test]
    fn fast_yin_agrees_with_yin() {
        let block = AudioBlock::sine(164.81, 0.4, SR, 2048);
        let direct = run(&mut Yin::new(0.15, 0.01), &block).frequency().unwrap();
        let fast = run(&mut Yin::new(0.15, 0.01).with_method(DifferenceMethod::Fft), &block)
            .frequency()
            .unwrap();
        assert!((direct - fast).abs() < 0.05);
    }

    #[test]
    fn peak_picking_reports_no_pitch_on_silence() {
        let mut picker = PeakPicking::default();
        assert_eq!(run(&mut picker, &AudioBlock::new(vec![0.0; 1024], SR)), PitchEstimate::NoPitch);

        let mut gated = PeakPicking::new(1e6);
        assert_eq!(run(&mut gated, &AudioBlock::sine(440.0, 0.5, SR, 1024)), PitchEstimate::NoPitch);
    }

    #[test]
    fn peak_picking_is_deterministic() {
        let block = AudioBlock::sine(329.63, 0.5, SR, 1024);
        let mut picker = PeakPicking::default();
        let first = run(&mut picker, &block);
        assert_eq!(first, run(&mut picker, &block));
        assert!((first.frequency().unwrap() - 329.63).abs() <= SR as f32 / 1024.0);
    }

    #[test]
    fn spectrum_refinement_closes_in_on_peak() {
        let block = AudioBlock::sine(440.0, 0.5, SR, 2048);
        let spectrum = SpectralAnalyzer::new(Window::Hann).transform(&block);
        let refined = refine_from_spectrum(&spectrum, 430.0);
        assert!((refined - 440.0).abs() < 1.5, "refined to {}", refined);
        assert_eq!(refine_from_spectrum(&spectrum, -1.0), -1.0);
    }

    #[test]
    fn builder_follows_config() {
        let mut config = EstimatorConfig::default();
        assert_eq!(build_estimator(&config).name(), "yin");
        config.kind = EstimatorKind::FastYin;
        assert_eq!(build_estimator(&config).name(), "fast-yin");
        config.kind = EstimatorKind::PeakPicking;
        assert_eq!(build_estimator(&config).name(), "peak-picking");
    }
}
