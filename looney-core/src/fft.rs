//! # Fast Fourier Transform (FFT) Module
//!
//! This module turns an [`AudioBlock`] into a magnitude [`Spectrum`].
//!
//! ## Conventions
//! - Blocks are zero-padded to the next power of two
//! - Forward transform, no 1/N scaling
//! - Bin `i` sits at `i * sample_rate / N` Hz; only bins below Nyquist are kept
//! - Optional DC removal + Hann windowing for reduced spectral leakage

use crate::audio::AudioBlock;
use crate::config::Window;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::Arc;

/// One frequency sample of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBin {
    /// Centre frequency in Hz.
    pub frequency: f32,
    /// Complex modulus of the FFT output.
    pub magnitude: f32,
}

/// Magnitude spectrum of one block, from DC up to (excluding) Nyquist.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    bins: Vec<SpectrumBin>,
    fft_size: usize,
    sample_rate: u32,
}

impl Spectrum {
    /// Builds a spectrum from the magnitudes of its first `fft_size / 2` bins.
    pub fn from_magnitudes(magnitudes: &[f32], fft_size: usize, sample_rate: u32) -> Self {
        let bin_width = sample_rate as f32 / fft_size as f32;
        let bins = magnitudes
            .iter()
            .take(fft_size / 2)
            .enumerate()
            .map(|(i, &magnitude)| SpectrumBin {
                frequency: i as f32 * bin_width,
                magnitude,
            })
            .collect();
        Self {
            bins,
            fft_size,
            sample_rate,
        }
    }

    pub fn bins(&self) -> &[SpectrumBin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Transform length after padding.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frequency distance between neighbouring bins.
    pub fn bin_width(&self) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// The loudest bin above DC. Exact ties keep the lower frequency.
    pub fn peak(&self) -> Option<SpectrumBin> {
        let mut best: Option<SpectrumBin> = None;
        for bin in self.bins.iter().skip(1) {
            if best.is_none_or(|b| bin.magnitude > b.magnitude) {
                best = Some(*bin);
            }
        }
        best
    }

    /// Up to `count` local maxima above DC, loudest first.
    pub fn top_peaks(&self, count: usize) -> Vec<SpectrumBin> {
        let mut peaks: Vec<SpectrumBin> = self
            .bins
            .windows(3)
            .filter(|w| w[1].magnitude > w[0].magnitude && w[1].magnitude >= w[2].magnitude)
            .map(|w| w[1])
            .collect();
        peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
        peaks.truncate(count);
        peaks
    }
}

/// Computes magnitude spectra, caching one FFT plan per transform size.
pub struct SpectralAnalyzer {
    window: Window,
    plans: HashMap<usize, Arc<dyn Fft<f32>>>,
}

impl SpectralAnalyzer {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            plans: HashMap::new(),
        }
    }

    /// Performs a forward FFT on a block and returns its magnitude spectrum.
    ///
    /// The block is zero-padded to the next power of two. With
    /// [`Window::Hann`] the DC offset is removed and the window applied first.
    ///
    /// # Arguments
    /// * `block` - Mono samples of any length
    ///
    /// # Returns
    /// The magnitudes of the first `N / 2` bins of the `N`-point transform,
    /// unscaled. An empty block yields an empty spectrum.
    pub fn transform(&mut self, block: &AudioBlock) -> Spectrum {
        if block.is_empty() {
            return Spectrum {
                bins: Vec::new(),
                fft_size: 0,
                sample_rate: block.sample_rate(),
            };
        }

        let fft_size = padded_len(block.len());
        let mut processed_signal = block.samples().to_vec();
        if self.window == Window::Hann {
            remove_dc_offset(&mut processed_signal);
            apply_hann_window(&mut processed_signal);
        }

        let mut buffer: Vec<Complex<f32>> = processed_signal
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        buffer.resize(fft_size, Complex { re: 0.0, im: 0.0 });

        self.plan(fft_size).process(&mut buffer);

        let magnitudes: Vec<f32> = buffer
            .iter()
            .take(fft_size / 2)
            .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
            .collect();
        Spectrum::from_magnitudes(&magnitudes, fft_size, block.sample_rate())
    }

    fn plan(&mut self, fft_size: usize) -> Arc<dyn Fft<f32>> {
        Arc::clone(
            self.plans
                .entry(fft_size)
                .or_insert_with(|| FftPlanner::new().plan_fft_forward(fft_size)),
        )
    }
}

/// Transform length used for a block of `len` samples.
pub fn padded_len(len: usize) -> usize {
    len.next_power_of_two()
}

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window, tapering the signal to zero at the edges.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}
