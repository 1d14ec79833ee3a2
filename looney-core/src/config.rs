//! # Configuration Module
//!
//! Runtime configuration for a tuner session, loadable from a JSON file.
//! Every field has a default, so a partial file only overrides what it names.

use crate::error::{TunerError, TunerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Sample rate used by the reference tuner (CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Number of samples per analysed block.
///
/// 2048 samples (~46ms at 44.1kHz) keeps the low E string (82.41 Hz) inside
/// the YIN lag window.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Concert pitch for A4.
pub const DEFAULT_REFERENCE_PITCH: f32 = 440.0;

/// Pre-processing applied to a block before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    /// Raw samples, no taper.
    #[default]
    Rectangular,
    /// DC offset removal followed by a Hann taper.
    Hann,
}

/// Which pitch estimation strategy the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Loudest non-DC spectrum bin.
    PeakPicking,
    /// YIN with a direct difference function.
    #[default]
    Yin,
    /// YIN with the difference function computed through an FFT.
    FastYin,
}

/// Pitch estimator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub kind: EstimatorKind,
    /// Absolute threshold on the normalized YIN difference.
    pub yin_threshold: f32,
    /// Blocks with a lower RMS level are reported as silence.
    pub amplitude_threshold: f32,
    /// Lowest frequency YIN searches for, in Hz.
    pub min_frequency: f32,
    /// Highest frequency YIN searches for, in Hz.
    pub max_frequency: f32,
    /// Peak-picking reports no pitch unless the peak exceeds this magnitude.
    pub peak_floor: f32,
    /// Refine YIN estimates against the magnitude spectrum.
    pub refine_with_spectrum: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::default(),
            yin_threshold: 0.15,
            amplitude_threshold: 0.01,
            min_frequency: 60.0,
            max_frequency: 1500.0,
            peak_floor: 0.0,
            refine_with_spectrum: false,
        }
    }
}

/// Complete tuner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Cadence of the analysis loop.
    pub analysis_interval_ms: u64,
    /// Upper bound on waiting for a single block.
    pub read_timeout_ms: u64,
    /// Blocks buffered between capture and analysis.
    pub queue_capacity: usize,
    pub reference_pitch: f32,
    pub window: Window,
    pub estimator: EstimatorConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            analysis_interval_ms: 500,
            read_timeout_ms: 250,
            queue_capacity: 2,
            reference_pitch: DEFAULT_REFERENCE_PITCH,
            window: Window::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl TunerConfig {
    /// Loads and validates a configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TunerResult<Self> {
        let path = path.as_ref();
        let config_error = |reason: String| TunerError::Config {
            path: path.display().to_string(),
            reason,
        };

        let contents = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: TunerConfig =
            serde_json::from_str(&contents).map_err(|e| config_error(e.to_string()))?;
        config.validate()?;

        log::info!("[CONFIG] Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads a configuration file, falling back to defaults on any error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("[CONFIG] {}. Using defaults.", err);
                Self::default()
            }
        }
    }

    /// Checks that every value is usable by the pipeline.
    pub fn validate(&self) -> TunerResult<()> {
        let invalid = |reason: String| Err(TunerError::InvalidConfig { reason });

        if self.sample_rate == 0 {
            return invalid("sample_rate must be greater than 0".into());
        }
        if self.block_size < 64 {
            return invalid(format!(
                "block_size must be at least 64 samples (got {})",
                self.block_size
            ));
        }
        if self.analysis_interval_ms == 0 {
            return invalid("analysis_interval_ms must be greater than 0".into());
        }
        if self.read_timeout_ms == 0 {
            return invalid("read_timeout_ms must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".into());
        }
        if !(self.reference_pitch.is_finite() && self.reference_pitch > 0.0) {
            return invalid(format!(
                "reference_pitch must be a positive frequency (got {})",
                self.reference_pitch
            ));
        }

        let est = &self.estimator;
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(est.min_frequency > 0.0 && est.min_frequency < est.max_frequency) {
            return invalid(format!(
                "estimator frequency range {}..{} Hz is empty",
                est.min_frequency, est.max_frequency
            ));
        }
        if est.max_frequency >= nyquist {
            return invalid(format!(
                "max_frequency {} Hz must stay below Nyquist ({} Hz)",
                est.max_frequency, nyquist
            ));
        }
        if !(est.yin_threshold > 0.0 && est.yin_threshold < 1.0) {
            return invalid(format!(
                "yin_threshold must be in (0, 1) (got {})",
                est.yin_threshold
            ));
        }
        if est.amplitude_threshold < 0.0 || est.peak_floor < 0.0 {
            return invalid("amplitude_threshold and peak_floor must not be negative".into());
        }
        Ok(())
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
