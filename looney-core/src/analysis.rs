//! # Analysis Pipeline Module
//!
//! One analysis cycle: validate the block, transform it, estimate the pitch
//! and map it to a note. The session runs this on its cadence; it is also
//! usable on its own for a single block.

use crate::audio::AudioBlock;
use crate::config::TunerConfig;
use crate::error::{TunerError, TunerResult};
use crate::fft::{SpectralAnalyzer, Spectrum};
use crate::pitch::{build_estimator, PitchEstimate, PitchEstimator};
use crate::tuning::{NoteMapper, NoteMatch};
use std::sync::Arc;
use std::time::SystemTime;

/// Represents the result of a single audio analysis cycle.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// When the analysis finished.
    pub timestamp: SystemTime,
    /// Position of this cycle within its session, starting at 0.
    pub sequence: u64,
    /// Magnitude spectrum, for plotting.
    pub spectrum: Arc<Spectrum>,
    pub pitch: PitchEstimate,
    /// Nearest note; `None` exactly when no pitch was detected.
    pub note: Option<NoteMatch>,
}

impl AnalysisResult {
    pub fn frequency(&self) -> Option<f32> {
        self.pitch.frequency()
    }

    pub fn is_pitched(&self) -> bool {
        self.pitch.is_detected()
    }

    /// One-line description in the console tuner's wording.
    pub fn summary(&self) -> String {
        match (&self.pitch, &self.note) {
            (PitchEstimate::Detected { frequency, .. }, Some(note)) => format!(
                "Detected pitch: {:.2} Hz ({}, {:+.1} cents)",
                frequency,
                note.display_name(),
                note.cents
            ),
            (PitchEstimate::Detected { frequency, .. }, None) => {
                format!("Detected pitch: {:.2} Hz", frequency)
            }
            (PitchEstimate::NoPitch, _) => "No pitch detected".to_string(),
        }
    }
}

/// Spectral analysis, pitch estimation and note mapping for one block size.
pub struct Pipeline {
    sample_rate: u32,
    block_size: usize,
    analyzer: SpectralAnalyzer,
    estimator: Box<dyn PitchEstimator>,
    mapper: NoteMapper,
    sequence: u64,
}

impl Pipeline {
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            analyzer: SpectralAnalyzer::new(config.window),
            estimator: build_estimator(&config.estimator),
            mapper: NoteMapper::new(config.reference_pitch),
            sequence: 0,
        }
    }

    /// Replaces the configured estimator.
    pub fn with_estimator(mut self, estimator: Box<dyn PitchEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    /// Rejects blocks that do not match the configured capture format.
    pub fn check_block(&self, block: &AudioBlock) -> TunerResult<()> {
        if block.len() != self.block_size || block.sample_rate() != self.sample_rate {
            return Err(TunerError::MalformedBlock {
                expected: format!("{} samples at {} Hz", self.block_size, self.sample_rate),
                found: format!("{} samples at {} Hz", block.len(), block.sample_rate()),
            });
        }
        Ok(())
    }

    /// Performs a full analysis on a single block.
    ///
    /// 1. Checks the block against the configured format
    /// 2. Computes the magnitude spectrum
    /// 3. Estimates the fundamental frequency
    /// 4. Finds the nearest note and the cents deviation
    pub fn analyze(&mut self, block: &AudioBlock) -> TunerResult<AnalysisResult> {
        self.check_block(block)?;

        let spectrum = self.analyzer.transform(block);
        let pitch = self.estimator.estimate(block, &spectrum);
        let note = pitch
            .frequency()
            .and_then(|freq| self.mapper.nearest_note(freq));

        let sequence = self.sequence;
        self.sequence += 1;

        Ok(AnalysisResult {
            timestamp: SystemTime::now(),
            sequence,
            spectrum: Arc::new(spectrum),
            pitch,
            note,
        })
    }
}
