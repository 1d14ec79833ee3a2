//! Core logic for the looney pitch detector.
//!
//! This crate captures audio blocks, computes their spectra, estimates the
//! fundamental frequency and maps it onto the equal-tempered scale. It is
//! completely headless; presentation lives in `looney-cli`.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod queue;
pub mod session;
pub mod tuning;

pub use analysis::{AnalysisResult, Pipeline};
pub use audio::{AudioBlock, CpalSource, SampleSource, SourceProvider, SyntheticSource};
pub use config::{EstimatorConfig, EstimatorKind, TunerConfig, Window};
pub use error::{TunerError, TunerResult};
pub use fft::{SpectralAnalyzer, Spectrum, SpectrumBin};
pub use pitch::{PitchEstimate, PitchEstimator};
pub use session::{SessionState, TunerEvent, TunerSession};
pub use tuning::{NoteMapper, NoteMatch};
