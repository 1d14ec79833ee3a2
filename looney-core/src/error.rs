//! # Error Module
//!
//! Typed failures of the tuner core. Device and block errors are what the
//! session reacts to; the rest cover configuration and misuse.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the core.
pub type TunerResult<T> = Result<T, TunerError>;

/// Errors produced by capture, analysis, configuration and session control.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunerError {
    /// No usable input device, or the device refused to open or stopped
    /// delivering audio. Fatal to the current start attempt or session.
    #[error("audio input device unavailable: {reason}")]
    DeviceUnavailable {
        /// What went wrong while looking up or driving the device.
        reason: String,
    },

    /// A single block read did not complete in time. Transient.
    #[error("no audio block arrived within {timeout:?}")]
    DeviceReadTimeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// A block did not match the configured capture format.
    #[error("malformed audio block: expected {expected}, found {found}")]
    MalformedBlock {
        /// Expected length / sample rate description.
        expected: String,
        /// What the block actually carried.
        found: String,
    },

    /// `start` was called on a session that is already listening.
    #[error("tuner session is already listening")]
    AlreadyListening,

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value is wrong and why.
        reason: String,
    },

    /// Reading or parsing a configuration file failed.
    #[error("failed to load configuration from {path}: {reason}")]
    Config {
        /// The file that was being loaded.
        path: String,
        /// I/O or JSON error text.
        reason: String,
    },

    /// The analysis pipeline panicked while processing a block.
    #[error("analysis failed: {reason}")]
    AnalysisFailed {
        /// Panic payload, when it was a string.
        reason: String,
    },
}

impl TunerError {
    /// Shorthand for [`TunerError::DeviceUnavailable`].
    pub fn device(reason: impl Into<String>) -> Self {
        TunerError::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Errors after which a listening session must return to idle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TunerError::DeviceUnavailable { .. } | TunerError::MalformedBlock { .. }
        )
    }
}
