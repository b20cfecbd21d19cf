//! Typed errors raised by the audio platform.
//!
//! Public core operations never hand these to their callers directly: the
//! controller turns them into a `false` start result and the permission
//! manager turns them into a [`crate::permission::DenialReason`].

use thiserror::Error;

/// Failure to acquire or prepare an audio resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The host (or the user) refused microphone access.
    #[error("Microphone access not allowed: {0}")]
    NotAllowed(String),

    /// No input device is present.
    #[error("No input device found: {0}")]
    NotFound(String),

    /// The device exists but is held by someone else or cannot be read.
    #[error("Input device busy: {0}")]
    Busy(String),

    /// The host cannot provide the requested capability at all.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A request is already in flight on this permission manager.
    #[error("Microphone request already in progress")]
    RequestInProgress,

    #[error("Audio error: {0}")]
    Other(String),
}

/// Failure while reading a frame of analysis data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Processing graph is closed")]
    GraphClosed,

    #[error("Sample tap unavailable: {0}")]
    TapUnavailable(String),

    #[error("Analysis buffer has {got} bins, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}
