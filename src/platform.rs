//! Seams between the detection core and the host audio system.
//!
//! The controller and the permission manager only talk to the microphone
//! through these traits, so the same state machines run against `cpal`
//! (see [`crate::audio`]) or a scripted platform in tests.

use crate::config::AnalyserConfig;
use crate::error::{AcquireError, AnalysisError};

/// Result of a non-intrusive permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformPermission {
    Granted,
    Denied,
    Prompt,
}

/// An open microphone input.
pub trait InputStream {
    /// Stop every track and release the device. Must be idempotent.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// The processing graph: an analysis node fed by an [`InputStream`].
pub trait FrequencyAnalyser {
    /// Number of frequency bins written by [`Self::get_byte_frequency_data`]
    fn frequency_bin_count(&self) -> usize;

    /// Graphs may start suspended and must be resumed before they produce data
    fn is_suspended(&self) -> bool;

    fn resume(&mut self) -> Result<(), AcquireError>;

    /// Fill `out` with the current spectrum, one byte per bin
    fn get_byte_frequency_data(&mut self, out: &mut [u8]) -> Result<(), AnalysisError>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

pub trait AudioPlatform {
    type Stream: InputStream;
    type Analyser: FrequencyAnalyser;

    /// Query the current permission without prompting.
    /// `None` when the host has no way to answer.
    fn query_permission(&self) -> Option<PlatformPermission>;

    /// Open the default microphone, prompting for access if the host does that
    fn open_stream(&self) -> Result<Self::Stream, AcquireError>;

    /// Build a processing graph fed by `stream`
    fn create_analyser(
        &self,
        stream: &Self::Stream,
        config: &AnalyserConfig,
    ) -> Result<Self::Analyser, AcquireError>;
}
