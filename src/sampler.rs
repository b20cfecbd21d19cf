use crate::constants::analyser::MAX_BIN_VALUE;
use crate::error::AnalysisError;
use crate::platform::FrequencyAnalyser;

/// Reduces one frame of frequency data to a single level in [0, 1].
///
/// The bin buffer is allocated once per session and reused every frame.
#[derive(Debug, Default)]
pub struct AmplitudeSampler {
    bins: Vec<u8>,
}

impl AmplitudeSampler {
    pub fn new(bin_count: usize) -> Self {
        Self {
            bins: vec![0; bin_count],
        }
    }

    /// Resize for a new processing graph. Only called between sessions.
    pub fn resize(&mut self, bin_count: usize) {
        self.bins.clear();
        self.bins.resize(bin_count, 0);
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn sample<A: FrequencyAnalyser>(&mut self, analyser: &mut A) -> Result<f32, AnalysisError> {
        analyser.get_byte_frequency_data(&mut self.bins)?;
        Ok(normalized_mean(&self.bins))
    }
}

/// Mean bin energy divided by the largest possible bin value
pub fn normalized_mean(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32 / MAX_BIN_VALUE
}
