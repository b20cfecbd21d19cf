/// Application-wide constants for blow detection, analysis and permission handling

pub mod detection {
    /// Falling-edge threshold as a fraction of the rising-edge threshold
    /// A blow ends once the level drops to 0.8x the blow threshold or below
    pub const HYSTERESIS_RATIO: f32 = 0.8;
}

pub mod analyser {
    /// Largest value a frequency bin can hold in byte form
    pub const MAX_BIN_VALUE: f32 = 255.0;

    /// Accepted FFT sizes (inclusive, powers of two only)
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32768;
}

pub mod permission {
    use std::time::Duration;

    /// A not-allowed failure faster than this, after a prompt was already shown,
    /// is treated as a cached block rather than a fresh user decision
    pub const FAST_DENIAL_WINDOW: Duration = Duration::from_millis(100);
}

pub mod calibration {
    /// Margin added on top of the ambient mean level
    pub const MIN_MARGIN_OVER_MEAN: f32 = 0.1;

    /// Bounds for any recommended threshold
    pub const MIN_RECOMMENDED_THRESHOLD: f32 = 0.1;
    pub const MAX_RECOMMENDED_THRESHOLD: f32 = 0.9;
}
