//! One-shot ambient noise calibration.
//!
//! Listen to the room for a short while without blowing, then recommend a
//! blow threshold comfortably above the loudest ambient level seen.

use anyhow::{Result, bail};
use std::time::{Duration, Instant};

use crate::config::CalibrationConfig;
use crate::constants::calibration::{
    MAX_RECOMMENDED_THRESHOLD, MIN_MARGIN_OVER_MEAN, MIN_RECOMMENDED_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub samples: usize,
    pub mean: f32,
    pub peak: f32,
    pub recommended_threshold: f32,
}

pub struct BaselineSampler {
    duration: Duration,
    headroom: f32,
    started_at: Option<Instant>,
    samples: usize,
    sum: f32,
    peak: f32,
}

impl BaselineSampler {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            duration: config.sample_duration(),
            headroom: config.headroom,
            started_at: None,
            samples: 0,
            sum: 0.0,
            peak: 0.0,
        }
    }

    /// Record one level. Returns true once the sampling window is full;
    /// levels arriving after that are ignored.
    pub fn record(&mut self, level: f32, now: Instant) -> bool {
        let started_at = *self.started_at.get_or_insert(now);
        if now.saturating_duration_since(started_at) >= self.duration {
            return true;
        }

        self.samples += 1;
        self.sum += level;
        self.peak = self.peak.max(level);
        false
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn finish(&self) -> Result<CalibrationResult> {
        if self.samples == 0 {
            bail!("no levels recorded during calibration");
        }

        let mean = self.sum / self.samples as f32;
        Ok(CalibrationResult {
            samples: self.samples,
            mean,
            peak: self.peak,
            recommended_threshold: recommend_threshold(mean, self.peak, self.headroom),
        })
    }
}

pub fn recommend_threshold(mean: f32, peak: f32, headroom: f32) -> f32 {
    (peak * headroom)
        .max(mean + MIN_MARGIN_OVER_MEAN)
        .clamp(MIN_RECOMMENDED_THRESHOLD, MAX_RECOMMENDED_THRESHOLD)
}
