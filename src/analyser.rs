//! Byte-valued spectrum analysis over the most recent microphone samples.
//!
//! Output matches what a Web Audio `AnalyserNode` hands to
//! `getByteFrequencyData`: Blackman window, magnitude scaled by the FFT
//! size, exponential smoothing across frames, then decibels mapped
//! linearly from `[min_decibels, max_decibels]` onto `0..=255`.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use crate::config::AnalyserConfig;
use crate::constants::analyser::MAX_BIN_VALUE;
use crate::error::AnalysisError;

/// Bounded buffer of mono samples written by the audio callback.
/// Holds at most `capacity` samples, dropping the oldest first.
#[derive(Debug)]
pub struct SampleTap {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn extend_from_slice(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Copy the newest samples into the tail of `out`, zero-filling the head
    pub fn copy_latest(&self, out: &mut [f32]) {
        let take = self.samples.len().min(out.len());
        let pad = out.len() - take;
        out[..pad].fill(0.0);
        let skip = self.samples.len() - take;
        for (slot, &sample) in out[pad..].iter_mut().zip(self.samples.iter().skip(skip)) {
            *slot = sample;
        }
    }
}

pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl SpectrumAnalyser {
    pub fn new(config: &AnalyserConfig) -> Self {
        let fft_size = config.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft,
            fft_size,
            window: blackman_window(fft_size),
            frame: vec![0.0; fft_size],
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            smoothed: vec![0.0; fft_size / 2],
            smoothing: config.smoothing_time_constant,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Forget the smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyse a slice of time-domain samples (the newest `fft_size` are used)
    pub fn analyse(&mut self, samples: &[f32], out: &mut [u8]) -> Result<(), AnalysisError> {
        self.check_output(out)?;
        let take = samples.len().min(self.fft_size);
        let pad = self.fft_size - take;
        self.frame[..pad].fill(0.0);
        self.frame[pad..].copy_from_slice(&samples[samples.len() - take..]);
        self.transform(out);
        Ok(())
    }

    pub fn analyse_tap(&mut self, tap: &SampleTap, out: &mut [u8]) -> Result<(), AnalysisError> {
        self.check_output(out)?;
        tap.copy_latest(&mut self.frame);
        self.transform(out);
        Ok(())
    }

    fn check_output(&self, out: &[u8]) -> Result<(), AnalysisError> {
        if out.len() != self.frequency_bin_count() {
            return Err(AnalysisError::BufferSize {
                expected: self.frequency_bin_count(),
                got: out.len(),
            });
        }
        Ok(())
    }

    fn transform(&mut self, out: &mut [u8]) {
        for ((slot, &sample), &w) in self.spectrum.iter_mut().zip(&self.frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_decibels - self.min_decibels;

        for (k, byte) in out.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * scale;
            let smoothed = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = smoothed;

            *byte = if smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                let scaled = (MAX_BIN_VALUE / range) * (db - self.min_decibels);
                scaled.clamp(0.0, MAX_BIN_VALUE) as u8
            } else {
                0
            };
        }
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;

    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}
