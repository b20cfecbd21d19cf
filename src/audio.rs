use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, DefaultStreamConfigError, Device, Host, PlayStreamError, Sample,
    SampleFormat, SizedSample, Stream, StreamConfig, StreamError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::analyser::{SampleTap, SpectrumAnalyser};
use crate::config::AnalyserConfig;
use crate::constants::analyser::MAX_FFT_SIZE;
use crate::error::{AcquireError, AnalysisError};
use crate::platform::{AudioPlatform, FrequencyAnalyser, InputStream, PlatformPermission};

/// Desktop audio host reached through cpal
pub struct CpalPlatform {
    host: Host,
    device_index: Option<usize>,
}

impl CpalPlatform {
    pub fn new() -> Self {
        Self::with_device(None)
    }

    /// Use the input device at `index` (see `input_device_names`) instead of the default
    pub fn with_device(device_index: Option<usize>) -> Self {
        CpalPlatform {
            host: cpal::default_host(),
            device_index,
        }
    }

    pub fn input_device_names(&self) -> Result<Vec<String>> {
        let devices = self
            .host
            .input_devices()
            .context("Failed to enumerate input devices")?;
        Ok(devices
            .map(|device| device.name().unwrap_or_else(|_| "<unnamed>".to_string()))
            .collect())
    }

    fn input_device(&self) -> Result<Device, AcquireError> {
        match self.device_index {
            Some(index) => self
                .host
                .input_devices()
                .map_err(|e| AcquireError::Unsupported(e.to_string()))?
                .nth(index)
                .ok_or_else(|| AcquireError::NotFound(format!("input device {} not found", index))),
            None => self
                .host
                .default_input_device()
                .ok_or_else(|| AcquireError::NotFound("no input device available".to_string())),
        }
    }
}

impl Default for CpalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Live cpal input stream. The callback mixes to mono into a shared tap.
pub struct CpalStream {
    stream: Option<Stream>,
    tap: Arc<Mutex<SampleTap>>,
    device_lost: Arc<AtomicBool>,
}

impl InputStream for CpalStream {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            if let Ok(mut tap) = self.tap.lock() {
                tap.clear();
            }
            info!("microphone released");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some() && !self.device_lost.load(Ordering::Acquire)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Processing graph over a `CpalStream`'s tap. Starts suspended.
pub struct CpalAnalyser {
    tap: Arc<Mutex<SampleTap>>,
    device_lost: Arc<AtomicBool>,
    spectrum: SpectrumAnalyser,
    suspended: bool,
    closed: bool,
}

impl FrequencyAnalyser for CpalAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.spectrum.frequency_bin_count()
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<(), AcquireError> {
        if self.closed {
            return Err(AcquireError::Other("processing graph is closed".to_string()));
        }
        if self.device_lost.load(Ordering::Acquire) {
            return Err(AcquireError::NotFound("input device lost".to_string()));
        }
        self.suspended = false;
        Ok(())
    }

    fn get_byte_frequency_data(&mut self, out: &mut [u8]) -> Result<(), AnalysisError> {
        if self.closed {
            return Err(AnalysisError::GraphClosed);
        }
        if self.device_lost.load(Ordering::Acquire) {
            return Err(AnalysisError::TapUnavailable("input device lost".to_string()));
        }
        if self.suspended {
            out.fill(0);
            return Ok(());
        }

        let tap = self
            .tap
            .lock()
            .map_err(|_| AnalysisError::TapUnavailable("sample tap poisoned".to_string()))?;
        self.spectrum.analyse_tap(&tap, out)
    }

    fn close(&mut self) {
        self.closed = true;
        self.spectrum.reset();
        debug!("processing graph closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AudioPlatform for CpalPlatform {
    type Stream = CpalStream;
    type Analyser = CpalAnalyser;

    fn query_permission(&self) -> Option<PlatformPermission> {
        // Desktop hosts expose no permission query; access is only known by trying
        None
    }

    fn open_stream(&self) -> Result<CpalStream, AcquireError> {
        let device = self.input_device()?;
        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());

        let supported = device
            .default_input_config()
            .map_err(map_default_config_error)?;
        let config: StreamConfig = supported.clone().into();

        info!(
            "using input device: {} ({} channels, {} Hz, {:?})",
            device_name,
            config.channels,
            config.sample_rate.0,
            supported.sample_format()
        );

        let tap = Arc::new(Mutex::new(SampleTap::new(MAX_FFT_SIZE)));
        let device_lost = Arc::new(AtomicBool::new(false));

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, &tap, &device_lost),
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, &tap, &device_lost),
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, &tap, &device_lost),
            sample_format => {
                return Err(AcquireError::Unsupported(format!(
                    "unsupported sample format: {:?}",
                    sample_format
                )))
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(map_play_error)?;

        Ok(CpalStream {
            stream: Some(stream),
            tap,
            device_lost,
        })
    }

    fn create_analyser(
        &self,
        stream: &CpalStream,
        config: &AnalyserConfig,
    ) -> Result<CpalAnalyser, AcquireError> {
        if !stream.is_active() {
            return Err(AcquireError::Other("stream is not active".to_string()));
        }
        if config.fft_size > MAX_FFT_SIZE {
            return Err(AcquireError::Unsupported(format!(
                "fft_size {} exceeds {}",
                config.fft_size, MAX_FFT_SIZE
            )));
        }

        Ok(CpalAnalyser {
            tap: Arc::clone(&stream.tap),
            device_lost: Arc::clone(&stream.device_lost),
            spectrum: SpectrumAnalyser::new(config),
            suspended: true,
            closed: false,
        })
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tap: &Arc<Mutex<SampleTap>>,
    device_lost: &Arc<AtomicBool>,
) -> Result<Stream, BuildStreamError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let tap = Arc::clone(tap);
    let device_lost = Arc::clone(device_lost);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Never block the audio thread on a poisoned tap, just drop the data
            let Ok(mut tap) = tap.lock() else {
                return;
            };
            for frame in data.chunks_exact(channels) {
                let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                tap.push(sum / channels as f32);
            }
        },
        move |err| {
            error!("audio stream error: {}", err);
            if matches!(err, StreamError::DeviceNotAvailable) {
                device_lost.store(true, Ordering::Release);
            }
        },
        None,
    )
}

/// Backend errors only carry a description; sniff it for the permission case
fn classify_backend_error(description: &str) -> AcquireError {
    let lowered = description.to_lowercase();
    if ["permission", "denied", "not allowed", "not permitted", "unauthorized"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        AcquireError::NotAllowed(description.to_string())
    } else if ["busy", "in use", "resource temporarily unavailable"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        AcquireError::Busy(description.to_string())
    } else {
        AcquireError::Other(description.to_string())
    }
}

fn map_default_config_error(err: DefaultStreamConfigError) -> AcquireError {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => {
            AcquireError::NotFound("input device not available".to_string())
        }
        DefaultStreamConfigError::BackendSpecific { err } => classify_backend_error(&err.description),
        other => AcquireError::Unsupported(other.to_string()),
    }
}

fn map_build_error(err: BuildStreamError) -> AcquireError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            AcquireError::NotFound("input device not available".to_string())
        }
        BuildStreamError::BackendSpecific { err } => classify_backend_error(&err.description),
        other => AcquireError::Unsupported(other.to_string()),
    }
}

fn map_play_error(err: PlayStreamError) -> AcquireError {
    match err {
        PlayStreamError::BackendSpecific { err } => classify_backend_error(&err.description),
        other => AcquireError::NotFound(other.to_string()),
    }
}
