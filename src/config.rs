use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::analyser::{MAX_FFT_SIZE, MIN_FFT_SIZE};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub analyser: AnalyserConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Blow classification thresholds, fixed for the lifetime of a listening session
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectionConfig {
    #[serde(default = "default_blow_threshold")]
    pub blow_threshold: f32,
    #[serde(default = "default_any_blow_min_duration")]
    pub any_blow_min_duration_ms: u64,
    #[serde(default = "default_long_blow_threshold")]
    pub long_blow_threshold_ms: u64,
    #[serde(default = "default_xl_blow_threshold")]
    pub xl_blow_threshold_ms: u64,
    #[serde(default = "default_double_blow_max_gap")]
    pub double_blow_max_gap_ms: u64,
}

fn default_blow_threshold() -> f32 {
    0.28
}

fn default_any_blow_min_duration() -> u64 {
    300 // shorter excursions are treated as noise spikes
}

fn default_long_blow_threshold() -> u64 {
    700
}

fn default_xl_blow_threshold() -> u64 {
    1200
}

fn default_double_blow_max_gap() -> u64 {
    1200 // silence between the end of one blow and the start of the next
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            blow_threshold: default_blow_threshold(),
            any_blow_min_duration_ms: default_any_blow_min_duration(),
            long_blow_threshold_ms: default_long_blow_threshold(),
            xl_blow_threshold_ms: default_xl_blow_threshold(),
            double_blow_max_gap_ms: default_double_blow_max_gap(),
        }
    }
}

impl DetectionConfig {
    pub fn any_blow_min_duration(&self) -> Duration {
        Duration::from_millis(self.any_blow_min_duration_ms)
    }

    pub fn long_blow_threshold(&self) -> Duration {
        Duration::from_millis(self.long_blow_threshold_ms)
    }

    pub fn xl_blow_threshold(&self) -> Duration {
        Duration::from_millis(self.xl_blow_threshold_ms)
    }

    pub fn double_blow_max_gap(&self) -> Duration {
        Duration::from_millis(self.double_blow_max_gap_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.blow_threshold > 0.0 && self.blow_threshold <= 1.0) {
            bail!("blow_threshold must be in (0.0, 1.0]");
        }
        if self.any_blow_min_duration_ms == 0 {
            bail!("any_blow_min_duration_ms must be greater than 0");
        }
        if self.long_blow_threshold_ms < self.any_blow_min_duration_ms {
            bail!("long_blow_threshold_ms must be >= any_blow_min_duration_ms");
        }
        if self.xl_blow_threshold_ms < self.long_blow_threshold_ms {
            bail!("xl_blow_threshold_ms must be >= long_blow_threshold_ms");
        }
        if self.double_blow_max_gap_ms == 0 {
            bail!("double_blow_max_gap_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Spectrum analyser settings, modelled on the Web Audio analyser defaults
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyserConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing_time_constant: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_fft_size() -> usize {
    512
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_decibels() -> f32 {
    -100.0
}

fn default_max_decibels() -> f32 {
    -30.0
}

fn default_frame_interval() -> u64 {
    16 // ~60fps
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        AnalyserConfig {
            fft_size: default_fft_size(),
            smoothing_time_constant: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

impl AnalyserConfig {
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || self.fft_size < MIN_FFT_SIZE
            || self.fft_size > MAX_FFT_SIZE
        {
            bail!(
                "fft_size must be a power of two between {} and {}",
                MIN_FFT_SIZE,
                MAX_FFT_SIZE
            );
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            bail!("smoothing_time_constant must be in [0.0, 1.0]");
        }
        if self.min_decibels >= self.max_decibels {
            bail!("min_decibels must be lower than max_decibels");
        }
        if self.frame_interval_ms == 0 || self.frame_interval_ms > 1000 {
            bail!("frame_interval_ms must be between 1 and 1000");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CalibrationConfig {
    #[serde(default = "default_sample_duration")]
    pub sample_duration_ms: u64,
    #[serde(default = "default_headroom")]
    pub headroom: f32,
}

fn default_sample_duration() -> u64 {
    2000
}

fn default_headroom() -> f32 {
    1.5
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            sample_duration_ms: default_sample_duration(),
            headroom: default_headroom(),
        }
    }
}

impl CalibrationConfig {
    pub fn sample_duration(&self) -> Duration {
        Duration::from_millis(self.sample_duration_ms)
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".cloud-blower"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.yaml"))
    }

    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config = Self::from_yaml(&contents)?;
            tracing::debug!("loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            println!("Created default config at: {}", config_path.display());
            Ok(config)
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)
            .context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        self.analyser.validate()?;

        if self.calibration.sample_duration_ms == 0 {
            bail!("sample_duration_ms must be greater than 0");
        }
        if self.calibration.headroom < 1.0 {
            bail!("headroom must be >= 1.0");
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        let config_path = Self::config_path()?;
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs::write(&config_path, yaml)
            .context("Failed to write config file")?;

        Ok(())
    }
}
