use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::dsp::spectral::{BandConfig, PRUNING_SKO_COEFF};
use crate::physio::breath::{
    DEFAULT_BREATH_AVERAGE, DEFAULT_BREATH_LENGTH, DEFAULT_BREATH_NORMALIZATION_INTERVAL,
    DEFAULT_BREATH_STROBE,
};
use crate::physio::spo2::Spo2Calibration;
use crate::rppg::combiner::ColorChannel;

/// Shortest ring or FFT window accepted.
pub const MIN_WINDOW_LENGTH: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Length of the per-frame histories
    pub data_length: usize,
    /// Heart FFT and PCA window, `<= data_length`
    pub buffer_length: usize,
    pub color_channel: ColorChannel,
    pub pca_enabled: bool,
    pub pruning_enabled: bool,
    /// Outlier limit in standard deviations
    pub pruning_sko_coeff: f64,
    /// When off, every estimate is reported reliable
    pub snr_control_enabled: bool,
    /// Samples per pulse-counter interval
    pub estimation_interval: usize,
    /// Centring/normalisation window of the heart signal
    pub normalization_interval: usize,
    /// Frames between breath samples
    pub breath_strobe: usize,
    /// Frames averaged into one breath sample
    pub breath_average: usize,
    /// Centring/normalisation window of the breath signal
    pub breath_cn_interval: usize,
    /// Breath FFT window
    pub breath_length: usize,
    pub instance_id: u32,
    /// Emit `CurrentValues`/`SampleValues` on every frame
    pub emit_sample_events: bool,
    pub heart: BandConfig,
    pub breath: BandConfig,
    pub spo2: Spo2Calibration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            data_length: 221,
            buffer_length: 221,
            color_channel: ColorChannel::Green,
            pca_enabled: false,
            pruning_enabled: true,
            pruning_sko_coeff: PRUNING_SKO_COEFF,
            snr_control_enabled: true,
            estimation_interval: 300,
            normalization_interval: 15,
            breath_strobe: DEFAULT_BREATH_STROBE,
            breath_average: DEFAULT_BREATH_AVERAGE,
            breath_cn_interval: DEFAULT_BREATH_NORMALIZATION_INTERVAL,
            breath_length: DEFAULT_BREATH_LENGTH,
            instance_id: 0,
            emit_sample_events: true,
            heart: BandConfig::heart(),
            breath: BandConfig::breath(),
            spo2: Spo2Calibration::default(),
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: ProcessorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    /// Environment variables are prefixed with HARMONIC_
    /// Example: HARMONIC_BREATH_STROBE=4
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_override("HARMONIC_DATA_LENGTH")? {
            self.data_length = v;
        }
        if let Some(v) = env_override("HARMONIC_BUFFER_LENGTH")? {
            self.buffer_length = v;
        }
        if let Some(v) = env_override("HARMONIC_COLOR_CHANNEL")? {
            self.color_channel = v;
        }
        if let Some(v) = env_override("HARMONIC_PCA_ENABLED")? {
            self.pca_enabled = v;
        }
        if let Some(v) = env_override("HARMONIC_PRUNING_ENABLED")? {
            self.pruning_enabled = v;
        }
        if let Some(v) = env_override("HARMONIC_SNR_CONTROL_ENABLED")? {
            self.snr_control_enabled = v;
        }
        if let Some(v) = env_override("HARMONIC_ESTIMATION_INTERVAL")? {
            self.estimation_interval = v;
        }
        if let Some(v) = env_override("HARMONIC_NORMALIZATION_INTERVAL")? {
            self.normalization_interval = v;
        }
        if let Some(v) = env_override("HARMONIC_BREATH_STROBE")? {
            self.breath_strobe = v;
        }
        if let Some(v) = env_override("HARMONIC_BREATH_AVERAGE")? {
            self.breath_average = v;
        }
        if let Some(v) = env_override("HARMONIC_BREATH_CN_INTERVAL")? {
            self.breath_cn_interval = v;
        }
        if let Some(v) = env_override("HARMONIC_INSTANCE_ID")? {
            self.instance_id = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_length < MIN_WINDOW_LENGTH {
            return Err(ConfigError::Validation(format!(
                "data_length must be >= {MIN_WINDOW_LENGTH}"
            )));
        }
        if self.buffer_length < MIN_WINDOW_LENGTH || self.buffer_length > self.data_length {
            return Err(ConfigError::Validation(format!(
                "buffer_length must be in [{MIN_WINDOW_LENGTH}, data_length]"
            )));
        }
        if self.breath_length < MIN_WINDOW_LENGTH {
            return Err(ConfigError::Validation(format!(
                "breath_length must be >= {MIN_WINDOW_LENGTH}"
            )));
        }
        if !self.pruning_sko_coeff.is_finite() || self.pruning_sko_coeff <= 0.0 {
            return Err(ConfigError::Validation(
                "pruning_sko_coeff must be positive".to_string(),
            ));
        }
        if self.estimation_interval == 0 {
            return Err(ConfigError::Validation(
                "estimation_interval must be >= 1".to_string(),
            ));
        }
        if self.normalization_interval < 2 || self.normalization_interval > self.data_length {
            return Err(ConfigError::Validation(
                "normalization_interval must be in [2, data_length]".to_string(),
            ));
        }
        if self.breath_strobe == 0 {
            return Err(ConfigError::Validation(
                "breath_strobe must be >= 1".to_string(),
            ));
        }
        if self.breath_average == 0 || self.breath_average > self.data_length {
            return Err(ConfigError::Validation(
                "breath_average must be in [1, data_length]".to_string(),
            ));
        }
        if self.breath_cn_interval < 2 || self.breath_cn_interval > self.breath_length {
            return Err(ConfigError::Validation(
                "breath_cn_interval must be in [2, breath_length]".to_string(),
            ));
        }
        self.heart.validate("heart").map_err(ConfigError::Validation)?;
        self.breath.validate("breath").map_err(ConfigError::Validation)?;
        self.spo2.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("Invalid {name}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
