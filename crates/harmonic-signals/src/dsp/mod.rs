//! DSP building blocks shared by the heart and breath pipelines.
//!
//! - `SpectralAnalyzer` - windowed FFT, dominant harmonic and SNR scoring
//! - `DigitalPreFilter` - moving-average trend signal and pulse counter

pub mod prefilter;
pub mod spectral;

pub use prefilter::{DigitalPreFilter, FilterStep, PulseRate, DIGITAL_FILTER_LENGTH};
pub use spectral::{
    hamming_window, prune_outliers, AnalysisOptions, BandConfig, SpectralAnalyzer,
    SpectralEstimate, SNR_CEILING,
};
