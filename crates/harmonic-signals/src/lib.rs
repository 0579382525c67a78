//! # harmonic-signals
//!
//! Streaming remote photoplethysmography for contactless vital signs.
//!
//! This crate provides:
//! - **Heart rate**: windowed FFT harmonic analysis of a normalised colour
//!   channel or its PCA-aligned projection, with SNR-based reliability
//! - **Breath rate**: the same analysis on a decimated, averaged series
//! - **SpO2**: ratio-of-ratios estimate at the heart harmonic
//! - **Pulse counting**: a time-domain pre-filter usable before the FFT
//!   window fills
//! - **Warnings**: out-of-range checks against a loaded rate table
//!
//! ## Example
//!
//! ```ignore
//! use harmonic_signals::{EventKind, HarmonicProcessor};
//!
//! let mut processor = HarmonicProcessor::new(Vec::new());
//!
//! // One call per video frame: colour sums over the ROI, its area, timestamp
//! for frame in video_frames {
//!     processor.enroll_data(frame.r_sum, frame.g_sum, frame.b_sum, frame.area, frame.t_ms);
//! }
//!
//! if let Ok(estimate) = processor.compute_heart_rate() {
//!     println!("Heart rate: {:.1} BPM (snr: {:.2})", estimate.bpm(), estimate.snr);
//! }
//! for event in processor.sink_mut().drain(..) {
//!     if let EventKind::HeartTooNoisy { snr } = event.kind {
//!         println!("instance {} too noisy ({snr:.2})", event.instance_id);
//!     }
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod dsp;
pub mod error;
pub mod events;
pub mod physio;
pub mod processor;
pub mod rppg;
pub mod warning;


pub use buffer::{wrap, RingBuffer};
pub use config::{ConfigError, ProcessorConfig};
pub use dsp::{AnalysisOptions, BandConfig, PulseRate, SpectralAnalyzer, SpectralEstimate};
pub use error::{Pipeline, PipelineState, ProcessorError};
pub use events::{CallbackSink, EventKind, EventSink, NullSink, ProcessorEvent};
pub use physio::{Spo2Calibration, Spo2Estimate};
pub use processor::HarmonicProcessor;
pub use rppg::{ColorChannel, PcaError};
pub use warning::{
    ConfidenceLevel, LoadStatus, RateWarning, Sex, Vital, WarningDirection, WarningRangeTable,
};
