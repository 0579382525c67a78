//! Physiological estimators built on the spectral analyzer.

pub mod breath;
pub mod spo2;

pub use breath::{BreathExtractor, BreathSample};
pub use spo2::{ratio_of_ratios, Spo2Calibration, Spo2Estimate, Spo2Estimator};
