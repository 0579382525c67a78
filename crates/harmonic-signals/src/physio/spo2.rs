//! SpO2 estimation by the ratio-of-ratios method.
//!
//! The pulsatile (AC) part of each channel is read from its spectrum at the
//! heart harmonic; the static (DC) part is the window mean. The calibration
//! curve maps `R = (AC_red/DC_red) / (AC_blue/DC_blue)` to a percentage.

use serde::{Deserialize, Serialize};

use crate::buffer::RingBuffer;
use crate::dsp::spectral::{AnalysisOptions, SpectralAnalyzer};

/// DC or AC components at or below this are treated as absent.
const COMPONENT_FLOOR: f64 = 1.0e-12;

/// Polynomial calibration `SpO2 = c0 + c1·R + c2·R² + ...`, clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spo2Calibration {
    /// Coefficients, lowest order first
    pub coefficients: Vec<f64>,
    pub min_percent: f64,
    pub max_percent: f64,
}

impl Default for Spo2Calibration {
    fn default() -> Self {
        Self {
            coefficients: vec![110.0, -25.0],
            min_percent: 0.0,
            max_percent: 100.0,
        }
    }
}

impl Spo2Calibration {
    pub fn apply(&self, ratio: f64) -> f64 {
        let value = self
            .coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * ratio + c);
        value.clamp(self.min_percent, self.max_percent)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() {
            return Err("spo2.coefficients must not be empty".into());
        }
        if self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("spo2.coefficients must be finite".into());
        }
        if !(self.min_percent.is_finite() && self.max_percent.is_finite())
            || self.min_percent > self.max_percent
        {
            return Err("spo2.min_percent must be <= spo2.max_percent".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spo2Estimate {
    /// Saturation in percent
    pub value: f64,
    pub ratio: f64,
    /// Spectrum bin the AC components were read at
    pub bin: usize,
}

/// `(ac_red / dc_red) / (ac_blue / dc_blue)`, or `None` if any component is
/// too small to divide by.
pub fn ratio_of_ratios(ac_red: f64, dc_red: f64, ac_blue: f64, dc_blue: f64) -> Option<f64> {
    let usable = |v: f64| v.is_finite() && v > COMPONENT_FLOOR;
    if !(usable(dc_red) && usable(dc_blue) && usable(ac_blue) && ac_red.is_finite()) {
        return None;
    }
    let ratio = (ac_red / dc_red) / (ac_blue / dc_blue);
    (ratio.is_finite() && ratio > COMPONENT_FLOOR).then_some(ratio)
}

/// Two analyzers of the heart window length, one per channel.
#[derive(Debug)]
pub struct Spo2Estimator {
    red: SpectralAnalyzer,
    blue: SpectralAnalyzer,
    red_window: Vec<f64>,
    blue_window: Vec<f64>,
    calibration: Spo2Calibration,
}

impl Spo2Estimator {
    pub fn new(length: usize, calibration: Spo2Calibration) -> Self {
        Self {
            red: SpectralAnalyzer::new(length),
            blue: SpectralAnalyzer::new(length),
            red_window: vec![0.0; length],
            blue_window: vec![0.0; length],
            calibration,
        }
    }

    pub fn len(&self) -> usize {
        self.red_window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.red_window.is_empty()
    }

    pub fn calibration(&self) -> &Spo2Calibration {
        &self.calibration
    }

    pub fn set_calibration(&mut self, calibration: Spo2Calibration) {
        self.calibration = calibration;
    }

    /// Estimate from the newest window of raw red and blue means.
    ///
    /// Returns `None` when the histories are shorter than the window, `bin`
    /// is outside `1..=len/2`, or a component vanishes.
    pub fn estimate(&mut self, red: &RingBuffer, blue: &RingBuffer, bin: usize) -> Option<Spo2Estimate> {
        let n = self.len();
        if red.filled() < n || blue.filled() < n || bin == 0 || bin > n / 2 {
            return None;
        }
        red.copy_latest(&mut self.red_window);
        blue.copy_latest(&mut self.blue_window);

        let dc_red = mean(&self.red_window);
        let dc_blue = mean(&self.blue_window);

        // pruning would clip the pulsatile peaks the AC term is read from
        let options = AnalysisOptions {
            pruning: false,
            ..Default::default()
        };
        let ac_red = self.red.transform(&self.red_window, &options)[bin];
        let ac_blue = self.blue.transform(&self.blue_window, &options)[bin];

        let ratio = ratio_of_ratios(ac_red, dc_red, ac_blue, dc_blue)?;
        Some(Spo2Estimate {
            value: self.calibration.apply(ratio),
            ratio,
            bin,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const N: usize = 128;
    const FS: f64 = 32.0;
    // 1.5 Hz at 32 Hz over 128 samples is bin 6
    const BIN: usize = 6;

    fn channel(dc: f64, ac: f64) -> RingBuffer {
        let mut ring = RingBuffer::new(N);
        for i in 0..N {
            let t = i as f64 / FS;
            ring.push(dc + ac * (2.0 * PI * 1.5 * t).sin());
        }
        ring
    }

    #[test]
    fn test_default_calibration() {
        let cal = Spo2Calibration::default();
        assert_relative_eq!(cal.apply(0.4), 100.0);
        assert_relative_eq!(cal.apply(0.6), 95.0);
        assert_relative_eq!(cal.apply(1.0), 85.0);
        assert_eq!(cal.apply(10.0), 0.0);
    }

    #[test]
    fn test_known_ratio() {
        let red = channel(100.0, 1.0);
        let blue = channel(50.0, 1.0);
        let mut est = Spo2Estimator::new(N, Spo2Calibration::default());
        let spo2 = est.estimate(&red, &blue, BIN).unwrap();
        assert_relative_eq!(spo2.ratio, 0.5, epsilon = 1e-6);
        assert_relative_eq!(spo2.value, 97.5, epsilon = 1e-4);
        assert_eq!(spo2.bin, BIN);
    }

    #[test]
    fn test_ratio_invariant_to_red_scale() {
        let blue = channel(80.0, 0.8);
        let mut est = Spo2Estimator::new(N, Spo2Calibration::default());
        let base = est.estimate(&channel(120.0, 1.2), &blue, BIN).unwrap();
        for scale in [0.25, 3.0, 40.0] {
            let scaled = est
                .estimate(&channel(120.0 * scale, 1.2 * scale), &blue, BIN)
                .unwrap();
            assert_relative_eq!(scaled.ratio, base.ratio, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let red = channel(100.0, 1.0);
        let mut est = Spo2Estimator::new(N, Spo2Calibration::default());
        assert!(est.estimate(&red, &channel(0.0, 0.0), BIN).is_none());
        assert!(est.estimate(&red, &red, 0).is_none());
        assert!(est.estimate(&red, &red, N).is_none());
        assert!(est.estimate(&RingBuffer::new(N), &red, BIN).is_none());
        assert!(ratio_of_ratios(1.0, 0.0, 1.0, 1.0).is_none());
    }

    #[test]
    fn test_calibration_validation() {
        assert!(Spo2Calibration::default().validate().is_ok());
        let empty = Spo2Calibration {
            coefficients: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());
        let inverted = Spo2Calibration {
            min_percent: 90.0,
            max_percent: 80.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
