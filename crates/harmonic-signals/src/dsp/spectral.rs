//! Harmonic analysis shared by the heart and breath pipelines.
//!
//! A window is pruned, mean-centred, Hamming-windowed and transformed; the
//! dominant harmonic inside a frequency band is located, refined by an
//! amplitude-weighted centroid, and scored by its ratio to the rest of the
//! band.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use ndarray::Array1;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::buffer::RingBuffer;
use crate::error::{Pipeline, ProcessorError};

/// Heart band lower edge in s^-1 (48 bpm).
pub const BOTTOM_LIMIT: f64 = 0.8;
/// Heart band upper edge in s^-1 (210 bpm).
pub const TOP_LIMIT: f64 = 3.5;
pub const SNR_THRESHOLD: f64 = 2.0;
/// Bins on each side of the dominant bin used for the centroid.
pub const HALF_INTERVAL: usize = 2;

/// Breath band lower edge in s^-1 (12 rpm).
pub const BREATH_BOTTOM_LIMIT: f64 = 0.2;
/// Breath band upper edge in s^-1 (30 rpm).
pub const BREATH_TOP_LIMIT: f64 = 0.5;
pub const BREATH_HALF_INTERVAL: usize = 2;
pub const BREATH_SNR_THRESHOLD: f64 = 2.0;

/// Outlier limit in standard deviations.
pub const PRUNING_SKO_COEFF: f64 = 3.0;

/// Reported SNR when the band background is measurable but zero.
pub const SNR_CEILING: f64 = 1.0e6;

/// Peak amplitudes below this are treated as an empty spectrum.
const ENERGY_FLOOR: f64 = 1.0e-9;

/// Relative deviation below which a window counts as constant.
const SKO_FLOOR: f64 = 1.0e-9;

/// Search band and scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    /// Lower band edge (Hz)
    pub low_hz: f64,
    /// Upper band edge (Hz)
    pub high_hz: f64,
    /// Centroid half-width in bins
    pub half_interval: usize,
    /// Minimum SNR (peak / mean background) for a reliable estimate
    pub snr_threshold: f64,
}

impl BandConfig {
    pub const fn heart() -> Self {
        Self {
            low_hz: BOTTOM_LIMIT,
            high_hz: TOP_LIMIT,
            half_interval: HALF_INTERVAL,
            snr_threshold: SNR_THRESHOLD,
        }
    }

    pub const fn breath() -> Self {
        Self {
            low_hz: BREATH_BOTTOM_LIMIT,
            high_hz: BREATH_TOP_LIMIT,
            half_interval: BREATH_HALF_INTERVAL,
            snr_threshold: BREATH_SNR_THRESHOLD,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), String> {
        if !(self.low_hz.is_finite() && self.high_hz.is_finite()) || self.low_hz <= 0.0 {
            return Err(format!("{name}.low_hz must be positive and finite"));
        }
        if self.high_hz <= self.low_hz {
            return Err(format!("{name}.high_hz must be > low_hz"));
        }
        if self.half_interval == 0 {
            return Err(format!("{name}.half_interval must be >= 1"));
        }
        if !self.snr_threshold.is_finite() || self.snr_threshold < 0.0 {
            return Err(format!("{name}.snr_threshold must be non-negative"));
        }
        Ok(())
    }
}

/// Per-call switches taken from the processor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOptions {
    pub pruning: bool,
    pub pruning_sko_coeff: f64,
    pub snr_control: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            pruning: true,
            pruning_sko_coeff: PRUNING_SKO_COEFF,
            snr_control: true,
        }
    }
}

/// Result of one harmonic analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralEstimate {
    /// Centroid frequency of the dominant harmonic (Hz)
    pub frequency_hz: f64,
    pub snr: f64,
    pub reliable: bool,
    pub dominant_bin: usize,
    /// Sample rate the window was analysed at (Hz)
    pub sample_rate_hz: f64,
    /// Sinusoid amplitude of the dominant bin, in input units
    pub amplitude: f64,
}

impl SpectralEstimate {
    /// Frequency in events per minute.
    pub fn bpm(&self) -> f64 {
        self.frequency_hz * 60.0
    }
}

/// FFT analyzer for a fixed window length.
///
/// The plan, window coefficients and working buffers are created once in
/// `new` and reused for every call.
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f64>>,
    window: Array1<f64>,
    window_sum: f64,
    centered: Vec<f64>,
    spectrum: Vec<Complex64>,
    scratch: Vec<Complex64>,
    amplitude: Vec<f64>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("len", &self.centered.len())
            .finish()
    }
}

impl SpectralAnalyzer {
    /// # Panics
    /// If `len < 2`.
    pub fn new(len: usize) -> Self {
        assert!(len >= 2, "SpectralAnalyzer needs at least 2 samples");
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let window = hamming_window(len);
        let window_sum = window.sum();

        Self {
            fft,
            window,
            window_sum,
            centered: vec![0.0; len],
            spectrum: vec![Complex64::new(0.0, 0.0); len],
            scratch,
            amplitude: vec![0.0; len / 2 + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.centered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centered.is_empty()
    }

    /// Window after pruning and centring, before tapering.
    pub fn centered(&self) -> &[f64] {
        &self.centered
    }

    /// Amplitude spectrum of the last transform, bins `0..=len/2`.
    pub fn amplitude(&self) -> &[f64] {
        &self.amplitude
    }

    /// Bin nearest to `frequency_hz` at `sample_rate_hz`.
    pub fn nearest_bin(&self, frequency_hz: f64, sample_rate_hz: f64) -> usize {
        (frequency_hz * self.len() as f64 / sample_rate_hz).round().max(0.0) as usize
    }

    /// Prune, centre, taper and transform `samples`, returning the amplitude
    /// spectrum.
    ///
    /// # Panics
    /// If `samples.len()` differs from the planned length.
    pub fn transform(&mut self, samples: &[f64], options: &AnalysisOptions) -> &[f64] {
        assert_eq!(
            samples.len(),
            self.centered.len(),
            "window length does not match the FFT plan"
        );

        self.centered.copy_from_slice(samples);
        if options.pruning {
            prune_outliers(&mut self.centered, options.pruning_sko_coeff);
        }
        let mean = self.centered.iter().sum::<f64>() / self.centered.len() as f64;
        for v in self.centered.iter_mut() {
            *v -= mean;
        }

        for ((slot, &x), &w) in self
            .spectrum
            .iter_mut()
            .zip(self.centered.iter())
            .zip(self.window.iter())
        {
            *slot = Complex64::new(x * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        for (a, c) in self.amplitude.iter_mut().zip(self.spectrum.iter()) {
            *a = c.norm();
        }
        &self.amplitude
    }

    /// Locate and score the dominant harmonic of `samples` inside `band`.
    pub fn analyze(
        &mut self,
        samples: &[f64],
        sample_rate_hz: f64,
        band: &BandConfig,
        options: &AnalysisOptions,
    ) -> SpectralEstimate {
        self.transform(samples, options);

        let n = self.len() as f64;
        let half = self.len() / 2;
        let resolution = sample_rate_hz / n;

        let low = ((band.low_hz / resolution).ceil().max(1.0) as usize).min(half);
        let high = ((band.high_hz / resolution).floor().max(0.0) as usize).min(half);

        if low > high {
            log::trace!(
                "band {:.2}-{:.2} Hz holds no bins at {:.3} Hz resolution",
                band.low_hz,
                band.high_hz,
                resolution
            );
            return SpectralEstimate {
                frequency_hz: 0.0,
                snr: 0.0,
                reliable: Self::classify(0.0, band.snr_threshold, options.snr_control),
                dominant_bin: 0,
                sample_rate_hz,
                amplitude: 0.0,
            };
        }

        let amp = &self.amplitude;
        let mut dominant = low;
        for k in low..=high {
            if amp[k] > amp[dominant] {
                dominant = k;
            }
        }
        let peak = amp[dominant];

        // Centroid over the dominant bin and its neighbours
        let first = dominant.saturating_sub(band.half_interval);
        let last = (dominant + band.half_interval).min(half);
        let (weighted, total) = (first..=last).fold((0.0, 0.0), |(wk, wa), k| {
            (wk + k as f64 * amp[k], wa + amp[k])
        });
        let centroid = if total > 0.0 {
            weighted / total
        } else {
            dominant as f64
        };

        let (noise_sum, noise_bins) = (low..=high)
            .filter(|k| k.abs_diff(dominant) > band.half_interval)
            .fold((0.0, 0usize), |(s, c), k| (s + amp[k], c + 1));
        let snr = snr_ratio(peak, noise_sum, noise_bins);

        let amplitude = if self.window_sum > 0.0 {
            2.0 * peak / self.window_sum
        } else {
            0.0
        };

        SpectralEstimate {
            frequency_hz: centroid * resolution,
            snr,
            reliable: Self::classify(snr, band.snr_threshold, options.snr_control),
            dominant_bin: dominant,
            sample_rate_hz,
            amplitude,
        }
    }

    /// Reliability rule: with SNR control off every estimate is reliable.
    #[inline]
    pub fn classify(snr: f64, threshold: f64, snr_control: bool) -> bool {
        !snr_control || snr >= threshold
    }
}

fn snr_ratio(peak: f64, noise_sum: f64, noise_bins: usize) -> f64 {
    // no background bins leaves nothing to compare the peak against
    if peak <= ENERGY_FLOOR || noise_bins == 0 {
        return 0.0;
    }
    let noise = noise_sum / noise_bins as f64;
    if noise * SNR_CEILING <= peak {
        SNR_CEILING
    } else {
        peak / noise
    }
}

/// Hamming window coefficients.
pub fn hamming_window(size: usize) -> Array1<f64> {
    if size < 2 {
        return Array1::ones(size);
    }
    Array1::from_iter(
        (0..size).map(|i| 0.54 - 0.46 * ((2.0 * PI * i as f64) / (size - 1) as f64).cos()),
    )
}

/// Replace samples further than `coeff` standard deviations from the mean
/// with the mean.
pub fn prune_outliers(values: &mut [f64], coeff: f64) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sko = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if sko <= 0.0 {
        return;
    }
    let limit = coeff * sko;
    for v in values.iter_mut() {
        if (*v - mean).abs() > limit {
            *v = mean;
        }
    }
}

/// `(value - mean) / sko`, with unit divisor for constant windows.
#[inline]
pub fn normalize_sample(value: f64, mean: f64, sko: f64) -> f64 {
    let divisor = if sko > SKO_FLOOR * mean.abs().max(1.0) {
        sko
    } else {
        1.0
    };
    (value - mean) / divisor
}

/// Sample rate of the newest `n` samples from their frame periods.
///
/// The `n` samples are separated by the newest `n - 1` periods.
pub fn sample_rate_hz(
    periods: &RingBuffer,
    n: usize,
    pipeline: Pipeline,
) -> Result<f64, ProcessorError> {
    let intervals = n.saturating_sub(1).max(1);
    let mean_period_ms = periods.sum_latest(intervals) / intervals as f64;
    if mean_period_ms.is_finite() && mean_period_ms > 0.0 {
        Ok(1000.0 / mean_period_ms)
    } else {
        Err(ProcessorError::InvalidTiming {
            pipeline,
            mean_period_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sine(n: usize, fs: f64, f0: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * f0 * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn test_hamming_window() {
        let window = hamming_window(10);
        assert_eq!(window.len(), 10);
        assert_relative_eq!(window[0], 0.08, epsilon = 0.01);
        assert_relative_eq!(window[9], 0.08, epsilon = 0.01);
        assert_relative_eq!(window[4], 1.0, epsilon = 0.03);
    }

    #[test]
    fn test_sinusoid_within_one_bin() {
        let fs = 30.0;
        let n = 221;
        let mut analyzer = SpectralAnalyzer::new(n);
        let resolution = fs / n as f64;

        for f0 in [0.9, 1.25, 1.7, 2.4, 3.1] {
            let est = analyzer.analyze(
                &sine(n, fs, f0),
                fs,
                &BandConfig::heart(),
                &AnalysisOptions::default(),
            );
            assert!(
                (est.frequency_hz - f0).abs() <= resolution,
                "f0={f0}, got {}",
                est.frequency_hz
            );
            assert!(est.reliable, "f0={f0}, snr={}", est.snr);
        }
    }

    #[test]
    fn test_flat_spectrum_is_unreliable() {
        // an impulse has a flat amplitude spectrum
        let n = 256;
        let mut samples = vec![0.0; n];
        samples[n / 2] = 1.0;
        let options = AnalysisOptions {
            pruning: false,
            ..Default::default()
        };

        let mut analyzer = SpectralAnalyzer::new(n);
        let est = analyzer.analyze(&samples, 30.0, &BandConfig::heart(), &options);
        assert_relative_eq!(est.snr, 1.0, epsilon = 0.05);
        assert!(!est.reliable);

        // same window with SNR control off
        let relaxed = AnalysisOptions {
            snr_control: false,
            ..options
        };
        assert!(analyzer.analyze(&samples, 30.0, &BandConfig::heart(), &relaxed).reliable);
    }

    #[test]
    fn test_constant_window_has_zero_snr() {
        let mut analyzer = SpectralAnalyzer::new(64);
        let est = analyzer.analyze(
            &[5.0; 64],
            30.0,
            &BandConfig::heart(),
            &AnalysisOptions::default(),
        );
        assert_eq!(est.snr, 0.0);
        assert!(!est.reliable);
        assert!(analyzer.amplitude().iter().all(|a| *a < 1e-9));
    }

    #[test]
    fn test_band_without_background_is_unreliable() {
        // 32 samples at 30 Hz leave heart bins 1..=3, all inside the centroid
        let mut rng = StdRng::seed_from_u64(41);
        let samples: Vec<f64> = (0..32).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let mut analyzer = SpectralAnalyzer::new(32);
        let est = analyzer.analyze(&samples, 30.0, &BandConfig::heart(), &AnalysisOptions::default());
        assert_eq!(est.snr, 0.0);
        assert!(!est.reliable);
    }

    #[test]
    fn test_pruning_removes_spike() {
        let mut values = sine(100, 30.0, 1.0);
        values[40] = 50.0;
        prune_outliers(&mut values, PRUNING_SKO_COEFF);
        assert!(values.iter().all(|v| v.abs() < 2.0));
    }

    #[test]
    fn test_amplitude_estimate() {
        let fs = 32.0;
        let n = 256;
        // 2 Hz lands exactly on bin 16
        let samples: Vec<f64> = sine(n, fs, 2.0).into_iter().map(|v| 0.5 * v).collect();
        let mut analyzer = SpectralAnalyzer::new(n);
        let est = analyzer.analyze(&samples, fs, &BandConfig::heart(), &AnalysisOptions::default());
        assert_eq!(est.dominant_bin, 16);
        assert_relative_eq!(est.amplitude, 0.5, epsilon = 0.02);
        assert_relative_eq!(est.bpm(), 120.0, epsilon = 0.5);
    }

    #[test]
    fn test_analyze_is_repeatable() {
        let samples = sine(221, 30.0, 1.25);
        let mut analyzer = SpectralAnalyzer::new(221);
        let band = BandConfig::heart();
        let options = AnalysisOptions::default();
        let first = analyzer.analyze(&samples, 30.0, &band, &options);
        let spectrum = analyzer.amplitude().to_vec();
        let second = analyzer.analyze(&samples, 30.0, &band, &options);
        assert_eq!(first, second);
        assert_eq!(spectrum, analyzer.amplitude());
    }

    #[test]
    fn test_sample_rate_from_periods() {
        let mut periods = RingBuffer::new(8);
        periods.push(0.0);
        for _ in 0..7 {
            periods.push(40.0);
        }
        assert_relative_eq!(sample_rate_hz(&periods, 8, Pipeline::Heart).unwrap(), 25.0);

        let stalled = RingBuffer::new(8);
        assert!(matches!(
            sample_rate_hz(&stalled, 8, Pipeline::Heart),
            Err(ProcessorError::InvalidTiming { .. })
        ));
    }

    #[test]
    fn test_normalize_constant_window() {
        assert_eq!(normalize_sample(100.0, 100.0, 0.0), 0.0);
        assert_relative_eq!(normalize_sample(3.0, 1.0, 2.0), 1.0);
    }
}
