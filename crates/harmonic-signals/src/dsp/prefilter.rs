//! Time-domain pulse counter.
//!
//! A nine-tap moving average of the combined channel is differentiated and
//! turned into a binary trend signal. Rising edges of that signal are pulses.
//! Cheap enough to run on every frame and independent of the spectral path.

use crate::buffer::RingBuffer;

/// Window of the moving-average derivative, in samples.
pub const DIGITAL_FILTER_LENGTH: usize = 9;

/// Rough heart rate from pulse counting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseRate {
    pub frequency_hz: f64,
    pub pulses: u32,
    pub elapsed_ms: f64,
}

impl PulseRate {
    fn from_counts(pulses: u32, elapsed_ms: f64) -> Option<Self> {
        if elapsed_ms.is_finite() && elapsed_ms > 0.0 {
            Some(Self {
                frequency_hz: f64::from(pulses) * 1000.0 / elapsed_ms,
                pulses,
                elapsed_ms,
            })
        } else {
            None
        }
    }

    pub fn bpm(&self) -> f64 {
        self.frequency_hz * 60.0
    }
}

/// Output of one filter step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStep {
    pub smoothed: f64,
    /// `+1.0` while the trend rises, `-1.0` while it falls
    pub binary: f64,
    pub rising_edge: bool,
}

#[derive(Debug, Clone)]
pub struct DigitalPreFilter {
    window: RingBuffer,
    previous_smoothed: Option<f64>,
    derivative: [f64; 2],
    output: f64,
    zero_crossings: u32,

    estimation_interval: usize,
    pulse_count: u32,
    interval_samples: usize,
    interval_elapsed_ms: f64,
    last_rate: Option<PulseRate>,
}

impl DigitalPreFilter {
    pub fn new(estimation_interval: usize) -> Self {
        Self {
            window: RingBuffer::new(DIGITAL_FILTER_LENGTH),
            previous_smoothed: None,
            derivative: [0.0; 2],
            output: -1.0,
            zero_crossings: 0,
            estimation_interval: estimation_interval.max(1),
            pulse_count: 0,
            interval_samples: 0,
            interval_elapsed_ms: 0.0,
            last_rate: None,
        }
    }

    /// Feed one combined-channel value and the frame period that preceded it.
    pub fn step(&mut self, value: f64, period_ms: f64) -> FilterStep {
        self.window.push(value);
        let taps = self.window.filled();
        let smoothed = self.window.sum_latest(taps) / taps as f64;

        if let Some(previous) = self.previous_smoothed {
            self.derivative = [self.derivative[1], smoothed - previous];
        }
        self.previous_smoothed = Some(smoothed);

        // both derivatives must agree before the output flips
        let next = match self.derivative {
            [a, b] if a > 0.0 && b > 0.0 => 1.0,
            [a, b] if a < 0.0 && b < 0.0 => -1.0,
            _ => self.output,
        };
        let rising_edge = self.output < 0.0 && next > 0.0;
        self.output = next;

        if rising_edge {
            self.zero_crossings = self.zero_crossings.wrapping_add(1);
            self.pulse_count = self.pulse_count.saturating_add(1);
        }

        self.interval_samples += 1;
        if period_ms.is_finite() && period_ms > 0.0 {
            self.interval_elapsed_ms += period_ms;
        }
        if self.interval_samples >= self.estimation_interval {
            if let Some(rate) = PulseRate::from_counts(self.pulse_count, self.interval_elapsed_ms) {
                self.last_rate = Some(rate);
            }
            self.pulse_count = 0;
            self.interval_samples = 0;
            self.interval_elapsed_ms = 0.0;
        }

        FilterStep {
            smoothed,
            binary: self.output,
            rising_edge,
        }
    }

    /// Latest completed interval estimate, or the running one if no interval
    /// has completed yet.
    pub fn count_frequency(&self) -> Option<PulseRate> {
        self.last_rate
            .or_else(|| PulseRate::from_counts(self.pulse_count, self.interval_elapsed_ms))
    }

    pub fn set_estimation_interval(&mut self, samples: usize) {
        self.estimation_interval = samples.max(1);
    }

    pub fn estimation_interval(&self) -> usize {
        self.estimation_interval
    }

    pub fn binary_output(&self) -> f64 {
        self.output
    }

    /// Total rising edges since construction (wrapping).
    pub fn zero_crossings(&self) -> u32 {
        self.zero_crossings
    }

    /// Pulses counted in the running interval.
    pub fn pulse_count(&self) -> u32 {
        self.pulse_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FRAME_MS: f64 = 1000.0 / 30.0;

    fn run(filter: &mut DigitalPreFilter, f0: f64, frames: usize) -> Vec<FilterStep> {
        (0..frames)
            .map(|i| {
                let t = i as f64 / 30.0;
                let period = if i == 0 { 0.0 } else { FRAME_MS };
                filter.step(100.0 + (2.0 * PI * f0 * t).sin(), period)
            })
            .collect()
    }

    #[test]
    fn test_binary_output_is_plus_minus_one() {
        let mut filter = DigitalPreFilter::new(300);
        let steps = run(&mut filter, 1.25, 200);
        assert!(steps.iter().all(|s| s.binary == 1.0 || s.binary == -1.0));
        assert!(steps.iter().any(|s| s.binary == 1.0));
        assert!(steps.iter().any(|s| s.binary == -1.0));
    }

    #[test]
    fn test_one_rising_edge_per_period() {
        let mut filter = DigitalPreFilter::new(10_000);
        let steps = run(&mut filter, 1.0, 300);
        let edges = steps.iter().filter(|s| s.rising_edge).count();
        // ten periods, plus at most the start-up edge
        assert!((10..=11).contains(&edges), "edges={edges}");
        assert_eq!(filter.zero_crossings() as usize, edges);
    }

    #[test]
    fn test_interval_estimate() {
        let mut filter = DigitalPreFilter::new(300);
        run(&mut filter, 1.25, 600);
        let rate = filter.count_frequency().unwrap();
        assert!((rate.frequency_hz - 1.25).abs() < 0.15, "rate={rate:?}");
        assert!((rate.bpm() - 75.0).abs() < 9.0);
        assert_eq!(filter.pulse_count(), 0);
    }

    #[test]
    fn test_running_estimate_before_interval_completes() {
        let mut filter = DigitalPreFilter::new(10_000);
        assert!(filter.count_frequency().is_none());
        run(&mut filter, 1.25, 120);
        assert!(filter.count_frequency().is_some());
    }

    #[test]
    fn test_flat_input_counts_nothing() {
        let mut filter = DigitalPreFilter::new(30);
        for i in 0..90 {
            let step = filter.step(42.0, if i == 0 { 0.0 } else { FRAME_MS });
            assert!(!step.rising_edge);
            assert_eq!(step.smoothed, 42.0);
        }
        assert_eq!(filter.count_frequency().unwrap().pulses, 0);
    }
}
