//! Breath-rate extraction.
//!
//! The breath band sits far below the per-frame Nyquist rate, so the combined
//! channel is averaged and decimated into a slow series first. Every
//! `strobe` frames one averaged value is appended; the spectral analyzer then
//! runs on that series with breath-band parameters.

use crate::buffer::RingBuffer;
use crate::dsp::spectral::{
    normalize_sample, sample_rate_hz, AnalysisOptions, BandConfig, SpectralAnalyzer,
    SpectralEstimate,
};
use crate::error::{Pipeline, PipelineState, ProcessorError};

pub const DEFAULT_BREATH_STROBE: usize = 3;
pub const DEFAULT_BREATH_AVERAGE: usize = 16;
pub const DEFAULT_BREATH_NORMALIZATION_INTERVAL: usize = 26;
/// Breath FFT window in breath samples, separate from the CN interval.
pub const DEFAULT_BREATH_LENGTH: usize = 256;

/// One decimated breath sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreathSample {
    /// Averaged combined-channel value
    pub raw: f64,
    /// Centred and normalised over the CN interval
    pub normalized: f64,
}

#[derive(Debug)]
pub struct BreathExtractor {
    strobe: usize,
    average: usize,
    cn_interval: usize,
    strobe_counter: usize,
    last_timestamp_ms: Option<f64>,

    raw: RingBuffer,
    signal: RingBuffer,
    periods: RingBuffer,

    window: Vec<f64>,
    analyzer: SpectralAnalyzer,
}

impl BreathExtractor {
    pub fn new(length: usize, strobe: usize, average: usize, cn_interval: usize) -> Self {
        Self {
            strobe: strobe.max(1),
            average: average.max(1),
            cn_interval: cn_interval.max(1),
            strobe_counter: 0,
            last_timestamp_ms: None,
            raw: RingBuffer::new(length),
            signal: RingBuffer::new(length),
            periods: RingBuffer::new(length),
            window: vec![0.0; length],
            analyzer: SpectralAnalyzer::new(length),
        }
    }

    /// Advance the strobe by one frame; every `strobe` frames a new breath
    /// sample is taken from the newest values of `combined`.
    pub fn step(&mut self, combined: &RingBuffer, timestamp_ms: f64) -> Option<BreathSample> {
        self.strobe_counter = (self.strobe_counter + 1) % self.strobe;
        if self.strobe_counter != 0 {
            return None;
        }

        let taps = self.average.min(combined.filled());
        if taps == 0 {
            return None;
        }
        let raw = combined.sum_latest(taps) / taps as f64;

        let period = self
            .last_timestamp_ms
            .map_or(0.0, |previous| timestamp_ms - previous);
        self.last_timestamp_ms = Some(timestamp_ms);

        self.raw.push(raw);
        self.periods.push(period);

        let (mean, sko) = self.raw.mean_sko(self.cn_interval);
        let normalized = normalize_sample(raw, mean, sko);
        self.signal.push(normalized);

        Some(BreathSample { raw, normalized })
    }

    pub fn state(&self) -> PipelineState {
        if self.signal.is_full() {
            PipelineState::Ready
        } else {
            PipelineState::Idle
        }
    }

    pub fn analyze(
        &mut self,
        band: &BandConfig,
        options: &AnalysisOptions,
    ) -> Result<SpectralEstimate, ProcessorError> {
        let n = self.signal.len();
        if self.state() == PipelineState::Idle {
            return Err(ProcessorError::NotReady {
                pipeline: Pipeline::Breath,
                have: self.signal.filled(),
                need: n,
            });
        }
        let fs = sample_rate_hz(&self.periods, n, Pipeline::Breath)?;
        self.signal.copy_latest(&mut self.window);
        Ok(self.analyzer.analyze(&self.window, fs, band, options))
    }

    /// Centred window of the last analysis.
    pub fn centered(&self) -> &[f64] {
        self.analyzer.centered()
    }

    /// Amplitude spectrum of the last analysis.
    pub fn amplitude(&self) -> &[f64] {
        self.analyzer.amplitude()
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    pub fn strobe(&self) -> usize {
        self.strobe
    }

    pub fn average(&self) -> usize {
        self.average
    }

    pub fn cn_interval(&self) -> usize {
        self.cn_interval
    }

    pub fn set_strobe(&mut self, frames: usize) {
        self.strobe = frames.max(1);
        self.strobe_counter %= self.strobe;
    }

    pub fn set_average(&mut self, frames: usize) {
        self.average = frames.max(1);
    }

    pub fn set_cn_interval(&mut self, samples: usize) {
        self.cn_interval = samples.max(1);
    }
}
