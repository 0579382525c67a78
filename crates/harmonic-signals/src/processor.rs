//! Streaming vital-sign processor.
//!
//! `HarmonicProcessor` owns every ring buffer, analyzer and estimator of one
//! measurement channel. Frames go in through [`HarmonicProcessor::enroll_data`];
//! the `compute_*` triggers analyse the current windows and push their results
//! to the event sink.

use std::path::Path;

use crate::buffer::RingBuffer;
use crate::config::{ConfigError, ProcessorConfig};
use crate::dsp::prefilter::{DigitalPreFilter, PulseRate};
use crate::dsp::spectral::{
    normalize_sample, sample_rate_hz, AnalysisOptions, SpectralAnalyzer, SpectralEstimate,
};
use crate::error::{Pipeline, PipelineState, ProcessorError};
use crate::events::{EventKind, EventSink, NullSink, ProcessorEvent};
use crate::physio::breath::BreathExtractor;
use crate::physio::spo2::{Spo2Calibration, Spo2Estimate, Spo2Estimator};
use crate::rppg::combiner::{ChannelCombiner, ColorChannel};
use crate::warning::{
    ConfidenceLevel, LoadStatus, Sex, Vital, WarningEngine, WarningProfile,
};

pub struct HarmonicProcessor<S: EventSink = NullSink> {
    config: ProcessorConfig,
    sink: S,

    // per-frame histories, data_length each
    red: RingBuffer,
    green: RingBuffer,
    blue: RingBuffer,
    combined: RingBuffer,
    heart_signal: RingBuffer,
    smoothed: RingBuffer,
    binary: RingBuffer,
    periods: RingBuffer,
    last_timestamp_ms: Option<f64>,

    combiner: ChannelCombiner,
    prefilter: DigitalPreFilter,
    heart: SpectralAnalyzer,
    heart_window: Vec<f64>,
    breath: BreathExtractor,
    spo2: Spo2Estimator,
    warnings: WarningEngine,

    last_heart: Option<SpectralEstimate>,
    last_breath: Option<SpectralEstimate>,
    last_spo2: Option<Spo2Estimate>,
}

impl Default for HarmonicProcessor<NullSink> {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

impl<S: EventSink> HarmonicProcessor<S> {
    /// Processor with the default configuration.
    pub fn new(sink: S) -> Self {
        Self::build(ProcessorConfig::default(), sink)
    }

    pub fn with_config(config: ProcessorConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, sink))
    }

    fn build(config: ProcessorConfig, sink: S) -> Self {
        let data = config.data_length;
        let window = config.buffer_length;
        Self {
            red: RingBuffer::new(data),
            green: RingBuffer::new(data),
            blue: RingBuffer::new(data),
            combined: RingBuffer::new(data),
            heart_signal: RingBuffer::new(data),
            smoothed: RingBuffer::new(data),
            binary: RingBuffer::new(data),
            periods: RingBuffer::new(data),
            last_timestamp_ms: None,

            combiner: ChannelCombiner::new(config.color_channel, config.pca_enabled, window),
            prefilter: DigitalPreFilter::new(config.estimation_interval),
            heart: SpectralAnalyzer::new(window),
            heart_window: vec![0.0; window],
            breath: BreathExtractor::new(
                config.breath_length,
                config.breath_strobe,
                config.breath_average,
                config.breath_cn_interval,
            ),
            spo2: Spo2Estimator::new(window, config.spo2.clone()),
            warnings: WarningEngine::new(),

            last_heart: None,
            last_breath: None,
            last_spo2: None,

            config,
            sink,
        }
    }

    fn emit(&mut self, kind: EventKind) {
        self.sink.emit(ProcessorEvent {
            instance_id: self.config.instance_id,
            kind,
        });
    }

    fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            pruning: self.config.pruning_enabled,
            pruning_sko_coeff: self.config.pruning_sko_coeff,
            snr_control: self.config.snr_control_enabled,
        }
    }

    /// Ingest one frame of colour sums over `area` pixels.
    pub fn enroll_data(&mut self, red: u32, green: u32, blue: u32, area: u32, timestamp_ms: f64) {
        let area = f64::from(area.max(1));
        let (r, g, b) = (
            f64::from(red) / area,
            f64::from(green) / area,
            f64::from(blue) / area,
        );
        let period = self
            .last_timestamp_ms
            .map_or(0.0, |previous| timestamp_ms - previous);
        self.last_timestamp_ms = Some(timestamp_ms);

        self.red.push(r);
        self.green.push(g);
        self.blue.push(b);
        self.periods.push(period);

        let value = self.combiner.combine(r, g, b);
        self.combined.push(value);
        let (mean, sko) = self.combined.mean_sko(self.config.normalization_interval);
        let normalized = normalize_sample(value, mean, sko);
        self.heart_signal.push(normalized);

        let step = self.prefilter.step(value, period);
        self.smoothed.push(step.smoothed);
        self.binary.push(step.binary);

        self.breath.step(&self.combined, timestamp_ms);

        if self.config.emit_sample_events {
            self.emit(EventKind::CurrentValues {
                signal: normalized,
                mean_red: r,
                mean_green: g,
                mean_blue: b,
            });
            self.emit(EventKind::SampleValues {
                normalized,
                smoothed: step.smoothed,
                binary: step.binary,
            });
        }
    }

    pub fn heart_state(&self) -> PipelineState {
        if self.heart_signal.filled() >= self.config.buffer_length {
            PipelineState::Ready
        } else {
            PipelineState::Idle
        }
    }

    pub fn breath_state(&self) -> PipelineState {
        self.breath.state()
    }

    /// Analyse the newest `buffer_length` frames for the heart harmonic.
    pub fn compute_heart_rate(&mut self) -> Result<SpectralEstimate, ProcessorError> {
        let n = self.config.buffer_length;
        if self.heart_state() == PipelineState::Idle {
            return Err(ProcessorError::NotReady {
                pipeline: Pipeline::Heart,
                have: self.heart_signal.filled(),
                need: n,
            });
        }
        let fs = sample_rate_hz(&self.periods, n, Pipeline::Heart)?;

        let mut projection = None;
        if self.combiner.uses_pca() {
            let red = self.red.latest_vec(n);
            let green = self.green.latest_vec(n);
            let blue = self.blue.latest_vec(n);
            match self.combiner.align(&red, &green, &blue) {
                Ok(alignment) => {
                    log::trace!(
                        "pca component {} (corr {:.3}, variance {:?})",
                        alignment.component,
                        alignment.correlation,
                        alignment.decomposition.variance
                    );
                    self.heart_window.copy_from_slice(&alignment.projection);
                    projection = Some(alignment.projection);
                }
                Err(e) => {
                    log::warn!("PCA alignment failed, using raw green: {e}");
                    self.heart_window.copy_from_slice(&green);
                }
            }
        } else {
            self.heart_signal.copy_latest(&mut self.heart_window);
        }

        let options = self.analysis_options();
        let estimate = self
            .heart
            .analyze(&self.heart_window, fs, &self.config.heart, &options);

        let centered = self.heart.centered().to_vec();
        let spectrum = self.heart.amplitude().to_vec();
        self.emit(EventKind::HeartSignal(centered));
        self.emit(EventKind::HeartSpectrum(spectrum));
        let periods = self.periods.latest_vec(n);
        self.emit(EventKind::FramePeriods(periods));
        let binary = self.binary.latest_vec(n);
        self.emit(EventKind::BinaryOutput(binary));
        if let Some(projection) = projection {
            self.emit(EventKind::PcaProjection(projection));
        }

        self.emit(EventKind::HeartRate {
            frequency_hz: estimate.frequency_hz,
            snr: estimate.snr,
            reliable: estimate.reliable,
        });
        self.emit(EventKind::Snr {
            value: estimate.snr,
        });
        self.emit(EventKind::Amplitude {
            value: estimate.amplitude,
        });
        if estimate.reliable {
            self.check_rate(Vital::Heart, estimate.bpm());
        } else {
            self.emit(EventKind::HeartTooNoisy { snr: estimate.snr });
        }

        log::trace!(
            "heart {:.3} Hz (snr {:.2}, reliable {}) at {:.2} Hz",
            estimate.frequency_hz,
            estimate.snr,
            estimate.reliable,
            fs
        );
        self.last_heart = Some(estimate);
        self.emit_measurements();
        Ok(estimate)
    }

    /// Analyse the decimated breath series for the breath harmonic.
    pub fn compute_breath_rate(&mut self) -> Result<SpectralEstimate, ProcessorError> {
        let options = self.analysis_options();
        let estimate = self.breath.analyze(&self.config.breath, &options)?;

        let centered = self.breath.centered().to_vec();
        let spectrum = self.breath.amplitude().to_vec();
        self.emit(EventKind::BreathSignal(centered));
        self.emit(EventKind::BreathSpectrum(spectrum));
        self.emit(EventKind::BreathRate {
            frequency_hz: estimate.frequency_hz,
            snr: estimate.snr,
            reliable: estimate.reliable,
        });
        self.emit(EventKind::BreathSnr {
            value: estimate.snr,
        });
        if estimate.reliable {
            self.check_rate(Vital::Breath, estimate.bpm());
        } else {
            self.emit(EventKind::BreathTooNoisy { snr: estimate.snr });
        }

        log::trace!(
            "breath {:.3} Hz (snr {:.2}, reliable {})",
            estimate.frequency_hz,
            estimate.snr,
            estimate.reliable
        );
        self.last_breath = Some(estimate);
        self.emit_measurements();
        Ok(estimate)
    }

    fn check_rate(&mut self, vital: Vital, rate_bpm: f64) {
        if let Some(warning) = self.warnings.check(vital, rate_bpm) {
            self.emit(EventKind::RateWarning {
                vital: warning.vital,
                rate_bpm: warning.rate_bpm,
                low: warning.low,
                high: warning.high,
                direction: warning.direction,
            });
        }
    }

    fn emit_measurements(&mut self) {
        let (heart_rate_hz, heart_snr) = self
            .last_heart
            .map_or((0.0, 0.0), |e| (e.frequency_hz, e.snr));
        let (breath_rate_hz, breath_snr) = self
            .last_breath
            .map_or((0.0, 0.0), |e| (e.frequency_hz, e.snr));
        self.emit(EventKind::Measurements {
            heart_rate_hz,
            heart_snr,
            breath_rate_hz,
            breath_snr,
        });
    }

    fn reliable_heart(&self) -> Option<SpectralEstimate> {
        match self.last_heart {
            Some(estimate) if estimate.reliable => Some(estimate),
            _ => {
                log::debug!("no reliable heart estimate, SpO2 skipped");
                None
            }
        }
    }

    /// SpO2 at the bin of the last reliable heart estimate.
    pub fn compute_spo2(&mut self) -> Option<Spo2Estimate> {
        let heart = self.reliable_heart()?;
        let bin = self
            .heart
            .nearest_bin(heart.frequency_hz, heart.sample_rate_hz);
        self.spo2_at(bin)
    }

    /// SpO2 at an explicit spectrum bin of the heart window.
    pub fn compute_spo2_at(&mut self, bin: usize) -> Option<Spo2Estimate> {
        self.reliable_heart()?;
        self.spo2_at(bin)
    }

    fn spo2_at(&mut self, bin: usize) -> Option<Spo2Estimate> {
        let Some(estimate) = self.spo2.estimate(&self.red, &self.blue, bin) else {
            log::debug!("SpO2 components unusable at bin {bin}");
            return None;
        };
        self.emit(EventKind::Spo2 {
            value: estimate.value,
            ratio: estimate.ratio,
        });
        self.last_spo2 = Some(estimate);
        Some(estimate)
    }

    /// Pulse-counter rate estimate.
    pub fn count_frequency(&mut self) -> Option<PulseRate> {
        let rate = self.prefilter.count_frequency()?;
        self.emit(EventKind::PulseRate {
            frequency_hz: rate.frequency_hz,
            pulses: rate.pulses,
        });
        Some(rate)
    }

    /// Load a warning-range table and select the profile rates are checked
    /// against. On failure the previous table stays active.
    pub fn load_warning_rates<P: AsRef<Path>>(
        &mut self,
        path: P,
        sex: Sex,
        age: u32,
        confidence: ConfidenceLevel,
    ) -> LoadStatus {
        self.warnings.load(
            path,
            WarningProfile {
                sex,
                age,
                confidence,
            },
        )
    }

    pub fn switch_color_mode(&mut self, channel: ColorChannel) {
        self.config.color_channel = channel;
        self.combiner.set_channel(channel);
    }

    pub fn set_pca_mode(&mut self, enabled: bool) {
        self.config.pca_enabled = enabled;
        self.combiner.set_pca_enabled(enabled);
    }

    pub fn set_id(&mut self, id: u32) {
        self.config.instance_id = id;
    }

    pub fn set_snr_control(&mut self, enabled: bool) {
        self.config.snr_control_enabled = enabled;
    }

    pub fn set_pruning(&mut self, enabled: bool) {
        self.config.pruning_enabled = enabled;
    }

    fn update_config(
        &mut self,
        update: impl FnOnce(&mut ProcessorConfig),
    ) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        update(&mut config);
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_estimation_interval(&mut self, samples: usize) -> Result<(), ConfigError> {
        self.update_config(|c| c.estimation_interval = samples)?;
        self.prefilter.set_estimation_interval(samples);
        Ok(())
    }

    pub fn set_breath_strobe(&mut self, frames: usize) -> Result<(), ConfigError> {
        self.update_config(|c| c.breath_strobe = frames)?;
        self.breath.set_strobe(frames);
        Ok(())
    }

    pub fn set_breath_average(&mut self, frames: usize) -> Result<(), ConfigError> {
        self.update_config(|c| c.breath_average = frames)?;
        self.breath.set_average(frames);
        Ok(())
    }

    pub fn set_breath_cn_interval(&mut self, samples: usize) -> Result<(), ConfigError> {
        self.update_config(|c| c.breath_cn_interval = samples)?;
        self.breath.set_cn_interval(samples);
        Ok(())
    }

    /// Replace the SpO2 calibration curve used by later SpO2 estimates.
    pub fn set_spo2_calibration(&mut self, calibration: Spo2Calibration) -> Result<(), ConfigError> {
        self.update_config(|c| c.spo2 = calibration.clone())?;
        self.spo2.set_calibration(calibration);
        Ok(())
    }

    pub fn spo2_calibration(&self) -> &Spo2Calibration {
        self.spo2.calibration()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn instance_id(&self) -> u32 {
        self.config.instance_id
    }

    pub fn color_channel(&self) -> ColorChannel {
        self.combiner.channel()
    }

    pub fn pca_enabled(&self) -> bool {
        self.config.pca_enabled
    }

    pub fn data_length(&self) -> usize {
        self.config.data_length
    }

    pub fn buffer_length(&self) -> usize {
        self.config.buffer_length
    }

    pub fn estimation_interval(&self) -> usize {
        self.prefilter.estimation_interval()
    }

    pub fn breath_strobe(&self) -> usize {
        self.breath.strobe()
    }

    pub fn breath_average(&self) -> usize {
        self.breath.average()
    }

    pub fn breath_cn_interval(&self) -> usize {
        self.breath.cn_interval()
    }

    pub fn last_heart_estimate(&self) -> Option<SpectralEstimate> {
        self.last_heart
    }

    pub fn last_breath_estimate(&self) -> Option<SpectralEstimate> {
        self.last_breath
    }

    pub fn last_spo2_estimate(&self) -> Option<Spo2Estimate> {
        self.last_spo2
    }

    /// Rising edges of the pre-filter output since construction.
    pub fn zero_crossings(&self) -> u32 {
        self.prefilter.zero_crossings()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
