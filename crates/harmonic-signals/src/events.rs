//! Typed result events and the sinks that receive them.
//!
//! Every event carries the instance id of the processor that produced it so
//! observers can aggregate many concurrently running processors.

use std::sync::mpsc::Sender;

use crate::warning::{Vital, WarningDirection};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorEvent {
    pub instance_id: u32,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    // Heart pipeline traces
    /// Centred (and pruned) analysis window.
    HeartSignal(Vec<f64>),
    /// Amplitude spectrum, bins `0..=len/2`.
    HeartSpectrum(Vec<f64>),
    /// Frame periods (ms) of the analysis window.
    FramePeriods(Vec<f64>),
    /// Projection onto the selected principal component.
    PcaProjection(Vec<f64>),
    /// Pre-filter output of the analysis window.
    BinaryOutput(Vec<f64>),

    // Heart pipeline scalars
    HeartRate {
        frequency_hz: f64,
        snr: f64,
        reliable: bool,
    },
    HeartTooNoisy {
        snr: f64,
    },
    Snr {
        value: f64,
    },
    /// Sinusoid amplitude of the dominant harmonic.
    Amplitude {
        value: f64,
    },

    // Per-frame values
    CurrentValues {
        signal: f64,
        mean_red: f64,
        mean_green: f64,
        mean_blue: f64,
    },
    SampleValues {
        normalized: f64,
        smoothed: f64,
        binary: f64,
    },

    // Breath pipeline
    BreathSignal(Vec<f64>),
    BreathSpectrum(Vec<f64>),
    BreathRate {
        frequency_hz: f64,
        snr: f64,
        reliable: bool,
    },
    BreathTooNoisy {
        snr: f64,
    },
    BreathSnr {
        value: f64,
    },

    Measurements {
        heart_rate_hz: f64,
        heart_snr: f64,
        breath_rate_hz: f64,
        breath_snr: f64,
    },
    Spo2 {
        value: f64,
        ratio: f64,
    },
    PulseRate {
        frequency_hz: f64,
        pulses: u32,
    },
    RateWarning {
        vital: Vital,
        rate_bpm: f64,
        low: f64,
        high: f64,
        direction: WarningDirection,
    },
}

/// Destination for processor events.
pub trait EventSink {
    fn emit(&mut self, event: ProcessorEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    #[inline]
    fn emit(&mut self, _event: ProcessorEvent) {}
}

impl EventSink for Vec<ProcessorEvent> {
    fn emit(&mut self, event: ProcessorEvent) {
        self.push(event);
    }
}

impl EventSink for Sender<ProcessorEvent> {
    fn emit(&mut self, event: ProcessorEvent) {
        // a dropped receiver just means nobody is listening any more
        if self.send(event).is_err() {
            log::trace!("event receiver dropped");
        }
    }
}

/// Adapter for closures.
pub struct CallbackSink<F>(pub F);

impl<F: FnMut(ProcessorEvent)> EventSink for CallbackSink<F> {
    fn emit(&mut self, event: ProcessorEvent) {
        (self.0)(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: ProcessorEvent) {
        (**self).emit(event);
    }
}
