use thiserror::Error;

/// Spectral pipeline a result or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Heart,
    Breath,
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pipeline::Heart => f.write_str("heart"),
            Pipeline::Breath => f.write_str("breath"),
        }
    }
}

/// Observable state of a spectral pipeline between calls.
///
/// `Analyzing` only exists inside a `compute_*` call, which holds `&mut self`,
/// so callers can only ever see the two resting states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Analysis window not yet full.
    Idle,
    /// Window full, `compute_*` will produce an estimate.
    Ready,
}

/// Precondition failures of the compute triggers.
///
/// None of these are fatal: the processor keeps ingesting and the next
/// trigger may succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("{pipeline} pipeline not ready: {have} of {need} samples")]
    NotReady {
        pipeline: Pipeline,
        have: usize,
        need: usize,
    },
    #[error("{pipeline} pipeline has invalid frame timing (mean period {mean_period_ms} ms)")]
    InvalidTiming {
        pipeline: Pipeline,
        mean_period_ms: f64,
    },
}
