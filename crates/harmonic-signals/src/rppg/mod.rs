//! Colour-channel handling for rPPG.
//!
//! Per-frame channel selection and the PCA alignment used for the heart
//! window.

pub mod combiner;

pub use combiner::{ChannelCombiner, ColorChannel, PcaAlignment, PcaDecomposition, PcaError};
