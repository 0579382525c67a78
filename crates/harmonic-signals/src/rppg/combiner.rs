//! Channel combination and PCA alignment.
//!
//! Per frame the combiner reduces the three colour means to one value. For
//! heart analysis in PCA mode it instead decomposes the covariance of the
//! newest red/green/blue window and projects onto the component that tracks
//! the green channel best. The largest-variance axis is often motion or
//! illumination, so variance alone does not pick the component.

use std::str::FromStr;

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GREEN: usize = 1;
const EIGEN_EPS: f64 = 1.0e-12;
const EIGEN_MAX_ITER: usize = 512;

/// Colour enrollment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorChannel {
    Red,
    #[default]
    Green,
    Blue,
    /// Mean of the three channels
    RgbAverage,
    /// PCA projection for heart analysis, green per frame
    PcaAligned,
}

impl TryFrom<i32> for ColorChannel {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Red),
            1 => Ok(Self::Green),
            2 => Ok(Self::Blue),
            3 => Ok(Self::RgbAverage),
            4 => Ok(Self::PcaAligned),
            other => Err(other),
        }
    }
}

impl FromStr for ColorChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(Self::Red),
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            "rgb" | "rgb_average" => Ok(Self::RgbAverage),
            "pca" | "pca_aligned" => Ok(Self::PcaAligned),
            other => Err(format!("unknown colour channel '{other}'")),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcaError {
    #[error("PCA needs at least 2 samples, got {0}")]
    TooFewSamples(usize),
    #[error("channel covariance is not finite")]
    NonFinite,
    #[error("eigen decomposition did not converge")]
    NoConvergence,
}

/// Principal components of a three-channel window.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaDecomposition {
    /// Column means removed before decomposition
    pub mean: [f64; 3],
    /// Component variances, sorted descending, non-negative
    pub variance: [f64; 3],
    /// Orthonormal basis, one component per column, same order as `variance`
    pub basis: Matrix3<f64>,
}

impl PcaDecomposition {
    /// Decompose an `N x 3` matrix of raw channel values.
    pub fn compute(raw: &Array2<f64>) -> Result<Self, PcaError> {
        let n = raw.nrows();
        if n < 2 || raw.ncols() != 3 {
            return Err(PcaError::TooFewSamples(n));
        }

        let mut mean = [0.0; 3];
        for (j, column) in raw.axis_iter(Axis(1)).enumerate() {
            mean[j] = column.sum() / n as f64;
        }

        let mut cov = Matrix3::<f64>::zeros();
        for row in raw.axis_iter(Axis(0)) {
            let d = Vector3::new(row[0] - mean[0], row[1] - mean[1], row[2] - mean[2]);
            cov += d * d.transpose();
        }
        cov /= (n - 1) as f64;

        if cov.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::NonFinite);
        }

        let eigen =
            SymmetricEigen::try_new(cov, EIGEN_EPS, EIGEN_MAX_ITER).ok_or(PcaError::NoConvergence)?;

        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let mut variance = [0.0; 3];
        let mut basis = Matrix3::<f64>::zeros();
        for (slot, &idx) in order.iter().enumerate() {
            variance[slot] = eigen.eigenvalues[idx].max(0.0);
            let column = eigen.eigenvectors.column(idx);
            let norm = column.norm();
            if !(norm.is_finite() && norm > 0.0) {
                return Err(PcaError::NoConvergence);
            }
            basis.set_column(slot, &(column.into_owned() / norm));
        }

        Ok(Self {
            mean,
            variance,
            basis,
        })
    }

    /// Centre `raw` and project it onto basis column `component`.
    pub fn project(&self, raw: &Array2<f64>, component: usize) -> Vec<f64> {
        let axis = self.basis.column(component);
        raw.axis_iter(Axis(0))
            .map(|row| {
                (0..3)
                    .map(|j| (row[j] - self.mean[j]) * axis[j])
                    .sum::<f64>()
            })
            .collect()
    }
}

/// PCA-aligned working signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaAlignment {
    pub decomposition: PcaDecomposition,
    /// Selected basis column
    pub component: usize,
    /// Correlation of the projection with the centred green channel
    pub correlation: f64,
    pub projection: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ChannelCombiner {
    channel: ColorChannel,
    pca_enabled: bool,
    raw: Array2<f64>,
}

impl ChannelCombiner {
    /// `window` is the PCA window length (the FFT buffer length).
    pub fn new(channel: ColorChannel, pca_enabled: bool, window: usize) -> Self {
        Self {
            channel,
            pca_enabled,
            raw: Array2::zeros((window, 3)),
        }
    }

    pub fn channel(&self) -> ColorChannel {
        self.channel
    }

    pub fn set_channel(&mut self, channel: ColorChannel) {
        self.channel = channel;
    }

    pub fn set_pca_enabled(&mut self, enabled: bool) {
        self.pca_enabled = enabled;
    }

    /// Whether heart analysis runs on the PCA projection.
    pub fn uses_pca(&self) -> bool {
        self.pca_enabled || self.channel == ColorChannel::PcaAligned
    }

    /// Per-frame combined value from per-pixel channel means.
    #[inline]
    pub fn combine(&self, red: f64, green: f64, blue: f64) -> f64 {
        match self.channel {
            ColorChannel::Red => red,
            ColorChannel::Green | ColorChannel::PcaAligned => green,
            ColorChannel::Blue => blue,
            ColorChannel::RgbAverage => (red + green + blue) / 3.0,
        }
    }

    /// Decompose the channel window and project onto the component most
    /// correlated with green.
    ///
    /// # Panics
    /// If the slices are not all as long as the configured window.
    pub fn align(
        &mut self,
        red: &[f64],
        green: &[f64],
        blue: &[f64],
    ) -> Result<PcaAlignment, PcaError> {
        let n = self.raw.nrows();
        assert!(
            red.len() == n && green.len() == n && blue.len() == n,
            "channel windows must match the PCA window"
        );
        for (i, mut row) in self.raw.axis_iter_mut(Axis(0)).enumerate() {
            row[0] = red[i];
            row[1] = green[i];
            row[2] = blue[i];
        }

        let decomposition = PcaDecomposition::compute(&self.raw)?;
        let green_mean = decomposition.mean[GREEN];

        let mut best: Option<(usize, f64, Vec<f64>)> = None;
        for component in 0..3 {
            let projection = decomposition.project(&self.raw, component);
            let correlation = correlation(&projection, green, green_mean);
            let better = match &best {
                None => true,
                Some((_, c, _)) => correlation.abs() > c.abs(),
            };
            if better {
                best = Some((component, correlation, projection));
            }
        }

        let (component, correlation, mut projection) = best.ok_or(PcaError::NoConvergence)?;
        if correlation < 0.0 {
            projection.iter_mut().for_each(|v| *v = -*v);
        }

        Ok(PcaAlignment {
            decomposition,
            component,
            correlation: correlation.abs(),
            projection,
        })
    }
}

/// Pearson correlation of a centred projection with a raw channel; `0` when
/// either side is constant.
fn correlation(projection: &[f64], channel: &[f64], channel_mean: f64) -> f64 {
    let (mut dot, mut pp, mut cc) = (0.0, 0.0, 0.0);
    for (&p, &c) in projection.iter().zip(channel) {
        let c = c - channel_mean;
        dot += p * c;
        pp += p * p;
        cc += c * c;
    }
    let denom = (pp * cc).sqrt();
    if denom > 0.0 && denom.is_finite() {
        dot / denom
    } else {
        0.0
    }
}
