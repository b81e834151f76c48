//! Elementary operations on 1 Hz sample streams
//!
//! All functions take a slice and return a freshly allocated vector; the
//! caller's data is never modified. NaN marks a gap in the recording and is
//! skipped by the windowed statistics (a window made only of gaps yields NaN).

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SweatError};

/// Scales a median absolute deviation to a Gaussian-consistent standard deviation
pub const MAD_SCALE: f64 = 1.4826;

/// Default median filter window (15 samples either side of the current one)
pub const DEFAULT_MEDIAN_WINDOW: usize = 31;

/// Averaging used by [`rolling_mean`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingAlgorithm {
    /// Arithmetic mean over the trailing window
    #[default]
    Uniform,
    /// Exponentially weighted mean with span equal to the window
    Ewma,
}

impl FromStr for RollingAlgorithm {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uniform" => Ok(RollingAlgorithm::Uniform),
            "ewma" => Ok(RollingAlgorithm::Ewma),
            other => Err(SweatError::InvalidConfiguration(format!(
                "Unknown rolling mean algorithm '{}', expected 'uniform' or 'ewma'",
                other
            ))),
        }
    }
}

impl fmt::Display for RollingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollingAlgorithm::Uniform => write!(f, "uniform"),
            RollingAlgorithm::Ewma => write!(f, "ewma"),
        }
    }
}

/// Replace every sample whose mask entry is `false` with `value`
///
/// Without a mask the stream is returned unchanged.
pub fn mask_fill(y: &[f64], mask: Option<&[bool]>, value: f64) -> Result<Vec<f64>> {
    let Some(mask) = mask else {
        return Ok(y.to_vec());
    };

    if mask.len() != y.len() {
        return Err(SweatError::InvalidConfiguration(format!(
            "Mask length {} does not match stream length {}",
            mask.len(),
            y.len()
        )));
    }

    Ok(y.iter()
        .zip(mask)
        .map(|(&v, &keep)| if keep { v } else { value })
        .collect())
}

/// Causal rolling mean with a minimum period of one sample
///
/// Masking is applied first when a mask is given.
pub fn rolling_mean(
    y: &[f64],
    window: usize,
    mask: Option<&[bool]>,
    algorithm: RollingAlgorithm,
    value: f64,
) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(SweatError::InvalidConfiguration(
            "Rolling window must be at least 1 sample".to_string(),
        ));
    }

    let y = mask_fill(y, mask, value)?;

    Ok(match algorithm {
        RollingAlgorithm::Uniform => uniform_rolling_mean(&y, window),
        RollingAlgorithm::Ewma => ewma(&y, window),
    })
}

/// Trailing arithmetic mean over `y[max(0, i-window+1)..=i]`, ignoring gaps
pub(crate) fn uniform_rolling_mean(y: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(y.len());
    let mut sum = 0.0;
    let mut count = 0usize;

    for i in 0..y.len() {
        if !y[i].is_nan() {
            sum += y[i];
            count += 1;
        }
        if i >= window {
            let leaving = y[i - window];
            if !leaving.is_nan() {
                sum -= leaving;
                count -= 1;
            }
        }
        out.push(if count > 0 { sum / count as f64 } else { f64::NAN });
    }

    out
}

/// Adjusted exponentially weighted mean, `alpha = 2 / (span + 1)`
///
/// Gaps keep decaying the weights of earlier samples without contributing.
fn ewma(y: &[f64], span: usize) -> Vec<f64> {
    let decay = 1.0 - 2.0 / (span as f64 + 1.0);
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    y.iter()
        .map(|&v| {
            numerator *= decay;
            denominator *= decay;
            if !v.is_nan() {
                numerator += v;
                denominator += 1.0;
            }
            if denominator > 0.0 {
                numerator / denominator
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Trailing median over `y[max(0, i-window+1)..=i]`, ignoring gaps
pub(crate) fn rolling_median(y: &[f64], window: usize) -> Vec<f64> {
    (0..y.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let samples: Vec<f64> = y[start..=i].iter().copied().filter(|v| !v.is_nan()).collect();
            if samples.is_empty() {
                f64::NAN
            } else {
                Data::new(samples).median()
            }
        })
        .collect()
}

/// Outlier replacement with a rolling median filter
///
/// A sample is an outlier when its distance to the rolling median exceeds
/// `MAD_SCALE * threshold` times the rolling median absolute deviation.
/// Outliers are replaced with `value` when given, otherwise with the rolling
/// median at that position.
pub fn median_filter(
    y: &[f64],
    window: usize,
    threshold: f64,
    value: Option<f64>,
) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(SweatError::InvalidConfiguration(
            "Median filter window must be at least 1 sample".to_string(),
        ));
    }

    let median = rolling_median(y, window);
    let difference: Vec<f64> = y.iter().zip(&median).map(|(v, m)| (v - m).abs()).collect();
    let mad = rolling_median(&difference, window);

    let mut replaced = 0usize;
    let filtered = y
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if difference[i] > MAD_SCALE * threshold * mad[i] {
                replaced += 1;
                value.unwrap_or(median[i])
            } else {
                v
            }
        })
        .collect();

    tracing::debug!(window, threshold, replaced, "median filter applied");

    Ok(filtered)
}
