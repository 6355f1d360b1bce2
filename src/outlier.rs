//! Dixon's Q test for a single outlier in a small sample.
//!
//! The test assumes normally distributed data and should be applied once per sample. At most
//! one value is ever reported: when both ends exceed the critical value only the end with the
//! larger gap ratio is flagged.
//!
//! References:
//! - Dean, R. B. and Dixon, W. J. (1951). Simplified Statistics for Small Numbers of
//!   Observations. Anal. Chem., 23(4), 636-638.
//! - Rorabacher, D. B. (1991). Statistical Treatment for Rejection of Deviant Values: Critical
//!   Values of Dixon Q Parameter and Related Subrange Ratios at the 95 percent Confidence Level.
//!   Anal. Chem., 63(2), 139-146.
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest sample the critical value tables cover
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Largest sample the critical value tables cover
pub const MAX_SAMPLE_SIZE: usize = MIN_SAMPLE_SIZE + Q90.len() - 1;

// Critical Q values indexed by `sample_size - MIN_SAMPLE_SIZE`
const Q90: [f64; 28] = [
    0.941, 0.765, 0.642, 0.560, 0.507, 0.468, 0.437, 0.412, 0.392, 0.376, 0.361, 0.349, 0.338,
    0.329, 0.320, 0.313, 0.306, 0.300, 0.295, 0.290, 0.285, 0.281, 0.277, 0.273, 0.269, 0.266,
    0.263, 0.260,
];
const Q95: [f64; 28] = [
    0.970, 0.829, 0.710, 0.625, 0.568, 0.526, 0.493, 0.466, 0.444, 0.426, 0.410, 0.396, 0.384,
    0.374, 0.365, 0.356, 0.349, 0.342, 0.337, 0.331, 0.326, 0.321, 0.317, 0.312, 0.308, 0.305,
    0.301, 0.290,
];
const Q99: [f64; 28] = [
    0.994, 0.926, 0.821, 0.740, 0.680, 0.634, 0.598, 0.568, 0.542, 0.522, 0.503, 0.488, 0.475,
    0.463, 0.452, 0.442, 0.433, 0.425, 0.418, 0.411, 0.404, 0.399, 0.393, 0.388, 0.384, 0.380,
    0.376, 0.372,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "q90")]
    Q90,
    #[default]
    #[serde(rename = "q95")]
    Q95,
    #[serde(rename = "q99")]
    Q99,
}

impl Confidence {
    const fn table(self) -> &'static [f64] {
        match self {
            Self::Q90 => &Q90,
            Self::Q95 => &Q95,
            Self::Q99 => &Q99,
        }
    }

    /// Critical Q value for a sample of `size`, if the table covers it
    #[must_use]
    pub fn critical_value(self, size: usize) -> Option<f64> {
        size.checked_sub(MIN_SAMPLE_SIZE)
            .and_then(|index| self.table().get(index))
            .copied()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DixonError {
    #[error("sample size too small: at least {min} finite values are required, got {size}")]
    SampleTooSmall { size: usize, min: usize },
    #[error("sample size too large: at most {max} finite values are supported, got {size}")]
    SampleTooLarge { size: usize, max: usize },
    #[error("at least one of the minimum or the maximum must be tested")]
    NoEndSelected,
}

/// Outcome of a Dixon test
///
/// `low` holds the sample minimum if it was flagged, `high` the sample maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OutlierResult {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl OutlierResult {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }
}

/// Run Dixon's Q test on `sample`
///
/// Non-finite values are dropped before testing. At least one of `test_min` and `test_max` must
/// be set, but the reported ends depend only on the Q statistics: an end is flagged when its Q
/// exceeds the critical value and is not smaller than the Q of the other end.
///
/// # Errors
/// - [`DixonError::SampleTooSmall`] or [`DixonError::SampleTooLarge`] if the number of finite
///   values lies outside the table
/// - [`DixonError::NoEndSelected`] if neither end is to be tested
pub fn dixon_test(
    sample: &[f64],
    test_min: bool,
    test_max: bool,
    confidence: Confidence,
) -> Result<OutlierResult, DixonError> {
    let sorted = sample
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .sorted_by(f64::total_cmp)
        .collect::<Vec<_>>();

    let size = sorted.len();
    if size < MIN_SAMPLE_SIZE {
        return Err(DixonError::SampleTooSmall {
            size,
            min: MIN_SAMPLE_SIZE,
        });
    }
    let q_crit = confidence
        .critical_value(size)
        .ok_or(DixonError::SampleTooLarge {
            size,
            max: MAX_SAMPLE_SIZE,
        })?;

    if !(test_min || test_max) {
        return Err(DixonError::NoEndSelected);
    }

    let range = sorted[size - 1] - sorted[0];
    if range == 0. {
        return Ok(OutlierResult::default());
    }

    let q_min = ((sorted[1] - sorted[0]) / range).abs();
    let q_max = ((sorted[size - 1] - sorted[size - 2]) / range).abs();

    Ok(OutlierResult {
        low: (q_min > q_crit && q_min >= q_max).then_some(sorted[0]),
        high: (q_max > q_crit && q_max >= q_min).then_some(sorted[size - 1]),
    })
}
