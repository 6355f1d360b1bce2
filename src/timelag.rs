//! Time lag estimation for chamber closure cycles.
//!
//! The lag is the delay between switching the valves to a chamber line and the switch becoming
//! visible in the analyser trace. For a candidate lag the trace is split into three windows,
//! chamber open before closure, closed, and open after closure. A linear baseline is drawn
//! through the medians of the two open windows and the closure window is fitted with a
//! saturating exponential rise on top of that baseline
//! $$
//!     c(t) = k t + b + s \left(1 - e^{-(t - t_{lag} - \Delta t_{ob}) / \tau}\right)
//! $$
//! where $\tau$ is the chamber turnover time. The estimated lag is the one minimising the mean
//! squared residual of this fit.
use argmin::core::CostFunction;
use itertools::izip;
use ndarray::Array1;
use rayon::prelude::*;
use slog::Logger;
use thiserror::Error;

use crate::config::{SolverSettings, TimelagSettings};
use crate::constants::{R_GAS, T_0};
use crate::diagnostics::{self, Diagnostic};
use crate::math::{finite_pairs_in, median};
use crate::minimisation::{BoundedSearch, Minimiser, Strategy, UnboundedSearch};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    #[error("time has {time} samples but concentration has {concentration}")]
    LengthMismatch { time: usize, concentration: usize },
}

/// Reasons the lag cost cannot be evaluated
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CostError {
    #[error("no valid observations in the closure window at lag {t_lag}")]
    EmptyClosureWindow { t_lag: f64 },
    #[error("no valid observations in the open windows at lag {t_lag}")]
    EmptyReferenceWindow { t_lag: f64 },
    #[error("the baseline through the open windows is undefined at lag {t_lag}")]
    DegenerateBaseline { t_lag: f64 },
    #[error("{observations} residuals cannot support {parameters} fitted parameters at lag {t_lag}")]
    InsufficientDegreesOfFreedom {
        t_lag: f64,
        observations: usize,
        parameters: usize,
    },
}

/// Analyser samples for one closure cycle
///
/// `time` counts seconds since the chamber line was switched on. Either array may contain
/// non-finite values, which are ignored wherever statistics are taken.
#[derive(Clone, Debug, PartialEq)]
pub struct ClosureTrace {
    time: Array1<f64>,
    concentration: Array1<f64>,
}

impl ClosureTrace {
    /// # Errors
    /// Returns [`TraceError::LengthMismatch`] if the arrays differ in length.
    pub fn new(time: Array1<f64>, concentration: Array1<f64>) -> Result<Self, TraceError> {
        if time.len() != concentration.len() {
            return Err(TraceError::LengthMismatch {
                time: time.len(),
                concentration: concentration.len(),
            });
        }
        Ok(Self {
            time,
            concentration,
        })
    }

    #[must_use]
    pub const fn time(&self) -> &Array1<f64> {
        &self.time
    }

    #[must_use]
    pub const fn concentration(&self) -> &Array1<f64> {
        &self.concentration
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn window(&self, lower: f64, upper: f64) -> (Vec<f64>, Vec<f64>) {
        // Non-contiguous arrays are copied first
        match (self.time.as_slice(), self.concentration.as_slice()) {
            (Some(time), Some(concentration)) => {
                finite_pairs_in(time, concentration, lower, upper)
            }
            _ => {
                let time = self.time.to_vec();
                let concentration = self.concentration.to_vec();
                finite_pairs_in(time.as_slice(), concentration.as_slice(), lower, upper)
            }
        }
    }
}

/// Phase durations of a closure cycle, all in seconds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosureTiming {
    /// Chamber molar volume over flow rate
    pub turnover_time: f64,
    pub open_before: f64,
    pub close_duration: f64,
    pub open_after: f64,
    /// Excluded at the start of each window
    pub left_margin: f64,
    /// Excluded at the end of each window
    pub right_margin: f64,
}

impl ClosureTiming {
    #[must_use]
    pub const fn new(
        turnover_time: f64,
        open_before: f64,
        close_duration: f64,
        open_after: f64,
    ) -> Self {
        Self {
            turnover_time,
            open_before,
            close_duration,
            open_after,
            left_margin: 0.,
            right_margin: 0.,
        }
    }

    #[must_use]
    pub const fn with_margins(mut self, left_margin: f64, right_margin: f64) -> Self {
        self.left_margin = left_margin;
        self.right_margin = right_margin;
        self
    }
}

/// How to search for the lag of one cycle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LagSearch {
    /// Only use closure window residuals in the cost
    pub closure_only: bool,
    /// Search interval; the bounded search is used only if both ends are finite and ordered
    pub bounds: Option<(f64, f64)>,
    /// Starting point of the unbounded search, zero if absent
    pub guess: Option<f64>,
}

impl LagSearch {
    #[must_use]
    pub const fn bounded(lower: f64, upper: f64) -> Self {
        Self {
            closure_only: false,
            bounds: Some((lower, upper)),
            guess: None,
        }
    }

    #[must_use]
    pub const fn from_guess(guess: f64) -> Self {
        Self {
            closure_only: false,
            bounds: None,
            guess: Some(guess),
        }
    }

    #[must_use]
    pub const fn closure_only(mut self, closure_only: bool) -> Self {
        self.closure_only = closure_only;
        self
    }
}

/// Mean squared residual of the closure fit as a function of the lag
#[derive(Clone, Copy, Debug)]
pub struct ClosureCost<'a> {
    trace: &'a ClosureTrace,
    timing: ClosureTiming,
    closure_only: bool,
}

impl<'a> ClosureCost<'a> {
    #[must_use]
    pub const fn new(trace: &'a ClosureTrace, timing: ClosureTiming, closure_only: bool) -> Self {
        Self {
            trace,
            timing,
            closure_only,
        }
    }

    /// Evaluate the cost at `t_lag` seconds
    ///
    /// # Errors
    /// Returns a [`CostError`] if any window needed by the fit holds no valid observations, if
    /// the baseline cannot be drawn, or if fewer residuals remain than parameters were fitted.
    pub fn evaluate(&self, t_lag: f64) -> Result<f64, CostError> {
        let ClosureTiming {
            turnover_time,
            open_before,
            close_duration,
            open_after,
            left_margin,
            right_margin,
        } = self.timing;

        let closure_start = t_lag + open_before;
        let closure_end = closure_start + close_duration;

        let (t_before, c_before) =
            self.trace
                .window(t_lag + left_margin, closure_start - right_margin);
        let (t_closure, c_closure) = self
            .trace
            .window(closure_start + left_margin, closure_end - right_margin);
        let (t_after, c_after) = self.trace.window(
            closure_end + left_margin,
            closure_end + open_after - right_margin,
        );

        if t_closure.is_empty() {
            return Err(CostError::EmptyClosureWindow { t_lag });
        }

        let (Some(c_mid_before), Some(t_mid_before), Some(c_mid_after), Some(t_mid_after)) = (
            median(&c_before),
            median(&t_before),
            median(&c_after),
            median(&t_after),
        ) else {
            return Err(CostError::EmptyReferenceWindow { t_lag });
        };

        let baseline_slope = (c_mid_after - c_mid_before) / (t_mid_after - t_mid_before);
        let baseline_intercept = baseline_slope.mul_add(-t_mid_before, c_mid_before);
        if !(baseline_slope.is_finite() && baseline_intercept.is_finite()) {
            return Err(CostError::DegenerateBaseline { t_lag });
        }
        let baseline = |t: f64| baseline_slope.mul_add(t, baseline_intercept);
        let rise = |t: f64| 1. - (-(t - closure_start) / turnover_time).exp();

        let x = t_closure.iter().map(|&t| rise(t)).collect::<Vec<_>>();
        let y = izip!(&t_closure, &c_closure)
            .map(|(&t, &c)| c - baseline(t))
            .collect::<Vec<_>>();

        // Least squares through the origin
        let sxy = izip!(&x, &y).map(|(xi, yi)| xi * yi).sum::<f64>();
        let sxx = x.iter().map(|xi| xi * xi).sum::<f64>();
        let slope = sxy / sxx;

        let (sum_of_squares, observations, parameters) = if self.closure_only {
            let ss = izip!(&x, &y)
                .map(|(xi, yi)| slope.mul_add(*xi, -yi).powi(2))
                .sum::<f64>();
            (ss, x.len(), 2)
        } else {
            // Residuals over everything up to the end of closure, with the fitted rise inside
            // the closure period and the bare baseline elsewhere
            let (ss, count) = izip!(self.trace.time(), self.trace.concentration())
                .filter(|(&t, _)| t <= closure_end)
                .map(|(&t, &c)| {
                    let fitted = if t < closure_start {
                        baseline(t)
                    } else {
                        slope.mul_add(rise(t), baseline(t))
                    };
                    c - fitted
                })
                .filter(|residual| residual.is_finite())
                .fold((0., 0usize), |(ss, count), residual| {
                    (residual.mul_add(residual, ss), count + 1)
                });
            (ss, count, 3)
        };

        if observations <= parameters {
            return Err(CostError::InsufficientDegreesOfFreedom {
                t_lag,
                observations,
                parameters,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let msr = sum_of_squares / (observations - parameters) as f64;
        if msr.is_nan() {
            return Err(CostError::DegenerateBaseline { t_lag });
        }
        Ok(msr)
    }
}

impl CostFunction for ClosureCost<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, t_lag: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.evaluate(*t_lag)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimelagStatus {
    Converged,
    Failed,
}

/// Estimated lag of one cycle
#[derive(Clone, Debug, PartialEq)]
pub struct TimelagResult {
    /// Lag in seconds, `NaN` if the cost could not be evaluated
    pub timelag: f64,
    pub status: TimelagStatus,
    /// Recoverable problems met while setting up the search
    pub diagnostics: Vec<Diagnostic>,
}

impl TimelagResult {
    #[must_use]
    pub fn converged(&self) -> bool {
        self.status == TimelagStatus::Converged
    }
}

/// Everything needed to estimate the lag of one cycle
#[derive(Clone, Debug, PartialEq)]
pub struct Cycle {
    pub trace: ClosureTrace,
    pub timing: ClosureTiming,
    pub search: LagSearch,
}

/// Estimates time lags, one closure cycle at a time
#[derive(Clone)]
pub struct TimelagEstimator {
    settings: SolverSettings,
    logger: Logger,
}

impl TimelagEstimator {
    #[must_use]
    pub const fn new(settings: SolverSettings, logger: Logger) -> Self {
        Self { settings, logger }
    }

    /// Apply configured window margins and cost mode to a cycle's timing and search
    #[must_use]
    pub const fn configure(
        timing: ClosureTiming,
        search: LagSearch,
        settings: &TimelagSettings,
    ) -> (ClosureTiming, LagSearch) {
        (
            timing.with_margins(settings.left_margin, settings.right_margin),
            search.closure_only(settings.closure_only),
        )
    }

    /// Pick the search strategy for `search`, recording any fallback taken
    pub fn strategy(&self, search: &LagSearch, diagnostics: &mut Vec<Diagnostic>) -> Strategy {
        match search.bounds {
            Some((lower, upper)) if lower.is_finite() && upper.is_finite() && lower < upper => {
                return Strategy::Bounded(BoundedSearch::new(lower, upper, &self.settings));
            }
            Some((lower, upper)) => {
                self.raise(diagnostics, Diagnostic::InvalidLagBounds { lower, upper });
            }
            None => {}
        }

        let guess = match search.guess {
            Some(guess) if guess.is_finite() => guess,
            Some(guess) => {
                self.raise(diagnostics, Diagnostic::InvalidLagGuess { guess });
                0.
            }
            None => 0.,
        };
        Strategy::Unbounded(UnboundedSearch::new(guess, &self.settings))
    }

    /// Estimate the lag of one closure cycle
    #[must_use]
    pub fn estimate(
        &self,
        trace: &ClosureTrace,
        timing: &ClosureTiming,
        search: &LagSearch,
    ) -> TimelagResult {
        let mut diagnostics = vec![];
        let strategy = self.strategy(search, &mut diagnostics);
        let problem = ClosureCost::new(trace, *timing, search.closure_only);

        match strategy.minimise(problem) {
            Ok(outcome) => {
                slog::debug!(self.logger, "timelag search finished";
                    "timelag" => outcome.argmin,
                    "cost" => outcome.cost,
                    "iterations" => outcome.iterations,
                    "converged" => outcome.converged);
                TimelagResult {
                    timelag: outcome.argmin,
                    status: if outcome.converged {
                        TimelagStatus::Converged
                    } else {
                        TimelagStatus::Failed
                    },
                    diagnostics,
                }
            }
            Err(err) => {
                slog::debug!(self.logger, "timelag search aborted"; "reason" => %err);
                TimelagResult {
                    timelag: f64::NAN,
                    status: TimelagStatus::Failed,
                    diagnostics,
                }
            }
        }
    }

    /// Estimate the lags of many cycles in parallel
    ///
    /// Results are returned in the order of `cycles`.
    #[must_use]
    pub fn estimate_batch(&self, cycles: &[Cycle]) -> Vec<TimelagResult> {
        cycles
            .par_iter()
            .map(|cycle| self.estimate(&cycle.trace, &cycle.timing, &cycle.search))
            .collect()
    }

    fn raise(&self, diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
        diagnostics::emit(&self.logger, &diagnostic);
        diagnostics.push(diagnostic);
    }
}

/// Chamber turnover time in seconds
///
/// The molar volume of air in the chamber, `volume` in m^3 at `temperature` in Celsius and
/// `pressure` in Pa, divided by the molar `flow` rate through it in mol s^-1.
#[must_use]
pub fn turnover_time(volume: f64, flow: f64, temperature: f64, pressure: f64) -> f64 {
    let molar_volume = volume * pressure / (R_GAS * (temperature + T_0));
    molar_volume / flow
}
