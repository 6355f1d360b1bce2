use std::fmt;

use slog::{o, Discard, Logger};

/// A recoverable problem met while computing a result
///
/// Diagnostics never abort a computation. Each one is logged through the component's logger
/// when raised and is also handed back alongside the result which fell back to a default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Diagnostic {
    /// Time lag bounds were not finite or not ordered, so the unbounded search was used.
    InvalidLagBounds { lower: f64, upper: f64 },
    /// The time lag guess was not finite, so the search started from zero.
    InvalidLagGuess { guess: f64 },
    /// No schedule definition covers the day.
    NoScheduleForDay { day_of_year: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLagBounds { lower, upper } => write!(
                f,
                "illegal bounds ({lower}, {upper}) given to timelag optimisation, \
                 defaulting to unbounded optimisation"
            ),
            Self::InvalidLagGuess { guess } => {
                write!(f, "illegal timelag guess {guess}, defaulting to 0")
            }
            Self::NoScheduleForDay { day_of_year } => {
                write!(f, "no valid chamber schedule found on day {day_of_year}")
            }
        }
    }
}

/// Emit `diagnostic` as a warning record on `logger`
pub(crate) fn emit(logger: &Logger, diagnostic: &Diagnostic) {
    slog::warn!(logger, "{}", diagnostic; "kind" => kind(diagnostic));
}

const fn kind(diagnostic: &Diagnostic) -> &'static str {
    match diagnostic {
        Diagnostic::InvalidLagBounds { .. } => "invalid_lag_bounds",
        Diagnostic::InvalidLagGuess { .. } => "invalid_lag_guess",
        Diagnostic::NoScheduleForDay { .. } => "no_schedule_for_day",
    }
}

/// A logger which drops every record
#[must_use]
pub fn silent() -> Logger {
    Logger::root(Discard, o!())
}
