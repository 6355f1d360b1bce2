//! Chamber deployment schedules.
//!
//! A deployment is described by an ordered list of [`ScheduleDefinition`]s, each valid over a
//! half-open interval of day-of-year. Resolving a day picks the first definition whose interval
//! contains it and converts every time-valued field to days.
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use slog::Logger;
use thiserror::Error;

use crate::diagnostics::{self, Diagnostic};
use crate::time::{day_of_year, parse_timestamp, TimestampError};
use crate::timelag::{ClosureTiming, LagSearch};
use crate::Result;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Unit in which a schedule's durations and offsets are written
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitOfTime {
    Second,
    Minute,
    Hour,
    Day,
    /// Not a recognised unit; values are taken to be in days
    Other(String),
}

impl From<String> for UnitOfTime {
    fn from(unit: String) -> Self {
        match unit.as_str() {
            "second" | "sec" | "s" => Self::Second,
            "minute" | "min" | "m" => Self::Minute,
            "hour" | "hr" | "h" => Self::Hour,
            "day" | "d" => Self::Day,
            _ => Self::Other(unit),
        }
    }
}

impl From<UnitOfTime> for String {
    fn from(unit: UnitOfTime) -> Self {
        match unit {
            UnitOfTime::Second => "second".to_owned(),
            UnitOfTime::Minute => "minute".to_owned(),
            UnitOfTime::Hour => "hour".to_owned(),
            UnitOfTime::Day => "day".to_owned(),
            UnitOfTime::Other(unit) => unit,
        }
    }
}

impl UnitOfTime {
    /// Number of this unit in one day
    #[must_use]
    pub const fn per_day(&self) -> f64 {
        match self {
            Self::Second => SECONDS_PER_DAY,
            Self::Minute => 1440.,
            Self::Hour => 24.,
            Self::Day | Self::Other(_) => 1.,
        }
    }
}

/// Start or end of a schedule's validity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBound", into = "RawBound")]
pub enum ScheduleBound {
    DayOfYear(f64),
    Timestamp(NaiveDateTime),
}

impl ScheduleBound {
    /// Fractional day of year, counting from zero
    #[must_use]
    pub fn day_of_year(&self) -> f64 {
        match self {
            Self::DayOfYear(day) => *day,
            Self::Timestamp(timestamp) => day_of_year(timestamp),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawBound {
    Number(f64),
    Text(String),
}

impl TryFrom<RawBound> for ScheduleBound {
    type Error = TimestampError;

    fn try_from(raw: RawBound) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawBound::Number(day) => Ok(Self::DayOfYear(day)),
            RawBound::Text(text) => parse_timestamp(&text).map(Self::Timestamp),
        }
    }
}

impl From<ScheduleBound> for RawBound {
    fn from(bound: ScheduleBound) -> Self {
        match bound {
            ScheduleBound::DayOfYear(day) => Self::Number(day),
            ScheduleBound::Timestamp(timestamp) => {
                Self::Text(timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
            }
        }
    }
}

/// One row of the per-chamber table
///
/// Field names on disk follow the column names of the chamber tables kept with each deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChamberSpec {
    #[serde(rename = "ch_no")]
    pub number: u32,
    /// Chamber area in m^2
    #[serde(rename = "A_ch")]
    pub area: f64,
    /// Reference area used to standardise fluxes, in m^2
    #[serde(rename = "A_ch_std")]
    pub standard_area: f64,
    /// Chamber volume in m^3
    #[serde(rename = "V_ch")]
    pub volume: f64,
    #[serde(rename = "ch_label")]
    pub label: String,
    pub is_leaf_chamber: bool,
    #[serde(rename = "flowmeter_no")]
    pub flowmeter: Option<usize>,
    #[serde(rename = "TC_no")]
    pub thermocouple: Option<usize>,
    #[serde(rename = "PAR_no")]
    pub par_sensor: Option<usize>,
    /// Offset of the chamber line start within the sampling cycle
    #[serde(rename = "ch_start")]
    pub start: f64,
    /// Open period before closure
    #[serde(rename = "ch_o_b")]
    pub open_before: f64,
    /// Closure period
    #[serde(rename = "ch_cls")]
    pub closure: f64,
    /// Open period after closure
    #[serde(rename = "ch_o_a")]
    pub open_after: f64,
    #[serde(rename = "ch_end")]
    pub end: f64,
    /// Atmospheric reference period
    #[serde(rename = "ch_atm_a")]
    pub atmosphere_after: f64,
    pub optimize_timelag: bool,
    pub timelag_nominal: f64,
    pub timelag_upper_limit: f64,
    pub timelag_lower_limit: f64,
}

impl ChamberSpec {
    fn scale_times(&mut self, divisor: f64) {
        for field in [
            &mut self.start,
            &mut self.open_before,
            &mut self.closure,
            &mut self.open_after,
            &mut self.end,
            &mut self.atmosphere_after,
            &mut self.timelag_nominal,
            &mut self.timelag_upper_limit,
            &mut self.timelag_lower_limit,
        ] {
            *field /= divisor;
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule `{name}` declares {declared} chambers but lists {listed}")]
    ChamberCountMismatch {
        name: String,
        declared: usize,
        listed: usize,
    },
}

/// A chamber deployment valid between two days of the year
///
/// `chambers` may be left empty when the per-chamber table is kept in a separate file, see
/// [`read_chamber_table`]. Otherwise it must hold exactly `n_ch` rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    #[serde(default)]
    pub name: String,
    pub schedule_start: ScheduleBound,
    pub schedule_end: ScheduleBound,
    pub n_ch: usize,
    /// Length of a full sampling cycle
    pub smpl_cycle_len: f64,
    pub n_cycle_per_day: usize,
    pub unit_of_time: UnitOfTime,
    #[serde(default)]
    pub chambers: Vec<ChamberSpec>,
}

impl ScheduleDefinition {
    /// Check that the listed chambers agree with `n_ch`
    ///
    /// # Errors
    /// Returns [`ScheduleError::ChamberCountMismatch`] if chambers are listed and their number
    /// differs from `n_ch`.
    pub fn validate(&self) -> std::result::Result<(), ScheduleError> {
        if self.chambers.is_empty() || self.chambers.len() == self.n_ch {
            Ok(())
        } else {
            Err(ScheduleError::ChamberCountMismatch {
                name: self.name.clone(),
                declared: self.n_ch,
                listed: self.chambers.len(),
            })
        }
    }

    /// Whether `day_of_year` lies in `[schedule_start, schedule_end)`
    #[must_use]
    pub fn covers(&self, day_of_year: f64) -> bool {
        self.schedule_start.day_of_year() <= day_of_year
            && day_of_year < self.schedule_end.day_of_year()
    }

    /// Copy of the definition with every duration and offset converted to days
    #[must_use]
    pub fn resolve(&self) -> ResolvedSchedule {
        let divisor = self.unit_of_time.per_day();
        let chambers = self
            .chambers
            .iter()
            .cloned()
            .map(|mut chamber| {
                chamber.scale_times(divisor);
                chamber
            })
            .collect();

        ResolvedSchedule {
            name: self.name.clone(),
            schedule_start: self.schedule_start.day_of_year(),
            schedule_end: self.schedule_end.day_of_year(),
            n_ch: self.n_ch,
            smpl_cycle_len: self.smpl_cycle_len / divisor,
            n_cycle_per_day: self.n_cycle_per_day,
            unit_of_time: self.unit_of_time.clone(),
            chambers,
        }
    }
}

/// The schedule in force on a given day, with all times in days
///
/// `unit_of_time` records the unit the definition was written in.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSchedule {
    pub name: String,
    pub schedule_start: f64,
    pub schedule_end: f64,
    pub n_ch: usize,
    pub smpl_cycle_len: f64,
    pub n_cycle_per_day: usize,
    pub unit_of_time: UnitOfTime,
    pub chambers: Vec<ChamberSpec>,
}

impl ResolvedSchedule {
    /// Phase durations of the chamber at `index`, in seconds
    #[must_use]
    pub fn closure_timing(&self, index: usize, turnover_time: f64) -> Option<ClosureTiming> {
        self.chambers.get(index).map(|chamber| {
            ClosureTiming::new(
                turnover_time,
                chamber.open_before * SECONDS_PER_DAY,
                chamber.closure * SECONDS_PER_DAY,
                chamber.open_after * SECONDS_PER_DAY,
            )
        })
    }

    /// Lag search for the chamber at `index`, bounded by its limits and seeded at its nominal
    /// lag, in seconds
    ///
    /// `None` if there is no such chamber or its lag is not to be optimised.
    #[must_use]
    pub fn lag_search(&self, index: usize) -> Option<LagSearch> {
        self.chambers
            .get(index)
            .filter(|chamber| chamber.optimize_timelag)
            .map(|chamber| LagSearch {
                closure_only: false,
                bounds: Some((
                    chamber.timelag_lower_limit * SECONDS_PER_DAY,
                    chamber.timelag_upper_limit * SECONDS_PER_DAY,
                )),
                guess: Some(chamber.timelag_nominal * SECONDS_PER_DAY),
            })
    }

    /// Nominal lag of the chamber at `index`, in seconds
    #[must_use]
    pub fn nominal_timelag(&self, index: usize) -> Option<f64> {
        self.chambers
            .get(index)
            .map(|chamber| chamber.timelag_nominal * SECONDS_PER_DAY)
    }
}

/// Finds the schedule in force on a day
#[derive(Clone)]
pub struct ScheduleResolver {
    logger: Logger,
}

impl ScheduleResolver {
    #[must_use]
    pub const fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// First definition covering `day_of_year`, in the order given
    #[must_use]
    pub fn find(
        day_of_year: f64,
        definitions: &[ScheduleDefinition],
    ) -> Option<&ScheduleDefinition> {
        definitions
            .iter()
            .find(|definition| definition.covers(day_of_year))
    }

    /// Resolve the schedule in force on `day_of_year`
    ///
    /// When definitions overlap the first one in `definitions` wins. If none covers the day a
    /// warning is logged and `None` is returned; callers normally skip the day.
    #[must_use]
    pub fn resolve(
        &self,
        day_of_year: f64,
        definitions: &[ScheduleDefinition],
    ) -> Option<ResolvedSchedule> {
        let Some(definition) = Self::find(day_of_year, definitions) else {
            diagnostics::emit(&self.logger, &Diagnostic::NoScheduleForDay { day_of_year });
            return None;
        };
        slog::debug!(self.logger, "resolved chamber schedule";
            "day_of_year" => day_of_year,
            "schedule" => &definition.name);
        Some(definition.resolve())
    }
}

#[derive(Deserialize)]
struct ScheduleFile {
    schedule: Vec<ScheduleDefinition>,
}

/// Parse schedule definitions from a TOML document of `[[schedule]]` tables
///
/// Definitions are returned in document order.
///
/// # Errors
/// Returns an error if the document is not valid TOML, a field is missing or has the wrong type,
/// a schedule bound is neither a number nor a recognised timestamp, or a definition fails
/// [`ScheduleDefinition::validate`].
pub fn from_toml_str(contents: &str) -> Result<Vec<ScheduleDefinition>> {
    let file: ScheduleFile = toml::from_str(contents)?;
    for definition in &file.schedule {
        definition.validate()?;
    }
    Ok(file.schedule)
}

/// Read schedule definitions from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read or [`from_toml_str`] fails on its contents.
pub fn from_file(path: &Path) -> Result<Vec<ScheduleDefinition>> {
    if !path.exists() {
        return Err(format!("schedule file {} not found", path.display()).into());
    }
    let contents = fs::read_to_string(path)?;
    from_toml_str(&contents)
}

/// Read a per-chamber table from a CSV file with a header row
///
/// # Errors
/// Returns an error if the file cannot be read or any row fails to deserialize.
pub fn read_chamber_table(path: &Path) -> Result<Vec<ChamberSpec>> {
    if !path.exists() {
        return Err(format!("chamber table {} not found", path.display()).into());
    }

    let file = fs::read(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(&file[..]);

    let mut chambers = vec![];
    for result in rdr.deserialize() {
        let chamber: ChamberSpec = result?;
        chambers.push(chamber);
    }
    Ok(chambers)
}
