//! Shared primitive types used across the entire pipeline.

use crate::error::{PipelineError, PipelineResult};
use chrono::Datelike;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A region's canonical name. Only values produced by the identity
/// normalizer are used as join keys.
pub type RegionName = String;

/// The canonical regeneration run identifier.
pub type RunId = String;

/// A calendar month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodMonth {
    year:  i32,
    month: u32,
}

impl PeriodMonth {
    pub fn new(year: i32, month: u32) -> PipelineResult<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(PipelineError::InvalidPeriod {
                value: format!("{year}-{month}"),
            });
        }
        Ok(Self { year, month })
    }

    pub fn of<D: Datelike>(date: &D) -> Self {
        Self {
            year:  date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months since year 0, used for arithmetic.
    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year:  ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn succ(&self) -> Self {
        self.plus_months(1)
    }

    pub fn plus_months(&self, n: i64) -> Self {
        Self::from_ordinal(self.ordinal() + n)
    }

    /// Signed number of months from `self` to `later`.
    pub fn months_until(&self, later: &PeriodMonth) -> i64 {
        later.ordinal() - self.ordinal()
    }

    /// `YYYY-MM-01`, the date under which graph points are stored.
    pub fn date_key(&self) -> String {
        format!("{self}-01")
    }
}

impl fmt::Display for PeriodMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodMonth {
    type Err = PipelineError;

    /// Accepts `YYYY-MM` and `YYYY-MM-DD` (the day is ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::InvalidPeriod { value: s.to_string() };
        let mut parts = s.trim().splitn(3, '-');
        let year: i32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let month: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if let Some(day) = parts.next() {
            day.parse::<u32>().map_err(|_| invalid())?;
        }
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for PeriodMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An inclusive range of months. Every regeneration is scoped to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: PeriodMonth,
    pub end:   PeriodMonth,
}

impl PeriodWindow {
    pub fn new(start: PeriodMonth, end: PeriodMonth) -> PipelineResult<Self> {
        if end < start {
            return Err(PipelineError::InvalidPeriod {
                value: format!("{start}..{end}"),
            });
        }
        Ok(Self { start, end })
    }

    /// `horizon` consecutive months starting at `anchor`.
    pub fn from_anchor(anchor: PeriodMonth, horizon: u32) -> PipelineResult<Self> {
        if horizon == 0 {
            return Err(PipelineError::InvalidPeriod {
                value: format!("{anchor} with horizon 0"),
            });
        }
        Ok(Self {
            start: anchor,
            end:   anchor.plus_months(i64::from(horizon) - 1),
        })
    }

    pub fn contains(&self, period: &PeriodMonth) -> bool {
        *period >= self.start && *period <= self.end
    }

    pub fn len(&self) -> usize {
        (self.start.months_until(&self.end) + 1) as usize
    }

    pub fn periods(&self) -> impl Iterator<Item = PeriodMonth> + '_ {
        (0..self.len() as i64).map(move |i| self.start.plus_months(i))
    }
}

impl fmt::Display for PeriodWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// The kinds of points stored in the graph series table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Actual,
    Fitted,
    Forecast,
    CiLower,
    CiUpper,
    MovingAvg,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 6] = [
        SeriesKind::Actual,
        SeriesKind::Fitted,
        SeriesKind::Forecast,
        SeriesKind::CiLower,
        SeriesKind::CiUpper,
        SeriesKind::MovingAvg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Actual    => "actual",
            SeriesKind::Fitted    => "fitted",
            SeriesKind::Forecast  => "forecast",
            SeriesKind::CiLower   => "ci_lower",
            SeriesKind::CiUpper   => "ci_upper",
            SeriesKind::MovingAvg => "moving_avg",
        }
    }
}

impl FromStr for SeriesKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeriesKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownSeriesKind { value: s.to_string() })
    }
}
