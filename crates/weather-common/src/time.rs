//! Month arithmetic for archive units.
//!
//! Upstream archives are published one file per variable per calendar month,
//! so the month is the unit everything else is keyed on.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// A calendar month (e.g. 1995-01).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a month, validating `month` is in 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, CommonError> {
        if !(1..=12).contains(&month) {
            return Err(CommonError::InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// January of `year`.
    pub const fn january(year: i32) -> Self {
        Self { year, month: 1 }
    }

    /// December of `year`.
    pub const fn december(year: i32) -> Self {
        Self { year, month: 12 }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Zero-padded month number as used in archive file names ("01".."12").
    pub fn month_padded(&self) -> String {
        format!("{:02}", self.month)
    }

    /// Midnight on the first day of the month.
    pub fn start(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    }

    /// Timestamp of the instant `hours` after the start of the month.
    pub fn hour_offset(&self, hours: usize) -> NaiveDateTime {
        self.start() + Duration::hours(hours as i64)
    }

    /// Number of hours in a complete month.
    pub fn hours_in_month(&self) -> usize {
        (self.next().start() - self.start()).num_hours() as usize
    }

    /// The following month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The month containing the given timestamp.
    pub fn containing(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// The first month that starts strictly after the month containing `ts`.
    ///
    /// Used to turn a committed watermark into the next month to fetch.
    pub fn after(ts: NaiveDateTime) -> Self {
        Self::containing(ts).next()
    }

    /// Iterate months from `self` to `end`, both inclusive.
    pub fn through(self, end: YearMonth) -> MonthRange {
        MonthRange {
            next: Some(self),
            end,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CommonError;

    /// Accepts `YYYYMM` (the form the archive uses) and `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (year, month) = match s.split_once('-') {
            Some((y, m)) => (y, m),
            None if s.len() == 6 => s.split_at(4),
            None => return Err(CommonError::InvalidMonth(s.to_string())),
        };

        let year: i32 = year
            .parse()
            .map_err(|_| CommonError::InvalidMonth(s.to_string()))?;
        let month: u32 = month
            .parse()
            .map_err(|_| CommonError::InvalidMonth(s.to_string()))?;

        YearMonth::new(year, month).map_err(|_| CommonError::InvalidMonth(s.to_string()))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // YAML may hand us 199501 as an integer
        let raw = serde_json::Value::deserialize(deserializer)?;
        let text = match raw {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected month string, got {other}"
                )))
            }
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive iterator over consecutive months.
#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<YearMonth>,
    end: YearMonth,
}

impl Iterator for MonthRange {
    type Item = YearMonth;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        self.next = Some(current.next());
        Some(current)
    }
}
