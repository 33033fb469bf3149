//! Visible time window for occurrence queries.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A closed interval `[start, end]` of instants.
///
/// Construction guarantees `start < end`, so the evaluator and the
/// materializer never see an empty or inverted window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(TimeWindow { start, end })
    }

    /// Build a window from two `YYYY-MM-DD` dates.
    /// `from` is taken at the start of its day, `to` at the start of its day as well,
    /// matching how views hand over month boundaries.
    pub fn from_dates(from: &str, to: &str) -> Result<Self, ValidationError> {
        let start = parse_date_start(from)?;
        let end = parse_date_start(to)?;
        TimeWindow::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether an instant falls inside the window, bounds included.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    /// Whether the span `[start, end]` touches the window.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }

    /// Stable textual form used inside cache keys.
    pub fn descriptor(&self) -> String {
        format!(
            "{}..{}",
            self.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Parse YYYY-MM-DD as start of day in UTC
fn parse_date_start(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidWindow {
        start: s.to_string(),
        end: s.to_string(),
    };
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok(midnight.and_utc())
}
