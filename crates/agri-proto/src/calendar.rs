//! Inclusive calendar date ranges.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtoError;

/// A range of whole days, inclusive on both ends.
///
/// A rental from 3 March to 5 March occupies three days and conflicts with
/// any other range touching any of those days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day.
    pub start: NaiveDate,
    /// Last day.
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a validated range.
    ///
    /// # Errors
    ///
    /// Returns an error if `end` is before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ProtoError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Check that `end` is not before `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if `end` is before `start`.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.end < self.start {
            return Err(ProtoError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Number of days covered, counting both ends.
    #[must_use]
    pub fn days(&self) -> u64 {
        let span = (self.end - self.start).num_days();
        u64::try_from(span).map_or(0, |d| d + 1)
    }

    /// Whether the two ranges share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
