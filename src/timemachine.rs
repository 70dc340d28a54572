//! Time-machine filtering: "as of" control dates.
//!
//! A control date restricts visibility to rows created at or before the end
//! of that day. The filter applies to every candidate row *before* the
//! resolver picks the current version, so a row created after the control
//! date is invisible even when it is the latest version; resolution falls
//! back to an earlier eligible version or reports nothing.

use crate::types::Versioned;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An "as of" date for time travel. Defaults to today.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlDate(pub NaiveDate);

impl ControlDate {
    /// Today, in UTC.
    pub fn today() -> Self {
        ControlDate(Utc::now().date_naive())
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(ControlDate)
    }

    /// Inclusive visibility cutoff: the last representable instant of the
    /// control date.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.0
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .expect("end of day is a valid wall-clock time")
            .and_utc()
    }

    /// Whether a row created at `created_at` is visible under this date.
    pub fn admits(&self, created_at: DateTime<Utc>) -> bool {
        created_at <= self.cutoff()
    }

    /// Whether a record is visible under this date.
    pub fn admits_record<R: Versioned>(&self, record: &R) -> bool {
        self.admits(record.created_at())
    }
}

impl Default for ControlDate {
    fn default() -> Self {
        ControlDate::today()
    }
}

impl fmt::Debug for ControlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlDate({})", self.0)
    }
}

impl fmt::Display for ControlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NaiveDate> for ControlDate {
    fn from(date: NaiveDate) -> Self {
        ControlDate(date)
    }
}
