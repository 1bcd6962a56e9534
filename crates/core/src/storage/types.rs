use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::diary::{validate_window, ValidationError};
use crate::serde::deserialize_optional_timestamp;

/// Default trailing window for statistics, in days.
pub const DEFAULT_STATS_DAYS: u32 = 30;

/// Filters and paging for per-user listings.
///
/// Both bounds are inclusive. Listings come back newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Rejects a window whose start lies after its end.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_window(self.start_date, self.end_date)
    }
}

/// Start of a trailing window of `days` days ending at `now`.
///
/// Never earlier than [`earliest_window_start`], so any `days` yields an
/// instant both backends can bind.
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let floor = earliest_window_start();
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .map_or(floor, |start| start.max(floor))
}

/// Midnight UTC on 0001-01-01.
pub fn earliest_window_start() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MIN_UTC, |naive| naive.and_utc())
}
