//! Calendar month arithmetic.
//!
//! Billing windows, snapshots and payout batches are all keyed by the calendar month in UTC. [`CalendarMonth`] wraps
//! the `YYYY-MM` form used in URLs and in the database, and provides the half-open UTC window `[start, end)` that
//! every windowed query in the engine uses. Month addition clamps to the last valid day, so a hold period anchored
//! on the 31st lapses on the 28th/29th/30th of a shorter month rather than spilling into the month after.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid calendar month: {0}")]
pub struct MonthParseError(String);

/// A calendar month in UTC, e.g. `2024-03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarMonth {
    first_day: NaiveDate,
}

impl CalendarMonth {
    /// Years are restricted to 1970..=9999 so that month arithmetic can never leave chrono's range.
    pub fn new(year: i32, month: u32) -> Result<Self, MonthParseError> {
        if !(1970..=9999).contains(&year) {
            return Err(MonthParseError(format!("year {year} is out of range")));
        }
        let first_day = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| MonthParseError(format!("{year:04}-{month:02} is not a valid month")))?;
        Ok(Self { first_day })
    }

    /// The month containing the given instant.
    pub fn containing(moment: DateTime<Utc>) -> Self {
        let first_day = moment.date_naive().with_day(1).unwrap_or_else(|| {
            error!("Could not derive the first day of the month for {moment}. This conversion cannot fail.");
            moment.date_naive()
        });
        Self { first_day }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// Midnight UTC on the first of the month.
    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.first_day.and_time(NaiveTime::MIN))
    }

    /// Midnight UTC on the first of the following month. The window end is exclusive.
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn next(&self) -> Self {
        Self { first_day: self.first_day + Months::new(1) }
    }

    /// The half-open UTC window `[start, end)` covered by this month.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start(), self.end())
    }

    /// A month has closed once its last instant has passed.
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        self.end() <= now
    }
}

impl Display for CalendarMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for CalendarMonth {
    type Err = MonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MonthParseError(format!("'{s}' is not in YYYY-MM form"));
        let (year, month) = s.split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year = year.parse::<i32>().map_err(|_| err())?;
        let month = month.parse::<u32>().map_err(|_| err())?;
        Self::new(year, month)
    }
}

impl Serialize for CalendarMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CalendarMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_codec {
    //! Months are stored as TEXT in `YYYY-MM` form, which sorts chronologically.
    use std::borrow::Cow;

    use sqlx::{
        encode::IsNull,
        error::BoxDynError,
        sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
        Decode,
        Encode,
        Sqlite,
        Type,
    };

    use super::CalendarMonth;

    impl Type<Sqlite> for CalendarMonth {
        fn type_info() -> SqliteTypeInfo {
            <&str as Type<Sqlite>>::type_info()
        }

        fn compatible(ty: &SqliteTypeInfo) -> bool {
            <&str as Type<Sqlite>>::compatible(ty)
        }
    }

    impl<'q> Encode<'q, Sqlite> for CalendarMonth {
        fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> IsNull {
            buf.push(SqliteArgumentValue::Text(Cow::Owned(self.to_string())));
            IsNull::No
        }
    }

    impl<'r> Decode<'r, Sqlite> for CalendarMonth {
        fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
            let s = <&str as Decode<Sqlite>>::decode(value)?;
            Ok(s.parse::<CalendarMonth>()?)
        }
    }
}

/// Adds whole calendar months to an instant, clamping the day to the end of the target month where needed.
/// `2024-01-31T10:00:00Z` plus one month is `2024-02-29T10:00:00Z`.
pub fn add_calendar_months(moment: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    moment.checked_add_months(Months::new(months)).unwrap_or_else(|| {
        error!("Adding {months} months to {moment} overflowed the calendar. Leaving the instant unchanged.");
        moment
    })
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn month(s: &str) -> CalendarMonth {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(month("2024-03").to_string(), "2024-03");
        assert_eq!(month("2024-03"), CalendarMonth::new(2024, 3).unwrap());
        assert!("2024-13".parse::<CalendarMonth>().is_err());
        assert!("2024-00".parse::<CalendarMonth>().is_err());
        assert!("2024-3".parse::<CalendarMonth>().is_err());
        assert!("24-03".parse::<CalendarMonth>().is_err());
        assert!("202403".parse::<CalendarMonth>().is_err());
        assert!("969-03".parse::<CalendarMonth>().is_err());
    }

    #[test]
    fn windows_are_half_open() {
        let (start, end) = month("2024-02").window();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(month("2024-12").next(), month("2025-01"));
    }

    #[test]
    fn closed_months() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(month("2024-02").has_closed(now));
        assert!(!month("2024-03").has_closed(now));
        assert_eq!(CalendarMonth::containing(now), month("2024-03"));
    }

    #[test]
    fn month_addition_clamps_to_short_months() {
        let jan31 = Utc.with_ymd_and_hms(2024, 1, 31, 10, 30, 0).unwrap();
        assert_eq!(add_calendar_months(jan31, 1), Utc.with_ymd_and_hms(2024, 2, 29, 10, 30, 0).unwrap());
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 10, 30, 0).unwrap();
        assert_eq!(add_calendar_months(jan31, 1), Utc.with_ymd_and_hms(2025, 2, 28, 10, 30, 0).unwrap());
        let aug31 = Utc.with_ymd_and_hms(2024, 8, 31, 23, 59, 59).unwrap();
        assert_eq!(add_calendar_months(aug31, 1), Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 59).unwrap());
        let mid = Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap();
        assert_eq!(add_calendar_months(mid, 1), Utc.with_ymd_and_hms(2024, 4, 15, 8, 0, 0).unwrap());
    }
}
