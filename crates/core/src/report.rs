use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named date-range presets accepted by the reporting endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePreset {
    Today,
    Last7Days,
    Last30Days,
    CurrentMonth,
    PreviousMonth,
    CurrentQuarter,
    CurrentYear,
    Custom,
}

impl DatePreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Last7Days => "last7days",
            Self::Last30Days => "last30days",
            Self::CurrentMonth => "current_month",
            Self::PreviousMonth => "previous_month",
            Self::CurrentQuarter => "current_quarter",
            Self::CurrentYear => "current_year",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "today" => Some(Self::Today),
            "last7days" => Some(Self::Last7Days),
            "last30days" => Some(Self::Last30Days),
            "current_month" => Some(Self::CurrentMonth),
            "previous_month" => Some(Self::PreviousMonth),
            "current_quarter" => Some(Self::CurrentQuarter),
            "current_year" => Some(Self::CurrentYear),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Half-open UTC range `[from, to)` produced by resolving a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Returns the inclusive local date bounds of the range, used for
    /// filtering date-typed columns.
    pub fn date_bounds(&self) -> (NaiveDate, NaiveDate) {
        (
            self.from.date_naive(),
            (self.to - chrono::Duration::days(1)).date_naive(),
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("unknown reporting timezone: {0}")]
    UnknownTimezone(String),
    #[error("custom preset requires both 'from' and 'to'")]
    MissingCustomBounds,
    #[error("'from' must not be after 'to'")]
    InvertedBounds,
    #[error("date out of supported range")]
    OutOfRange,
}

/// Resolves a preset to a UTC range. `now` anchors the relative presets and
/// `timezone` is the IANA zone day boundaries are computed in. Custom
/// presets take inclusive local dates and ignore `now`.
pub fn resolve_range(
    preset: DatePreset,
    now: DateTime<Utc>,
    timezone: &str,
    custom_from: Option<NaiveDate>,
    custom_to: Option<NaiveDate>,
) -> Result<DateRange, DateRangeError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| DateRangeError::UnknownTimezone(timezone.to_string()))?;
    let today = now.with_timezone(&tz).date_naive();

    let (from_date, to_date_exclusive) = match preset {
        DatePreset::Today => (today, next_day(today)?),
        DatePreset::Last7Days => (shift_days(today, -6)?, next_day(today)?),
        DatePreset::Last30Days => (shift_days(today, -29)?, next_day(today)?),
        DatePreset::CurrentMonth => {
            let first = first_of_month(today.year(), today.month())?;
            (first, first_of_next_month(today.year(), today.month())?)
        }
        DatePreset::PreviousMonth => {
            let (year, month) = previous_month(today.year(), today.month());
            let first = first_of_month(year, month)?;
            (first, first_of_next_month(year, month)?)
        }
        DatePreset::CurrentQuarter => {
            let quarter_start_month = ((today.month() - 1) / 3) * 3 + 1;
            let first = first_of_month(today.year(), quarter_start_month)?;
            let end = if quarter_start_month + 3 > 12 {
                first_of_month(today.year() + 1, 1)?
            } else {
                first_of_month(today.year(), quarter_start_month + 3)?
            };
            (first, end)
        }
        DatePreset::CurrentYear => (
            first_of_month(today.year(), 1)?,
            first_of_month(today.year() + 1, 1)?,
        ),
        DatePreset::Custom => {
            let (Some(from), Some(to)) = (custom_from, custom_to) else {
                return Err(DateRangeError::MissingCustomBounds);
            };
            if from > to {
                return Err(DateRangeError::InvertedBounds);
            }
            (from, next_day(to)?)
        }
    };

    Ok(DateRange {
        from: local_midnight(tz, from_date)?,
        to: local_midnight(tz, to_date_exclusive)?,
    })
}

fn next_day(date: NaiveDate) -> Result<NaiveDate, DateRangeError> {
    date.succ_opt().ok_or(DateRangeError::OutOfRange)
}

fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate, DateRangeError> {
    date.checked_add_signed(chrono::Duration::days(days))
        .ok_or(DateRangeError::OutOfRange)
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(DateRangeError::OutOfRange)
}

fn first_of_next_month(year: i32, month: u32) -> Result<NaiveDate, DateRangeError> {
    if month == 12 {
        first_of_month(year + 1, 1)
    } else {
        first_of_month(year, month + 1)
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn local_midnight(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>, DateRangeError> {
    let naive = date.and_hms_opt(0, 0, 0).ok_or(DateRangeError::OutOfRange)?;
    // DST gaps can make local midnight nonexistent; take the earliest valid
    // instant in that case.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(DateRangeError::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).single().expect("anchor")
    }

    #[test]
    fn today_covers_one_utc_day() {
        let range = resolve_range(DatePreset::Today, anchor(), "UTC", None, None).expect("range");
        assert_eq!(range.from.to_rfc3339(), "2024-05-15T00:00:00+00:00");
        assert_eq!(range.to.to_rfc3339(), "2024-05-16T00:00:00+00:00");
    }

    #[test]
    fn last7days_starts_six_days_back() {
        let range =
            resolve_range(DatePreset::Last7Days, anchor(), "UTC", None, None).expect("range");
        assert_eq!(range.from.date_naive().to_string(), "2024-05-09");
        assert_eq!(range.to.date_naive().to_string(), "2024-05-16");
    }

    #[test]
    fn previous_month_handles_january() {
        let january = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).single().expect("jan");
        let range =
            resolve_range(DatePreset::PreviousMonth, january, "UTC", None, None).expect("range");
        assert_eq!(range.from.date_naive().to_string(), "2023-12-01");
        assert_eq!(range.to.date_naive().to_string(), "2024-01-01");
    }

    #[test]
    fn current_quarter_spans_three_months() {
        let range =
            resolve_range(DatePreset::CurrentQuarter, anchor(), "UTC", None, None).expect("range");
        assert_eq!(range.from.date_naive().to_string(), "2024-04-01");
        assert_eq!(range.to.date_naive().to_string(), "2024-07-01");
    }

    #[test]
    fn non_utc_timezone_shifts_the_day_boundary() {
        // 2024-05-15T12:00Z is already 2024-05-15 in Berlin (UTC+2 in May),
        // so the local day starts at 22:00Z the previous evening.
        let range =
            resolve_range(DatePreset::Today, anchor(), "Europe/Berlin", None, None).expect("range");
        assert_eq!(range.from.to_rfc3339(), "2024-05-14T22:00:00+00:00");
    }

    #[test]
    fn custom_requires_bounds() {
        let err = resolve_range(DatePreset::Custom, anchor(), "UTC", None, None).unwrap_err();
        assert_eq!(err, DateRangeError::MissingCustomBounds);
    }

    #[test]
    fn custom_rejects_inverted_bounds() {
        let from = NaiveDate::from_ymd_opt(2024, 5, 10).expect("date");
        let to = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        let err =
            resolve_range(DatePreset::Custom, anchor(), "UTC", Some(from), Some(to)).unwrap_err();
        assert_eq!(err, DateRangeError::InvertedBounds);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = resolve_range(DatePreset::Today, anchor(), "Mars/Olympus", None, None).unwrap_err();
        assert!(matches!(err, DateRangeError::UnknownTimezone(_)));
    }
}
