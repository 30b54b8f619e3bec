//! Analytics value objects.
//!
//! `AnalyticsSnapshot` is transient: computed per request by scanning the
//! diagnosis store, never persisted or cached.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::models::DiseaseLabel;

/// Time granularity for trend buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(AppError::InvalidInput(format!(
                "Unknown bucket granularity: {}",
                other
            ))),
        }
    }

    /// The start of the bucket containing `at`. Weeks start on Monday,
    /// months on the 1st; all buckets start at midnight UTC.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Self::Day => date,
            Self::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Self::Month => date.with_day(1).expect("day 1 exists in every month"),
        };
        start
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists on every date")
            .and_utc()
    }

    /// The start of the bucket following the one starting at `start`.
    pub fn advance(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Day => start + Duration::days(1),
            Self::Week => start + Duration::days(7),
            Self::Month => {
                let date = start.date_naive();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .expect("first of month is a valid date")
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight exists on every date")
                    .and_utc()
            }
        }
    }
}

/// One fixed-width interval of the trend series.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrendBucket {
    /// Inclusive start of the interval
    pub bucket_start: DateTime<Utc>,
    /// Diagnoses created inside the interval
    pub count: u64,
}

/// Confusion counts over reviewed diagnoses: rows are the human label,
/// columns the automatic prediction, both in `labels` order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfusionMatrix {
    pub labels: Vec<DiseaseLabel>,
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn empty() -> Self {
        ConfusionMatrix {
            labels: DiseaseLabel::ALL.to_vec(),
            counts: vec![vec![0; DiseaseLabel::ALL.len()]; DiseaseLabel::ALL.len()],
        }
    }
}

/// Point-in-time summary over a filtered set of diagnoses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalyticsSnapshot {
    /// Window the trend series covers; None when no records matched and no
    /// range was requested
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    /// Diagnoses per effective label (manual override wins over automatic)
    pub label_counts: BTreeMap<DiseaseLabel, u64>,
    /// Reviewed records where the human agreed, over all reviewed records.
    /// 0.0 when nothing has been reviewed.
    pub agreement_rate: f64,
    pub trend: Vec<TrendBucket>,
    pub confusion_matrix: ConfusionMatrix,
    pub total_diagnoses: u64,
    pub total_reviewed: u64,
    pub total_users: u64,
    pub model_version: String,
}

/// Live system-wide totals.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemReport {
    pub total_users: u64,
    pub total_diagnoses: u64,
    pub total_images: u64,
    pub model_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_bucket_truncates_to_midnight() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let start = Granularity::Day.bucket_start(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(
            Granularity::Day.advance(start),
            Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        // 2026-03-14 is a Saturday; the containing week starts Monday 03-09
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let start = Granularity::Week.bucket_start(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_month_bucket_advances_across_year_end() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let start = Granularity::Month.bucket_start(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(
            Granularity::Month.advance(start),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!(Granularity::parse("day").unwrap(), Granularity::Day);
        assert_eq!(Granularity::parse("week").unwrap(), Granularity::Week);
        assert_eq!(Granularity::parse("month").unwrap(), Granularity::Month);
        assert!(Granularity::parse("hour").is_err());
    }
}
