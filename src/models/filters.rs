//! Closed filter configuration objects for list and report operations.
//!
//! Recognized fields are enumerated; anything else is rejected at
//! deserialization time (`deny_unknown_fields`), never silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::models::{DiagnosisStatus, DiseaseLabel, Granularity};

/// Internal filter applied to diagnosis store scans.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisFilter {
    pub owner_user_id: Option<Uuid>,
    pub label_in: Option<Vec<DiseaseLabel>>,
    pub status: Option<DiagnosisStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Query parameters for `GET /diagnosis`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct ListDiagnosesQuery {
    /// Restrict to one owner
    pub owner_user_id: Option<Uuid>,
    /// Comma-separated effective-label list, e.g. `septoria,mildew`
    #[serde(default, deserialize_with = "deserialize_label_list")]
    #[param(value_type = Option<String>)]
    pub label_in: Option<Vec<DiseaseLabel>>,
    pub status: Option<DiagnosisStatus>,
    /// Inclusive lower bound on creation time (RFC 3339)
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time (RFC 3339)
    pub date_to: Option<DateTime<Utc>>,
    /// Page number (default: 1)
    pub page: Option<u32>,
    /// Items per page (default: 50, max: 100)
    pub limit: Option<u32>,
}

impl ListDiagnosesQuery {
    pub fn filter(&self) -> DiagnosisFilter {
        DiagnosisFilter {
            owner_user_id: self.owner_user_id,
            label_in: self.label_in.clone(),
            status: self.status,
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }
}

/// Query parameters for `GET /analytics/diagnosis-report`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[into_params(parameter_in = Query)]
pub struct DiagnosisReportQuery {
    pub owner_user_id: Option<Uuid>,
    /// Comma-separated effective-label list, e.g. `septoria,mildew`
    #[serde(default, deserialize_with = "deserialize_label_list")]
    #[param(value_type = Option<String>)]
    pub label_in: Option<Vec<DiseaseLabel>>,
    pub status: Option<DiagnosisStatus>,
    /// Inclusive lower bound on creation time (RFC 3339)
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time (RFC 3339)
    pub date_to: Option<DateTime<Utc>>,
    /// Trend bucket width (default: day)
    pub bucket_granularity: Option<Granularity>,
}

impl DiagnosisReportQuery {
    pub fn filter(&self) -> DiagnosisFilter {
        DiagnosisFilter {
            owner_user_id: self.owner_user_id,
            label_in: self.label_in.clone(),
            status: self.status,
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.bucket_granularity.unwrap_or(Granularity::Day)
    }
}

/// Deserialize a comma-separated label list, rejecting unknown labels.
fn deserialize_label_list<'de, D>(deserializer: D) -> Result<Option<Vec<DiseaseLabel>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => s
            .split(',')
            .map(|token| DiseaseLabel::parse(token.trim()).map_err(serde::de::Error::custom))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::web::Query;

    #[test]
    fn test_recognized_fields_parse() {
        let q = Query::<ListDiagnosesQuery>::from_query(
            "ownerUserId=7e1deb5e-30e4-4b31-9d2b-a1a2cdbabb32&labelIn=septoria,mildew&status=corrected&page=2&limit=10",
        )
        .unwrap();
        assert_eq!(
            q.label_in,
            Some(vec![DiseaseLabel::Septoria, DiseaseLabel::Mildew])
        );
        assert_eq!(q.status, Some(DiagnosisStatus::Corrected));
        assert_eq!(q.page, Some(2));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = Query::<ListDiagnosesQuery>::from_query("ownerId=abc");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let result = Query::<ListDiagnosesQuery>::from_query("labelIn=septoria,rust");
        assert!(result.is_err());
    }

    #[test]
    fn test_report_query_defaults_to_daily_buckets() {
        let q = Query::<DiagnosisReportQuery>::from_query("").unwrap();
        assert_eq!(q.granularity(), Granularity::Day);

        let q =
            Query::<DiagnosisReportQuery>::from_query("bucketGranularity=month").unwrap();
        assert_eq!(q.granularity(), Granularity::Month);
    }

    #[test]
    fn test_date_bounds_parse_rfc3339() {
        let q = Query::<DiagnosisReportQuery>::from_query(
            "dateFrom=2026-01-01T00:00:00Z&dateTo=2026-01-08T00:00:00Z",
        )
        .unwrap();
        assert!(q.date_from.is_some());
        assert!(q.date_to.is_some());
    }
}
