//! Analytics aggregator.
//!
//! Stateless: every report scans the diagnosis store at call time and
//! computes over the matching rows. Nothing here is cached or persisted.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    AnalyticsSnapshot, ConfusionMatrix, Diagnosis, DiagnosisReportQuery, DiseaseLabel,
    Granularity, SystemReport, TrendBucket,
};

/// Upper bound on trend series length; a range/granularity combination that
/// exceeds it is rejected rather than silently truncated.
pub const MAX_TREND_BUCKETS: usize = 1096;

/// Compute the diagnosis report for the given filter.
pub async fn diagnosis_report(
    pool: &DbPool,
    query: &DiagnosisReportQuery,
    model_version: &str,
) -> AppResult<AnalyticsSnapshot> {
    let records = pool.fetch_diagnoses_for_report(&query.filter()).await?;
    compute_snapshot(
        &records,
        query.date_from,
        query.date_to,
        query.granularity(),
        model_version,
    )
}

/// Read live system-wide totals. No cache: every call reflects the store's
/// current state.
pub async fn system_report(pool: &DbPool, model_version: &str) -> AppResult<SystemReport> {
    let total_users = pool.count_image_owners().await?;
    let total_diagnoses = pool.count_diagnoses().await?;
    let total_images = pool.count_images().await?;

    Ok(SystemReport {
        total_users,
        total_diagnoses,
        total_images,
        model_version: model_version.to_string(),
    })
}

/// Build a snapshot from an already-fetched record set.
pub fn compute_snapshot(
    records: &[Diagnosis],
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    granularity: Granularity,
    model_version: &str,
) -> AppResult<AnalyticsSnapshot> {
    let trend = trend_buckets(records, date_from, date_to, granularity)?;
    let window_start = trend.first().map(|b| b.bucket_start);
    let window_end = date_to.or_else(|| {
        trend
            .last()
            .map(|b| granularity.advance(b.bucket_start))
    });

    let owners: BTreeSet<_> = records.iter().map(|r| r.owner_user_id).collect();
    let total_reviewed = records.iter().filter(|r| r.status.is_reviewed()).count() as u64;

    Ok(AnalyticsSnapshot {
        window_start,
        window_end,
        label_counts: label_counts(records),
        agreement_rate: agreement_rate(records),
        trend,
        confusion_matrix: confusion_matrix(records),
        total_diagnoses: records.len() as u64,
        total_reviewed,
        total_users: owners.len() as u64,
        model_version: model_version.to_string(),
    })
}

/// Diagnoses per effective label. Every label appears, zero-filled, so
/// chart series line up.
pub fn label_counts(records: &[Diagnosis]) -> BTreeMap<DiseaseLabel, u64> {
    let mut counts: BTreeMap<DiseaseLabel, u64> =
        DiseaseLabel::ALL.iter().map(|&l| (l, 0)).collect();

    for record in records {
        if let Some(label) = record.effective_label() {
            *counts.entry(label).or_insert(0) += 1;
        }
    }

    counts
}

/// Fraction of reviewed diagnoses where the human agreed with the
/// classifier. Exactly 0.0 (not NaN) when nothing has been reviewed.
pub fn agreement_rate(records: &[Diagnosis]) -> f64 {
    let mut reviewed = 0u64;
    let mut agreed = 0u64;

    for record in records {
        if let Some(agrees) = record.agrees() {
            reviewed += 1;
            if agrees {
                agreed += 1;
            }
        }
    }

    if reviewed == 0 {
        0.0
    } else {
        agreed as f64 / reviewed as f64
    }
}

/// Confusion counts over reviewed records: rows are the human label,
/// columns the automatic prediction.
pub fn confusion_matrix(records: &[Diagnosis]) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::empty();
    let index: BTreeMap<DiseaseLabel, usize> = DiseaseLabel::ALL
        .iter()
        .enumerate()
        .map(|(i, &l)| (l, i))
        .collect();

    for record in records {
        if !record.status.is_reviewed() {
            continue;
        }
        if let (Some(auto), Some(manual)) = (record.automatic_label, record.manual_label) {
            matrix.counts[index[&manual]][index[&auto]] += 1;
        }
    }

    matrix
}

/// Bucket diagnosis counts by creation time.
///
/// The window is the requested [dateFrom, dateTo) range; when a bound is
/// missing it falls back to the span of the matching records. Every unit in
/// the window gets a bucket, zero-filled, so charts have no gaps. Records
/// outside the window are not counted.
pub fn trend_buckets(
    records: &[Diagnosis],
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    granularity: Granularity,
) -> AppResult<Vec<TrendBucket>> {
    let from = date_from.or_else(|| records.iter().map(|r| r.created_at).min());
    // Derived upper bound is nudged past the newest record so its bucket
    // is included; an explicit dateTo stays exclusive.
    let end = date_to.or_else(|| {
        records
            .iter()
            .map(|r| r.created_at)
            .max()
            .map(|t| t + Duration::seconds(1))
    });

    let (Some(from), Some(end)) = (from, end) else {
        return Ok(Vec::new());
    };

    if end < from {
        return Err(AppError::InvalidInput(
            "dateTo must not precede dateFrom".to_string(),
        ));
    }

    let mut buckets = Vec::new();
    let mut start = granularity.bucket_start(from);
    while start < end {
        if buckets.len() >= MAX_TREND_BUCKETS {
            return Err(AppError::InvalidInput(format!(
                "Requested range produces more than {} {} buckets; narrow the range or coarsen the granularity",
                MAX_TREND_BUCKETS,
                granularity.as_str()
            )));
        }
        buckets.push(TrendBucket {
            bucket_start: start,
            count: 0,
        });
        start = granularity.advance(start);
    }

    for record in records {
        if record.created_at < granularity.bucket_start(from) || record.created_at >= end {
            continue;
        }
        let bucket_start = granularity.bucket_start(record.created_at);
        if let Ok(i) = buckets.binary_search_by_key(&bucket_start, |b| b.bucket_start) {
            buckets[i].count += 1;
        }
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagnosisStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn record_at(created_at: DateTime<Utc>) -> Diagnosis {
        Diagnosis {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            automatic_label: Some(DiseaseLabel::Healthy),
            automatic_confidence: Some(0.8),
            probabilities: None,
            manual_label: None,
            status: DiagnosisStatus::AutoClassified,
            attempt_count: 1,
            remark: None,
            created_at,
            diagnosed_at: Some(created_at),
            corrected_at: None,
            corrected_by_user_id: None,
        }
    }

    fn reviewed_record(auto: DiseaseLabel, manual: DiseaseLabel) -> Diagnosis {
        let mut record = record_at(Utc::now());
        record.automatic_label = Some(auto);
        record.manual_label = Some(manual);
        record.status = DiagnosisStatus::resolve_review(auto, manual);
        record.corrected_at = Some(Utc::now());
        record.corrected_by_user_id = Some(Uuid::new_v4());
        record
    }

    #[test]
    fn test_agreement_rate_is_zero_without_reviews() {
        assert_eq!(agreement_rate(&[]), 0.0);

        let unreviewed: Vec<Diagnosis> = (0..5).map(|_| record_at(Utc::now())).collect();
        assert_eq!(agreement_rate(&unreviewed), 0.0);
    }

    #[test]
    fn test_agreement_rate_is_one_when_all_corrections_match() {
        let records: Vec<Diagnosis> = (0..10)
            .map(|_| reviewed_record(DiseaseLabel::Septoria, DiseaseLabel::Septoria))
            .collect();
        assert_eq!(agreement_rate(&records), 1.0);
    }

    #[test]
    fn test_agreement_rate_counts_only_reviewed() {
        let records = vec![
            reviewed_record(DiseaseLabel::Septoria, DiseaseLabel::Septoria),
            reviewed_record(DiseaseLabel::BrownRust, DiseaseLabel::Septoria),
            record_at(Utc::now()), // unreviewed, excluded from the denominator
        ];
        assert_eq!(agreement_rate(&records), 0.5);
    }

    #[test]
    fn test_label_counts_are_zero_filled() {
        let counts = label_counts(&[]);
        assert_eq!(counts.len(), DiseaseLabel::ALL.len());
        assert!(counts.values().all(|&c| c == 0));
    }

    #[test]
    fn test_label_counts_use_effective_label() {
        let records = vec![reviewed_record(DiseaseLabel::BrownRust, DiseaseLabel::Septoria)];
        let counts = label_counts(&records);
        assert_eq!(counts[&DiseaseLabel::Septoria], 1);
        assert_eq!(counts[&DiseaseLabel::BrownRust], 0);
    }

    #[test]
    fn test_seven_day_range_yields_seven_buckets() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();

        // Diagnoses on only 2 of the 7 days
        let records = vec![
            record_at(Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap()),
            record_at(Utc.with_ymd_and_hms(2026, 1, 2, 17, 0, 0).unwrap()),
            record_at(Utc.with_ymd_and_hms(2026, 1, 6, 8, 0, 0).unwrap()),
        ];

        let buckets =
            trend_buckets(&records, Some(from), Some(to), Granularity::Day).unwrap();
        assert_eq!(buckets.len(), 7);

        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![0, 2, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_buckets_exclude_records_outside_window() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();

        let records = vec![
            record_at(Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap()),
            record_at(Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap()),
            record_at(Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap()), // at exclusive bound
        ];

        let buckets =
            trend_buckets(&records, Some(from), Some(to), Granularity::Day).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[1].count, 0);
    }

    #[test]
    fn test_bucket_window_derives_from_records_when_unbounded() {
        let records = vec![
            record_at(Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()),
            record_at(Utc.with_ymd_and_hms(2026, 2, 3, 12, 0, 0).unwrap()),
        ];

        let buckets = trend_buckets(&records, None, None, Granularity::Day).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[2].count, 1);
    }

    #[test]
    fn test_empty_set_without_range_yields_no_buckets() {
        let buckets = trend_buckets(&[], None, None, Granularity::Week).unwrap();
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let from = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(trend_buckets(&[], Some(from), Some(to), Granularity::Day).is_err());
    }

    #[test]
    fn test_oversized_range_is_rejected_not_truncated() {
        let from = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let result = trend_buckets(&[], Some(from), Some(to), Granularity::Day);
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_confusion_matrix_counts_reviewed_pairs() {
        let records = vec![
            reviewed_record(DiseaseLabel::BrownRust, DiseaseLabel::Septoria),
            reviewed_record(DiseaseLabel::BrownRust, DiseaseLabel::Septoria),
            reviewed_record(DiseaseLabel::Mildew, DiseaseLabel::Mildew),
            record_at(Utc::now()), // unreviewed, excluded
        ];

        let matrix = confusion_matrix(&records);
        // labels order: brown_rust, healthy, mildew, septoria, yellow_rust
        assert_eq!(matrix.counts[3][0], 2); // manual septoria, auto brown_rust
        assert_eq!(matrix.counts[2][2], 1); // mildew diagonal
        let total: u64 = matrix.counts.iter().flatten().sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_snapshot_totals() {
        let records = vec![
            reviewed_record(DiseaseLabel::BrownRust, DiseaseLabel::Septoria),
            record_at(Utc::now()),
        ];

        let snapshot =
            compute_snapshot(&records, None, None, Granularity::Day, "leafscan-v1").unwrap();
        assert_eq!(snapshot.total_diagnoses, 2);
        assert_eq!(snapshot.total_reviewed, 1);
        assert_eq!(snapshot.total_users, 2);
        assert_eq!(snapshot.agreement_rate, 0.0);
        assert_eq!(snapshot.model_version, "leafscan-v1");
    }
}
