//! End-to-end scenario tests over the domain layer: classifier output
//! through the status state machine into the analytics aggregator.

use chrono::Utc;
use uuid::Uuid;

use leafscan_lib::error::{AppError, AppResult};
use leafscan_lib::models::{Diagnosis, DiagnosisStatus, DiseaseLabel, Granularity};
use leafscan_lib::services::analytics::{agreement_rate, compute_snapshot};
use leafscan_lib::services::inference::{Classifier, Prediction, SUM_TOLERANCE};

/// Classifier stub returning a fixed probability vector, exercising the
/// same seam the production tract model plugs into.
struct StubClassifier {
    output: Vec<f64>,
}

impl Classifier for StubClassifier {
    fn version(&self) -> &str {
        "stub-1"
    }

    fn classify(&self, _image_bytes: &[u8]) -> AppResult<Prediction> {
        Prediction::from_model_output(&self.output)
    }
}

fn pending_record(owner: Uuid) -> Diagnosis {
    Diagnosis {
        id: Uuid::now_v7(),
        image_id: Uuid::now_v7(),
        owner_user_id: owner,
        automatic_label: None,
        automatic_confidence: None,
        probabilities: None,
        manual_label: None,
        status: DiagnosisStatus::Pending,
        attempt_count: 0,
        remark: None,
        created_at: Utc::now(),
        diagnosed_at: None,
        corrected_at: None,
        corrected_by_user_id: None,
    }
}

/// Mirror of the store's guarded transition: succeeds only from Pending.
fn record_automatic(record: &mut Diagnosis, prediction: &Prediction) -> AppResult<()> {
    if !record.status.can_record_automatic() {
        return Err(AppError::AlreadyClassified(record.id));
    }
    record.automatic_label = Some(prediction.label);
    record.automatic_confidence = Some(prediction.confidence);
    record.probabilities = Some(prediction.probabilities.clone());
    record.status = DiagnosisStatus::AutoClassified;
    record.attempt_count += 1;
    record.diagnosed_at = Some(Utc::now());
    Ok(())
}

/// Mirror of the store's guarded review: requires an automatic baseline.
fn apply_manual(record: &mut Diagnosis, label: DiseaseLabel, by: Uuid) -> AppResult<()> {
    if !record.status.can_apply_manual() {
        return Err(AppError::NotYetClassified(record.id));
    }
    let automatic = record
        .automatic_label
        .expect("classified record has a label");
    record.status = DiagnosisStatus::resolve_review(automatic, label);
    record.manual_label = Some(label);
    record.corrected_at = Some(Utc::now());
    record.corrected_by_user_id = Some(by);
    Ok(())
}

#[test]
fn upload_diagnose_correct_report_round_trip() {
    let owner = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    // Classifier says brown_rust at 0.87
    let classifier = StubClassifier {
        output: vec![0.87, 0.05, 0.04, 0.03, 0.01],
    };
    let prediction = classifier.classify(b"image bytes").unwrap();
    assert_eq!(prediction.label, DiseaseLabel::BrownRust);
    assert!((prediction.confidence - 0.87).abs() < 1e-12);

    let sum: f64 = prediction.probabilities.values().sum();
    assert!((sum - 1.0).abs() < SUM_TOLERANCE);

    // Intake produced a pending record; classification lands on it
    let mut record = pending_record(owner);
    record_automatic(&mut record, &prediction).unwrap();
    assert_eq!(record.status, DiagnosisStatus::AutoClassified);
    assert_eq!(record.attempt_count, 1);

    // The human overrides to septoria
    apply_manual(&mut record, DiseaseLabel::Septoria, reviewer).unwrap();
    assert_eq!(record.status, DiagnosisStatus::Corrected);
    assert_eq!(record.manual_label, Some(DiseaseLabel::Septoria));
    assert_eq!(record.corrected_by_user_id, Some(reviewer));

    // The report counts the record under septoria with zero agreement
    let snapshot =
        compute_snapshot(&[record], None, None, Granularity::Day, "stub-1").unwrap();
    assert_eq!(snapshot.label_counts[&DiseaseLabel::Septoria], 1);
    assert_eq!(snapshot.label_counts[&DiseaseLabel::BrownRust], 0);
    assert_eq!(snapshot.agreement_rate, 0.0);
    assert_eq!(snapshot.total_diagnoses, 1);
    assert_eq!(snapshot.total_reviewed, 1);
}

#[test]
fn classification_is_at_most_once() {
    let classifier = StubClassifier {
        output: vec![0.87, 0.05, 0.04, 0.03, 0.01],
    };
    let prediction = classifier.classify(b"image bytes").unwrap();

    let mut record = pending_record(Uuid::new_v4());
    record_automatic(&mut record, &prediction).unwrap();

    // Second classification must be rejected, not applied twice
    let second = record_automatic(&mut record, &prediction);
    assert!(matches!(second, Err(AppError::AlreadyClassified(_))));
    assert_eq!(record.attempt_count, 1);
}

#[test]
fn correction_requires_automatic_baseline() {
    let mut record = pending_record(Uuid::new_v4());

    let result = apply_manual(&mut record, DiseaseLabel::Mildew, Uuid::new_v4());
    assert!(matches!(result, Err(AppError::NotYetClassified(_))));
    assert_eq!(record.status, DiagnosisStatus::Pending);
    assert!(record.manual_label.is_none());
}

#[test]
fn confirming_the_automatic_label_is_distinct_from_correcting() {
    let classifier = StubClassifier {
        output: vec![0.87, 0.05, 0.04, 0.03, 0.01],
    };
    let prediction = classifier.classify(b"image bytes").unwrap();
    let reviewer = Uuid::new_v4();

    let mut confirmed = pending_record(Uuid::new_v4());
    record_automatic(&mut confirmed, &prediction).unwrap();
    apply_manual(&mut confirmed, DiseaseLabel::BrownRust, reviewer).unwrap();
    assert_eq!(confirmed.status, DiagnosisStatus::Confirmed);

    let mut corrected = pending_record(Uuid::new_v4());
    record_automatic(&mut corrected, &prediction).unwrap();
    apply_manual(&mut corrected, DiseaseLabel::YellowRust, reviewer).unwrap();
    assert_eq!(corrected.status, DiagnosisStatus::Corrected);

    // One agreed, one disagreed
    let records = vec![confirmed, corrected];
    assert_eq!(agreement_rate(&records), 0.5);
}

#[test]
fn re_correction_overwrites_in_place() {
    let classifier = StubClassifier {
        output: vec![0.87, 0.05, 0.04, 0.03, 0.01],
    };
    let prediction = classifier.classify(b"image bytes").unwrap();
    let reviewer = Uuid::new_v4();

    let mut record = pending_record(Uuid::new_v4());
    record_automatic(&mut record, &prediction).unwrap();

    apply_manual(&mut record, DiseaseLabel::Septoria, reviewer).unwrap();
    assert_eq!(record.status, DiagnosisStatus::Corrected);

    // A later review back to the automatic label flips the record to Confirmed
    apply_manual(&mut record, DiseaseLabel::BrownRust, reviewer).unwrap();
    assert_eq!(record.status, DiagnosisStatus::Confirmed);
    assert_eq!(record.manual_label, Some(DiseaseLabel::BrownRust));
}
