//! Diagnosis orchestration: runs the classifier and hands the result to the
//! record store.

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::Diagnosis;
use crate::services::inference::Classifier;
use crate::services::Storage;

/// Classify one image and record the result on its `Pending` diagnosis.
///
/// Inference is CPU-bound and runs on the blocking pool so it never stalls
/// the reactor. The record store's compare-and-set guard makes the handoff
/// at-most-once: if another caller classified the record in the meantime,
/// this surfaces `AlreadyClassified` instead of overwriting. A failed
/// classification leaves the record `Pending` with its attempt counter
/// bumped, never silently stuck.
pub async fn classify_and_record(
    pool: &DbPool,
    classifier: &Arc<dyn Classifier>,
    diagnosis_id: Uuid,
    image_bytes: Vec<u8>,
) -> AppResult<Diagnosis> {
    let model = Arc::clone(classifier);
    let outcome = tokio::task::spawn_blocking(move || model.classify(&image_bytes))
        .await
        .map_err(|e| AppError::Inference(format!("Inference task panicked: {}", e)))?;

    let prediction = match outcome {
        Ok(prediction) => prediction,
        Err(e) => {
            // Keep the attempt visible for the caller-layer retry policy
            if let Err(attempt_err) = pool.record_classification_attempt(diagnosis_id).await {
                warn!(
                    "Failed to record attempt on diagnosis {}: {}",
                    diagnosis_id, attempt_err
                );
            }
            return Err(e);
        }
    };

    pool.record_automatic(
        diagnosis_id,
        prediction.label,
        prediction.confidence,
        &prediction.probabilities,
    )
    .await
}

/// Outcome of one pending-record sweep.
#[derive(Debug, Default, serde::Serialize, utoipa::ToSchema)]
pub struct SweepOutcome {
    /// Records that received an automatic classification
    pub classified: usize,
    /// Records that raced with a concurrent classification and were left alone
    pub skipped: usize,
    /// Records whose classification failed; they stay Pending
    pub failed: usize,
}

/// Classify every record still `Pending`, up to `limit`, isolating per-record
/// failures the same way batch intake does.
pub async fn classify_pending(
    pool: &DbPool,
    storage: &Storage,
    classifier: &Arc<dyn Classifier>,
    limit: u64,
) -> AppResult<SweepOutcome> {
    let pending = pool.list_pending_with_images(limit).await?;
    let mut outcome = SweepOutcome::default();

    for (diagnosis, asset) in pending {
        let Some(asset) = asset else {
            warn!("Diagnosis {} has no image asset, skipping", diagnosis.id);
            outcome.failed += 1;
            continue;
        };

        let bytes = match storage.get(&asset.storage_key).await {
            Ok((bytes, _)) => bytes,
            Err(e) => {
                warn!(
                    "Cannot fetch image {} for diagnosis {}: {}",
                    asset.storage_key, diagnosis.id, e
                );
                outcome.failed += 1;
                continue;
            }
        };

        match classify_and_record(pool, classifier, diagnosis.id, bytes).await {
            Ok(_) => outcome.classified += 1,
            Err(AppError::AlreadyClassified(_)) => outcome.skipped += 1,
            Err(e) => {
                warn!("Classification failed for diagnosis {}: {}", diagnosis.id, e);
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}
