//! Diagnosis API endpoints: uploads, classification, manual review, listing.

use actix_multipart::Multipart;
use actix_web::{get, post, put, web, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Caller;
use crate::config::Config;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{Diagnosis, DiseaseLabel, ImageAsset, ListDiagnosesQuery, Pagination};
use crate::services::diagnosis::{classify_and_record, classify_pending, SweepOutcome};
use crate::services::inference::Classifier;
use crate::services::intake::{intake_batch, intake_one, NewUpload};
use crate::services::Storage;

/// Hard cap on page size for listings.
const MAX_PAGE_LIMIT: u32 = 100;
const DEFAULT_PAGE_LIMIT: u32 = 50;

// ============================================================================
// Response types
// ============================================================================

/// A stored image with its freshly created diagnosis record.
#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub image: ImageAsset,
    pub diagnosis: Diagnosis,
}

/// An image rejected during batch intake.
#[derive(Serialize, ToSchema)]
pub struct RejectedImage {
    pub file_name: String,
    pub reason: String,
    /// Whether the failure was transient (storage) rather than the image's fault
    pub retryable: bool,
}

/// Batch intake outcome: per-item results, never all-or-nothing.
#[derive(Serialize, ToSchema)]
pub struct BatchUploadResponse {
    pub accepted: Vec<UploadResponse>,
    pub rejected: Vec<RejectedImage>,
    pub message: String,
}

/// Diagnosis list response.
#[derive(Serialize, ToSchema)]
pub struct ListDiagnosesResponse {
    pub diagnoses: Vec<Diagnosis>,
    pub pagination: Pagination,
}

/// Manual review request body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ManualDiagnosisRequest {
    pub label: DiseaseLabel,
    /// Optional reviewer note
    pub remark: Option<String>,
}

// ============================================================================
// Route configuration
// ============================================================================

/// Configure diagnosis routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(upload_image)
        .service(upload_images)
        .service(diagnose_on_upload)
        .service(classify_pending_now)
        .service(update_manual_diagnosis)
        .service(list_diagnoses)
        .service(get_diagnosis_image);
}

// ============================================================================
// Multipart intake helpers
// ============================================================================

/// Buffer image fields from a multipart stream.
///
/// A field that exceeds `max_size` is drained and reported as rejected
/// instead of aborting the stream, preserving batch partial-failure
/// semantics. At most `max_count` files are buffered; extras are rejected.
async fn read_uploads(
    payload: &mut Multipart,
    max_size: usize,
    max_count: usize,
) -> AppResult<(Vec<NewUpload>, Vec<RejectedImage>)> {
    let mut uploads = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = payload.next().await {
        let mut field = field
            .map_err(|e| AppError::InvalidInput(format!("Malformed multipart payload: {}", e)))?;

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("unnamed")
            .to_string();

        let mime_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if uploads.len() >= max_count {
            rejected.push(RejectedImage {
                file_name,
                reason: format!("Batch limit of {} images exceeded", max_count),
                retryable: false,
            });
            // Drain the remaining chunks so the stream stays consumable
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| {
                    AppError::InvalidInput(format!("Malformed multipart payload: {}", e))
                })?;
            }
            continue;
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut oversized = false;

        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| {
                AppError::InvalidInput(format!("Malformed multipart payload: {}", e))
            })?;

            if oversized {
                continue; // keep draining, stop buffering
            }
            if bytes.len() + chunk.len() > max_size {
                oversized = true;
                bytes.clear();
                continue;
            }
            bytes.extend_from_slice(&chunk);
        }

        if oversized {
            rejected.push(RejectedImage {
                file_name,
                reason: format!("Image exceeds the {} byte limit", max_size),
                retryable: false,
            });
            continue;
        }

        uploads.push(NewUpload {
            file_name,
            mime_type,
            bytes,
        });
    }

    Ok((uploads, rejected))
}

/// Read exactly one image from a multipart stream.
async fn read_single_upload(payload: &mut Multipart, max_size: usize) -> AppResult<NewUpload> {
    let (mut uploads, rejected) = read_uploads(payload, max_size, 2).await?;

    if uploads.len() + rejected.len() > 1 {
        return Err(AppError::InvalidInput(
            "Expected exactly one image file, got several".to_string(),
        ));
    }

    if let Some(first) = rejected.into_iter().next() {
        return Err(AppError::PayloadTooLarge(first.reason));
    }

    uploads.pop().ok_or_else(|| {
        AppError::InvalidInput("Expected one image file in the request".to_string())
    })
}

fn rejected_from_error(file_name: String, error: &AppError) -> RejectedImage {
    RejectedImage {
        file_name,
        reason: error.to_string(),
        retryable: matches!(
            error,
            AppError::Storage(_) | AppError::ServiceUnavailable(_)
        ),
    }
}

// ============================================================================
// Upload endpoints
// ============================================================================

/// Upload a single image; its diagnosis stays Pending until classified.
///
/// POST /diagnosis/upload-image
#[utoipa::path(
    post,
    path = "/api/v1/diagnosis/upload-image",
    tag = "Diagnosis",
    request_body(content_type = "multipart/form-data", description = "One image file"),
    responses(
        (status = 201, description = "Image stored, diagnosis pending", body = UploadResponse),
        (status = 400, description = "Invalid image", body = crate::error::ErrorResponse),
        (status = 413, description = "Image too large", body = crate::error::ErrorResponse),
        (status = 503, description = "Storage unavailable", body = crate::error::ErrorResponse)
    )
)]
#[post("/diagnosis/upload-image")]
pub async fn upload_image(
    caller: Caller,
    mut payload: Multipart,
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
    upload_semaphore: web::Data<Arc<Semaphore>>,
) -> AppResult<HttpResponse> {
    let _permit = acquire_upload_permit(&upload_semaphore)?;

    let upload = read_single_upload(&mut payload, config.max_image_size).await?;

    let (image, diagnosis) = intake_one(
        &pool,
        &storage,
        caller.user_id,
        upload,
        config.max_image_size,
    )
    .await?;

    info!("Image {} intaken for user {}", image.id, caller.user_id);

    Ok(HttpResponse::Created().json(UploadResponse { image, diagnosis }))
}

/// Upload a batch of images; each item succeeds or fails on its own.
///
/// POST /diagnosis/upload-images
#[utoipa::path(
    post,
    path = "/api/v1/diagnosis/upload-images",
    tag = "Diagnosis",
    request_body(content_type = "multipart/form-data", description = "Image files"),
    responses(
        (status = 201, description = "Per-item intake outcomes", body = BatchUploadResponse),
        (status = 503, description = "Too many concurrent uploads", body = crate::error::ErrorResponse)
    )
)]
#[post("/diagnosis/upload-images")]
pub async fn upload_images(
    caller: Caller,
    mut payload: Multipart,
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
    upload_semaphore: web::Data<Arc<Semaphore>>,
) -> AppResult<HttpResponse> {
    let _permit = acquire_upload_permit(&upload_semaphore)?;

    let (uploads, mut rejected) = read_uploads(
        &mut payload,
        config.max_image_size,
        config.max_images_per_batch,
    )
    .await?;

    let outcomes = intake_batch(
        &pool,
        &storage,
        caller.user_id,
        uploads,
        config.max_image_size,
    )
    .await;

    let mut accepted = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok((image, diagnosis)) => accepted.push(UploadResponse { image, diagnosis }),
            Err(e) => rejected.push(rejected_from_error(outcome.file_name, &e)),
        }
    }

    info!(
        "Batch intake for user {}: {} accepted, {} rejected",
        caller.user_id,
        accepted.len(),
        rejected.len()
    );

    let message = format!(
        "{} images stored, {} rejected",
        accepted.len(),
        rejected.len()
    );

    Ok(HttpResponse::Created().json(BatchUploadResponse {
        accepted,
        rejected,
        message,
    }))
}

/// Upload one image and classify it in the same call.
///
/// POST /diagnosis/diagnose-on-upload
///
/// If classification fails the image and its Pending record survive with a
/// visible attempt count; the sweep (or a retry) picks them up later.
#[utoipa::path(
    post,
    path = "/api/v1/diagnosis/diagnose-on-upload",
    tag = "Diagnosis",
    request_body(content_type = "multipart/form-data", description = "One image file"),
    responses(
        (status = 201, description = "Image stored and classified", body = UploadResponse),
        (status = 400, description = "Invalid or undecodable image", body = crate::error::ErrorResponse),
        (status = 503, description = "Storage unavailable", body = crate::error::ErrorResponse)
    )
)]
#[post("/diagnosis/diagnose-on-upload")]
pub async fn diagnose_on_upload(
    caller: Caller,
    mut payload: Multipart,
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    classifier: web::Data<dyn Classifier>,
    config: web::Data<Config>,
    upload_semaphore: web::Data<Arc<Semaphore>>,
) -> AppResult<HttpResponse> {
    let _permit = acquire_upload_permit(&upload_semaphore)?;

    let upload = read_single_upload(&mut payload, config.max_image_size).await?;
    let image_bytes = upload.bytes.clone();

    let (image, diagnosis) = intake_one(
        &pool,
        &storage,
        caller.user_id,
        upload,
        config.max_image_size,
    )
    .await?;

    let model = classifier.clone().into_inner();
    let diagnosis = classify_and_record(&pool, &model, diagnosis.id, image_bytes).await?;

    info!(
        "Image {} classified as {} ({:.3}) for user {}",
        image.id,
        diagnosis
            .automatic_label
            .map(|l| l.as_str())
            .unwrap_or("unknown"),
        diagnosis.automatic_confidence.unwrap_or_default(),
        caller.user_id
    );

    Ok(HttpResponse::Created().json(UploadResponse { image, diagnosis }))
}

/// Classify all records still Pending, on demand.
///
/// POST /diagnosis/classify-pending
#[utoipa::path(
    post,
    path = "/api/v1/diagnosis/classify-pending",
    tag = "Diagnosis",
    responses(
        (status = 200, description = "Sweep outcome", body = SweepOutcome)
    )
)]
#[post("/diagnosis/classify-pending")]
pub async fn classify_pending_now(
    _caller: Caller,
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    classifier: web::Data<dyn Classifier>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    let model = classifier.clone().into_inner();
    let outcome = classify_pending(
        &pool,
        &storage,
        &model,
        config.max_images_per_batch as u64,
    )
    .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

// ============================================================================
// Review and listing endpoints
// ============================================================================

/// Apply a manual diagnosis to a classified record.
///
/// PUT /diagnosis/{id}/manual
#[utoipa::path(
    put,
    path = "/api/v1/diagnosis/{id}/manual",
    tag = "Diagnosis",
    params(("id" = Uuid, Path, description = "Diagnosis UUID")),
    request_body = ManualDiagnosisRequest,
    responses(
        (status = 200, description = "Updated record", body = Diagnosis),
        (status = 404, description = "Diagnosis not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Record has no automatic baseline", body = crate::error::ErrorResponse)
    )
)]
#[put("/diagnosis/{id}/manual")]
pub async fn update_manual_diagnosis(
    caller: Caller,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    body: web::Json<ManualDiagnosisRequest>,
) -> AppResult<HttpResponse> {
    let id = Uuid::parse_str(&path.into_inner())?;
    let request = body.into_inner();

    let diagnosis = pool
        .apply_manual_correction(id, request.label, caller.user_id, request.remark)
        .await?;

    info!(
        "Diagnosis {} reviewed as {} ({}) by user {}",
        id,
        request.label,
        diagnosis.status,
        caller.user_id
    );

    Ok(HttpResponse::Ok().json(diagnosis))
}

/// List diagnoses, filtered and paged, newest first.
///
/// GET /diagnosis
#[utoipa::path(
    get,
    path = "/api/v1/diagnosis",
    tag = "Diagnosis",
    params(ListDiagnosesQuery),
    responses(
        (status = 200, description = "Matching diagnoses", body = ListDiagnosesResponse),
        (status = 400, description = "Unrecognized filter field", body = crate::error::ErrorResponse)
    )
)]
#[get("/diagnosis")]
pub async fn list_diagnoses(
    _caller: Caller,
    pool: web::Data<DbPool>,
    query: web::Query<ListDiagnosesQuery>,
) -> AppResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let (diagnoses, total) = pool.list_diagnoses(&query.filter(), page, limit).await?;

    Ok(HttpResponse::Ok().json(ListDiagnosesResponse {
        diagnoses,
        pagination: Pagination::new(page, limit, total),
    }))
}

/// Fetch the raw image bytes behind a diagnosis.
///
/// GET /diagnosis/{id}/image
#[utoipa::path(
    get,
    path = "/api/v1/diagnosis/{id}/image",
    tag = "Diagnosis",
    params(("id" = Uuid, Path, description = "Diagnosis UUID")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "Diagnosis or image not found", body = crate::error::ErrorResponse)
    )
)]
#[get("/diagnosis/{id}/image")]
pub async fn get_diagnosis_image(
    _caller: Caller,
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = Uuid::parse_str(&path.into_inner())?;

    let diagnosis = pool
        .get_diagnosis(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Diagnosis {}", id)))?;

    let asset = pool
        .get_image_asset(diagnosis.image_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Image {}", diagnosis.image_id)))?;

    let (bytes, content_type) = storage.get(&asset.storage_key).await?;

    Ok(HttpResponse::Ok()
        .content_type(content_type.unwrap_or(asset.mime_type))
        .body(bytes))
}

// ============================================================================
// Helpers
// ============================================================================

/// Acquire an upload permit, bounding peak memory to
/// `max_concurrent_uploads × max_image_size`.
fn acquire_upload_permit(semaphore: &Semaphore) -> AppResult<tokio::sync::SemaphorePermit<'_>> {
    semaphore.try_acquire().map_err(|_| {
        warn!("Upload rejected: too many concurrent uploads");
        AppError::ServiceUnavailable(
            "Too many concurrent uploads. Please try again later.".to_string(),
        )
    })
}
