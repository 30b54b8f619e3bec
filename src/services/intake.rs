//! Image intake: validation, durable storage, record creation.
//!
//! Bytes are written to blob storage before any handle is acknowledged
//! (write-before-acknowledge). Batch intake isolates per-item failures so
//! one bad image never aborts the rest of the batch.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::image_assets::NewImageAsset;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{Diagnosis, ImageAsset};
use crate::services::Storage;

/// MIME types accepted at intake.
pub const ALLOWED_MIME_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/gif", "image/bmp"];

/// One uploaded image, already buffered from the multipart stream.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Per-item outcome of a batch intake.
pub struct BatchItemOutcome {
    pub file_name: String,
    pub result: AppResult<(ImageAsset, Diagnosis)>,
}

/// Validate an upload against the MIME whitelist, the size limit, and the
/// actual content. The declared MIME type must agree with the sniffed
/// format; mislabeled payloads are rejected, not trusted.
pub fn validate_image(upload: &NewUpload, max_size: usize) -> AppResult<()> {
    if !ALLOWED_MIME_TYPES.contains(&upload.mime_type.as_str()) {
        return Err(AppError::InvalidFormat(format!(
            "Unsupported MIME type '{}'. Allowed: {}",
            upload.mime_type,
            ALLOWED_MIME_TYPES.join(", ")
        )));
    }

    if upload.bytes.is_empty() {
        return Err(AppError::InvalidFormat("Empty image payload".to_string()));
    }

    if upload.bytes.len() > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "Image is {} bytes, limit is {} bytes",
            upload.bytes.len(),
            max_size
        )));
    }

    let format = image::guess_format(&upload.bytes).map_err(|_| {
        AppError::InvalidFormat("Payload is not a recognizable image".to_string())
    })?;

    if format.to_mime_type() != upload.mime_type {
        return Err(AppError::InvalidFormat(format!(
            "Declared MIME type '{}' does not match content ({})",
            upload.mime_type,
            format.to_mime_type()
        )));
    }

    Ok(())
}

/// Intake a single image: validate, store bytes durably, then create the
/// asset row and its `Pending` diagnosis.
pub async fn intake_one(
    pool: &DbPool,
    storage: &Storage,
    owner_user_id: Uuid,
    upload: NewUpload,
    max_size: usize,
) -> AppResult<(ImageAsset, Diagnosis)> {
    validate_image(&upload, max_size)?;

    let image_id = Uuid::now_v7();
    let storage_key = Storage::image_key(owner_user_id, image_id, &upload.mime_type);
    let checksum_sha256 = hex::encode(Sha256::digest(&upload.bytes));
    let byte_size = upload.bytes.len() as i64;

    // Durable write first; the handle is only acknowledged once the bytes
    // are safe.
    storage
        .put(&storage_key, upload.bytes, &upload.mime_type)
        .await?;

    let asset = pool
        .insert_image_asset(NewImageAsset {
            id: image_id,
            owner_user_id,
            storage_key,
            file_name: upload.file_name,
            mime_type: upload.mime_type,
            byte_size,
            checksum_sha256,
        })
        .await?;

    let diagnosis = pool.insert_diagnosis(image_id, owner_user_id).await?;

    Ok((asset.into(), diagnosis))
}

/// Intake a batch of images independently, returning one outcome per item.
pub async fn intake_batch(
    pool: &DbPool,
    storage: &Storage,
    owner_user_id: Uuid,
    uploads: Vec<NewUpload>,
    max_size: usize,
) -> Vec<BatchItemOutcome> {
    let mut outcomes = Vec::with_capacity(uploads.len());

    for upload in uploads {
        let file_name = upload.file_name.clone();
        let result = intake_one(pool, storage, owner_user_id, upload, max_size).await;
        outcomes.push(BatchItemOutcome { file_name, result });
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    fn upload(mime: &str, bytes: &[u8]) -> NewUpload {
        NewUpload {
            file_name: "leaf.png".to_string(),
            mime_type: mime.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_accepts_whitelisted_image() {
        assert!(validate_image(&upload("image/png", PNG_MAGIC), 1024).is_ok());
        assert!(validate_image(&upload("image/jpeg", JPEG_MAGIC), 1024).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_mime() {
        let result = validate_image(&upload("application/pdf", PNG_MAGIC), 1024);
        assert!(matches!(result, Err(AppError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(2048, 0);
        let result = validate_image(&upload("image/png", &bytes), 1024);
        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    }

    #[test]
    fn test_rejects_mime_content_mismatch() {
        // PNG bytes declared as JPEG
        let result = validate_image(&upload("image/jpeg", PNG_MAGIC), 1024);
        assert!(matches!(result, Err(AppError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_unrecognizable_content() {
        let result = validate_image(&upload("image/png", b"plain text"), 1024);
        assert!(matches!(result, Err(AppError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_empty_payload() {
        let result = validate_image(&upload("image/png", b""), 1024);
        assert!(matches!(result, Err(AppError::InvalidFormat(_))));
    }
}
