//! Image asset domain model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::image_asset as entity;

/// A stored leaf image. Immutable once written; deletion belongs to an
/// out-of-scope retention job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImageAsset {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    /// S3 object key holding the raw bytes
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    /// SHA-256 digest of the raw bytes, hex-encoded
    pub checksum_sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<entity::Model> for ImageAsset {
    fn from(m: entity::Model) -> Self {
        ImageAsset {
            id: m.id,
            owner_user_id: m.owner_user_id,
            storage_key: m.storage_key,
            file_name: m.file_name,
            mime_type: m.mime_type,
            byte_size: m.byte_size,
            checksum_sha256: m.checksum_sha256,
            uploaded_at: m.uploaded_at,
        }
    }
}
