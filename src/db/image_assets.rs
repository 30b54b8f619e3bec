//! Database queries for image assets.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, QuerySelect, Set};
use uuid::Uuid;

use crate::entity::image_asset::{self, ActiveModel, Entity as ImageAsset};
use crate::error::{AppError, AppResult};

/// Fields of a new image asset row; `uploaded_at` is stamped here.
#[derive(Debug, Clone)]
pub struct NewImageAsset {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub checksum_sha256: String,
}

impl super::DbPool {
    /// Insert a new image asset.
    pub async fn insert_image_asset(&self, asset: NewImageAsset) -> AppResult<image_asset::Model> {
        let model = ActiveModel {
            id: Set(asset.id),
            owner_user_id: Set(asset.owner_user_id),
            storage_key: Set(asset.storage_key),
            file_name: Set(asset.file_name),
            mime_type: Set(asset.mime_type),
            byte_size: Set(asset.byte_size),
            checksum_sha256: Set(asset.checksum_sha256),
            uploaded_at: Set(Utc::now()),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert image asset: {}", e)))?;

        Ok(result)
    }

    /// Get an image asset by ID.
    pub async fn get_image_asset(&self, id: Uuid) -> AppResult<Option<image_asset::Model>> {
        let result = ImageAsset::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get image asset: {}", e)))?;

        Ok(result)
    }

    /// Count all stored images.
    pub async fn count_images(&self) -> AppResult<u64> {
        let count = ImageAsset::find()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count images: {}", e)))?;

        Ok(count)
    }

    /// Count distinct owners across all stored images.
    pub async fn count_image_owners(&self) -> AppResult<u64> {
        let count: Option<i64> = ImageAsset::find()
            .select_only()
            .column_as(Expr::cust("COUNT(DISTINCT owner_user_id)"), "count")
            .into_tuple()
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count image owners: {}", e)))?;

        Ok(count.unwrap_or(0) as u64)
    }
}
