//! Migration: Create image_assets table.
//!
//! One row per stored leaf image; immutable after insert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE image_assets (
                    id UUID PRIMARY KEY,
                    owner_user_id UUID NOT NULL,

                    storage_key TEXT NOT NULL UNIQUE,
                    file_name TEXT NOT NULL,
                    mime_type VARCHAR(50) NOT NULL,
                    byte_size BIGINT NOT NULL CHECK (byte_size > 0),
                    checksum_sha256 CHAR(64) NOT NULL,

                    uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                -- Index for per-user listings
                CREATE INDEX idx_image_assets_owner ON image_assets(owner_user_id);

                -- Index for retention scans
                CREATE INDEX idx_image_assets_uploaded_at ON image_assets(uploaded_at);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS image_assets;")
            .await?;

        Ok(())
    }
}
