//! Migration: Create diagnoses table.
//!
//! One diagnosis per image asset. Status and label values are constrained
//! in the schema so ad-hoc writes cannot invent states.

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
                CREATE TABLE diagnoses (
                    id UUID PRIMARY KEY,
                    image_id UUID NOT NULL UNIQUE
                        REFERENCES image_assets(id) ON DELETE RESTRICT,
                    owner_user_id UUID NOT NULL,

                    automatic_label VARCHAR(20)
                        CHECK (automatic_label IN
                            ('brown_rust', 'healthy', 'mildew', 'septoria', 'yellow_rust')),
                    automatic_confidence DOUBLE PRECISION
                        CHECK (automatic_confidence >= 0.0 AND automatic_confidence <= 1.0),
                    probabilities JSONB,

                    manual_label VARCHAR(20)
                        CHECK (manual_label IN
                            ('brown_rust', 'healthy', 'mildew', 'septoria', 'yellow_rust')),
                    remark TEXT,

                    status VARCHAR(20) NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'auto_classified', 'confirmed', 'corrected')),
                    attempt_count INTEGER NOT NULL DEFAULT 0,

                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    diagnosed_at TIMESTAMPTZ,
                    corrected_at TIMESTAMPTZ,
                    corrected_by_user_id UUID,

                    -- A reviewed record always carries a manual label, and vice versa
                    CHECK ((manual_label IS NULL) = (status NOT IN ('confirmed', 'corrected'))),

                    -- Leaving pending requires the automatic baseline
                    CHECK (status = 'pending' OR
                           (automatic_label IS NOT NULL AND automatic_confidence IS NOT NULL))
                );

                -- Index for per-user listings ordered by creation time
                CREATE INDEX idx_diagnoses_owner_created_at
                    ON diagnoses(owner_user_id, created_at DESC);

                -- Index for the pending-record sweep
                CREATE INDEX idx_diagnoses_status ON diagnoses(status)
                    WHERE status = 'pending';

                -- Index for listing by creation date
                CREATE INDEX idx_diagnoses_created_at ON diagnoses(created_at DESC);

                -- Index for label filters
                CREATE INDEX idx_diagnoses_automatic_label ON diagnoses(automatic_label);
                CREATE INDEX idx_diagnoses_manual_label ON diagnoses(manual_label);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS diagnoses;")
            .await?;

        Ok(())
    }
}
