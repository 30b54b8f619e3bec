//! Image asset entity for SeaORM.
//!
//! Immutable once inserted; rows are only removed by the retention job.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "image_assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_user_id: Uuid,

    // Blob location and file info
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub checksum_sha256: String,

    pub uploaded_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::diagnosis::Entity")]
    Diagnosis,
}

impl Related<super::diagnosis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Diagnosis.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
