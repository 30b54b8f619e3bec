//! Diagnosis entity for SeaORM.
//!
//! One row per image asset. Status transitions go through guarded
//! compare-and-set updates in `db::diagnoses`; nothing else writes `status`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "diagnoses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub image_id: Uuid,
    pub owner_user_id: Uuid,

    // Automatic prediction, set once by record_automatic
    pub automatic_label: Option<String>,
    pub automatic_confidence: Option<f64>,
    pub probabilities: Option<Json>,

    // Human review
    pub manual_label: Option<String>,
    pub remark: Option<String>,

    pub status: String,
    pub attempt_count: i32,

    // Audit timestamps
    pub created_at: DateTimeUtc,
    pub diagnosed_at: Option<DateTimeUtc>,
    pub corrected_at: Option<DateTimeUtc>,
    pub corrected_by_user_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::image_asset::Entity",
        from = "Column::ImageId",
        to = "super::image_asset::Column::Id",
        on_delete = "Restrict"
    )]
    ImageAsset,
}

impl Related<super::image_asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImageAsset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
