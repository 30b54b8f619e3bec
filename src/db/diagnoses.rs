//! Database queries for diagnosis records.
//!
//! Status transitions are compare-and-set updates filtered on the expected
//! source status: a transition succeeds only if the row is still in a state
//! the state machine allows, so concurrent writers can never interleave a
//! record into an invalid state. Zero rows affected means the guard failed.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ExprTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entity::{diagnosis, image_asset};
use crate::error::{AppError, AppResult};
use crate::models::{Diagnosis, DiagnosisFilter, DiagnosisStatus, DiseaseLabel};

impl super::DbPool {
    /// Create a new diagnosis record in `Pending` state, 1:1 with an image.
    pub async fn insert_diagnosis(&self, image_id: Uuid, owner_user_id: Uuid) -> AppResult<Diagnosis> {
        let model = diagnosis::ActiveModel {
            id: Set(Uuid::now_v7()),
            image_id: Set(image_id),
            owner_user_id: Set(owner_user_id),
            automatic_label: Set(None),
            automatic_confidence: Set(None),
            probabilities: Set(None),
            manual_label: Set(None),
            remark: Set(None),
            status: Set(DiagnosisStatus::Pending.as_str().to_string()),
            attempt_count: Set(0),
            created_at: Set(Utc::now()),
            diagnosed_at: Set(None),
            corrected_at: Set(None),
            corrected_by_user_id: Set(None),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert diagnosis: {}", e)))?;

        Diagnosis::from_entity(result)
    }

    /// Get a diagnosis by ID.
    pub async fn get_diagnosis(&self, id: Uuid) -> AppResult<Option<Diagnosis>> {
        let result = diagnosis::Entity::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get diagnosis: {}", e)))?;

        result.map(Diagnosis::from_entity).transpose()
    }

    /// Get the diagnosis attached to an image.
    pub async fn get_diagnosis_by_image(&self, image_id: Uuid) -> AppResult<Option<Diagnosis>> {
        let result = diagnosis::Entity::find()
            .filter(diagnosis::Column::ImageId.eq(image_id))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get diagnosis: {}", e)))?;

        result.map(Diagnosis::from_entity).transpose()
    }

    /// Record the automatic classification on a `Pending` record.
    ///
    /// Classification is at-most-once: the update is guarded on
    /// `status = 'pending'`, and a record that already left `Pending`
    /// surfaces `AlreadyClassified` instead of being overwritten.
    pub async fn record_automatic(
        &self,
        id: Uuid,
        label: DiseaseLabel,
        confidence: f64,
        probabilities: &BTreeMap<DiseaseLabel, f64>,
    ) -> AppResult<Diagnosis> {
        let probabilities_json = serde_json::to_value(probabilities)?;

        let result = diagnosis::Entity::update_many()
            .col_expr(
                diagnosis::Column::Status,
                Expr::value(DiagnosisStatus::AutoClassified.as_str()),
            )
            .col_expr(diagnosis::Column::AutomaticLabel, Expr::value(label.as_str()))
            .col_expr(diagnosis::Column::AutomaticConfidence, Expr::value(confidence))
            .col_expr(diagnosis::Column::Probabilities, Expr::value(probabilities_json))
            .col_expr(diagnosis::Column::DiagnosedAt, Expr::value(Utc::now()))
            .col_expr(
                diagnosis::Column::AttemptCount,
                Expr::col(diagnosis::Column::AttemptCount).add(1),
            )
            .filter(diagnosis::Column::Id.eq(id))
            .filter(diagnosis::Column::Status.eq(DiagnosisStatus::Pending.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to record classification: {}", e)))?;

        if result.rows_affected == 0 {
            return match self.get_diagnosis(id).await? {
                None => Err(AppError::NotFound(format!("Diagnosis {}", id))),
                Some(_) => Err(AppError::AlreadyClassified(id)),
            };
        }

        self.get_diagnosis(id)
            .await?
            .ok_or_else(|| AppError::Database(format!("Diagnosis {} vanished after update", id)))
    }

    /// Record a failed classification attempt, leaving the record `Pending`.
    ///
    /// Keeps the attempt counter visible so the caller layer can bound its
    /// retries.
    pub async fn record_classification_attempt(&self, id: Uuid) -> AppResult<()> {
        diagnosis::Entity::update_many()
            .col_expr(
                diagnosis::Column::AttemptCount,
                Expr::col(diagnosis::Column::AttemptCount).add(1),
            )
            .filter(diagnosis::Column::Id.eq(id))
            .filter(diagnosis::Column::Status.eq(DiagnosisStatus::Pending.as_str()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to record attempt: {}", e)))?;

        Ok(())
    }

    /// Apply a manual review to a classified record.
    ///
    /// Allowed from `AutoClassified`, `Confirmed` or `Corrected` (reviews
    /// overwrite in place); a `Pending` record has no baseline to review and
    /// fails with `NotYetClassified`. The landed status is `Confirmed` when
    /// the reviewer agrees with the automatic label, `Corrected` otherwise.
    pub async fn apply_manual_correction(
        &self,
        id: Uuid,
        label: DiseaseLabel,
        by_user_id: Uuid,
        remark: Option<String>,
    ) -> AppResult<Diagnosis> {
        let current = self
            .get_diagnosis(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Diagnosis {}", id)))?;

        if !current.status.can_apply_manual() {
            return Err(AppError::NotYetClassified(id));
        }

        let automatic = current.automatic_label.ok_or_else(|| {
            AppError::Database(format!("Diagnosis {} is classified but has no label", id))
        })?;

        let target = DiagnosisStatus::resolve_review(automatic, label);
        let reviewable: Vec<&str> = DiagnosisStatus::REVIEWABLE
            .iter()
            .map(|s| s.as_str())
            .collect();

        let mut update = diagnosis::Entity::update_many()
            .col_expr(diagnosis::Column::Status, Expr::value(target.as_str()))
            .col_expr(diagnosis::Column::ManualLabel, Expr::value(label.as_str()))
            .col_expr(diagnosis::Column::CorrectedAt, Expr::value(Utc::now()))
            .col_expr(
                diagnosis::Column::CorrectedByUserId,
                Expr::value(by_user_id),
            )
            .filter(diagnosis::Column::Id.eq(id))
            .filter(diagnosis::Column::Status.is_in(reviewable));

        if let Some(remark) = remark {
            update = update.col_expr(diagnosis::Column::Remark, Expr::value(remark));
        }

        let result = update
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to apply correction: {}", e)))?;

        if result.rows_affected == 0 {
            // The guard can only fail if the record disappeared between the
            // read and the update; Pending was already rejected above.
            return Err(AppError::NotFound(format!("Diagnosis {}", id)));
        }

        self.get_diagnosis(id)
            .await?
            .ok_or_else(|| AppError::Database(format!("Diagnosis {} vanished after update", id)))
    }

    /// List diagnoses matching a filter, newest first, with offset pagination.
    /// Returns the page and the total match count.
    pub async fn list_diagnoses(
        &self,
        filter: &DiagnosisFilter,
        page: u32,
        limit: u32,
    ) -> AppResult<(Vec<Diagnosis>, u64)> {
        let select = apply_filter(diagnosis::Entity::find(), filter);

        let total = select
            .clone()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count diagnoses: {}", e)))?;

        let offset = (page.saturating_sub(1) as u64) * limit as u64;
        let rows = select
            .order_by_desc(diagnosis::Column::CreatedAt)
            .offset(offset)
            .limit(limit as u64)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list diagnoses: {}", e)))?;

        let diagnoses = rows
            .into_iter()
            .map(Diagnosis::from_entity)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((diagnoses, total))
    }

    /// Fetch every diagnosis matching a filter, oldest first.
    ///
    /// Feeds the analytics aggregator, which computes over the full matching
    /// set at call time (no cache).
    pub async fn fetch_diagnoses_for_report(
        &self,
        filter: &DiagnosisFilter,
    ) -> AppResult<Vec<Diagnosis>> {
        let rows = apply_filter(diagnosis::Entity::find(), filter)
            .order_by_asc(diagnosis::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch diagnoses: {}", e)))?;

        rows.into_iter().map(Diagnosis::from_entity).collect()
    }

    /// Fetch pending diagnoses together with their image assets, oldest first.
    pub async fn list_pending_with_images(
        &self,
        limit: u64,
    ) -> AppResult<Vec<(diagnosis::Model, Option<image_asset::Model>)>> {
        let rows = diagnosis::Entity::find()
            .filter(diagnosis::Column::Status.eq(DiagnosisStatus::Pending.as_str()))
            .order_by_asc(diagnosis::Column::CreatedAt)
            .limit(limit)
            .find_also_related(image_asset::Entity)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list pending diagnoses: {}", e)))?;

        Ok(rows)
    }

    /// Count all diagnosis records.
    pub async fn count_diagnoses(&self) -> AppResult<u64> {
        let count = diagnosis::Entity::find()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count diagnoses: {}", e)))?;

        Ok(count)
    }

    /// Count distinct users owning at least one diagnosis.
    pub async fn count_diagnosis_owners(&self) -> AppResult<u64> {
        let count: Option<i64> = diagnosis::Entity::find()
            .select_only()
            .column_as(Expr::cust("COUNT(DISTINCT owner_user_id)"), "count")
            .into_tuple()
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count diagnosis owners: {}", e)))?;

        Ok(count.unwrap_or(0) as u64)
    }
}

/// Apply a `DiagnosisFilter` to a select. Label filters match the effective
/// label: the manual override when present, the automatic prediction
/// otherwise.
fn apply_filter(
    mut select: sea_orm::Select<diagnosis::Entity>,
    filter: &DiagnosisFilter,
) -> sea_orm::Select<diagnosis::Entity> {
    if let Some(owner) = filter.owner_user_id {
        select = select.filter(diagnosis::Column::OwnerUserId.eq(owner));
    }

    if let Some(ref labels) = filter.label_in {
        let names: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
        select = select.filter(
            Expr::expr(Expr::cust("COALESCE(manual_label, automatic_label)")).is_in(names),
        );
    }

    if let Some(status) = filter.status {
        select = select.filter(diagnosis::Column::Status.eq(status.as_str()));
    }

    if let Some(from) = filter.date_from {
        select = select.filter(diagnosis::Column::CreatedAt.gte(from));
    }

    if let Some(to) = filter.date_to {
        select = select.filter(diagnosis::Column::CreatedAt.lt(to));
    }

    select
}
