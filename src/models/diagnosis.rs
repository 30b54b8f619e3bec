//! Diagnosis domain model and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::diagnosis as entity;
use crate::error::{AppError, AppResult};
use crate::models::DiseaseLabel;

/// Diagnosis record status.
///
/// Transitions: `Pending -> AutoClassified -> {Confirmed | Corrected}`.
/// `Confirmed` and `Corrected` are re-correctable in place; there is no
/// deletion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStatus {
    /// Image intaken, not yet classified
    Pending,
    /// Automatic prediction recorded, not yet reviewed
    AutoClassified,
    /// Reviewed; the human agreed with the automatic label
    Confirmed,
    /// Reviewed; the human overrode the automatic label
    Corrected,
}

impl DiagnosisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoClassified => "auto_classified",
            Self::Confirmed => "confirmed",
            Self::Corrected => "corrected",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(Self::Pending),
            "auto_classified" => Ok(Self::AutoClassified),
            "confirmed" => Ok(Self::Confirmed),
            "corrected" => Ok(Self::Corrected),
            other => Err(AppError::InvalidInput(format!(
                "Unknown diagnosis status: {}",
                other
            ))),
        }
    }

    /// Classification is at-most-once: only a Pending record may receive
    /// an automatic prediction.
    pub fn can_record_automatic(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Manual review requires an automatic baseline; Confirmed/Corrected
    /// records may be re-reviewed.
    pub fn can_apply_manual(&self) -> bool {
        matches!(self, Self::AutoClassified | Self::Confirmed | Self::Corrected)
    }

    /// Whether a human has looked at this record.
    pub fn is_reviewed(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Corrected)
    }

    /// Resolve the status a manual review lands in: Confirmed when the
    /// reviewer agrees with the automatic label, Corrected otherwise.
    pub fn resolve_review(automatic: DiseaseLabel, manual: DiseaseLabel) -> Self {
        if automatic == manual {
            Self::Confirmed
        } else {
            Self::Corrected
        }
    }

    /// Statuses a manual review may transition from.
    pub const REVIEWABLE: [DiagnosisStatus; 3] =
        [Self::AutoClassified, Self::Confirmed, Self::Corrected];
}

impl std::fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A diagnosis record: one per image, automatic prediction plus optional
/// human override.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Diagnosis {
    pub id: Uuid,
    pub image_id: Uuid,
    pub owner_user_id: Uuid,
    /// Automatic prediction; present once status leaves Pending
    pub automatic_label: Option<DiseaseLabel>,
    /// Maximum class probability of the automatic prediction
    pub automatic_confidence: Option<f64>,
    /// Full probability vector of the automatic prediction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<BTreeMap<DiseaseLabel, f64>>,
    /// Human override; present iff status is Confirmed or Corrected
    pub manual_label: Option<DiseaseLabel>,
    pub status: DiagnosisStatus,
    /// Visible classification attempt counter for the caller-layer retry policy
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub diagnosed_at: Option<DateTime<Utc>>,
    pub corrected_at: Option<DateTime<Utc>>,
    pub corrected_by_user_id: Option<Uuid>,
}

impl Diagnosis {
    /// The label analytics counts this record under: the human override
    /// when present, the automatic prediction otherwise.
    pub fn effective_label(&self) -> Option<DiseaseLabel> {
        self.manual_label.or(self.automatic_label)
    }

    /// For reviewed records, whether the human agreed with the classifier.
    pub fn agrees(&self) -> Option<bool> {
        if !self.status.is_reviewed() {
            return None;
        }
        match (self.automatic_label, self.manual_label) {
            (Some(auto), Some(manual)) => Some(auto == manual),
            _ => None,
        }
    }

    /// Convert a database row into the domain model.
    pub fn from_entity(m: entity::Model) -> AppResult<Self> {
        let probabilities = match m.probabilities {
            Some(value) => Some(parse_probabilities(&value)?),
            None => None,
        };

        Ok(Diagnosis {
            id: m.id,
            image_id: m.image_id,
            owner_user_id: m.owner_user_id,
            automatic_label: m
                .automatic_label
                .as_deref()
                .map(DiseaseLabel::parse)
                .transpose()?,
            automatic_confidence: m.automatic_confidence,
            probabilities,
            manual_label: m
                .manual_label
                .as_deref()
                .map(DiseaseLabel::parse)
                .transpose()?,
            status: DiagnosisStatus::parse(&m.status)?,
            attempt_count: m.attempt_count,
            remark: m.remark,
            created_at: m.created_at,
            diagnosed_at: m.diagnosed_at,
            corrected_at: m.corrected_at,
            corrected_by_user_id: m.corrected_by_user_id,
        })
    }
}

fn parse_probabilities(value: &serde_json::Value) -> AppResult<BTreeMap<DiseaseLabel, f64>> {
    let object = value
        .as_object()
        .ok_or_else(|| AppError::Database("probabilities column is not an object".to_string()))?;

    let mut map = BTreeMap::new();
    for (key, prob) in object {
        let label = DiseaseLabel::parse(key)
            .map_err(|_| AppError::Database(format!("Unknown label in probabilities: {}", key)))?;
        let prob = prob.as_f64().ok_or_else(|| {
            AppError::Database(format!("Non-numeric probability for label {}", key))
        })?;
        map.insert(label, prob);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_automatic_allowed_only_from_pending() {
        assert!(DiagnosisStatus::Pending.can_record_automatic());
        assert!(!DiagnosisStatus::AutoClassified.can_record_automatic());
        assert!(!DiagnosisStatus::Confirmed.can_record_automatic());
        assert!(!DiagnosisStatus::Corrected.can_record_automatic());
    }

    #[test]
    fn test_manual_review_requires_automatic_baseline() {
        assert!(!DiagnosisStatus::Pending.can_apply_manual());
        assert!(DiagnosisStatus::AutoClassified.can_apply_manual());
        // Reviewed records are re-correctable
        assert!(DiagnosisStatus::Confirmed.can_apply_manual());
        assert!(DiagnosisStatus::Corrected.can_apply_manual());
    }

    #[test]
    fn test_review_resolution() {
        assert_eq!(
            DiagnosisStatus::resolve_review(DiseaseLabel::Septoria, DiseaseLabel::Septoria),
            DiagnosisStatus::Confirmed
        );
        assert_eq!(
            DiagnosisStatus::resolve_review(DiseaseLabel::BrownRust, DiseaseLabel::Septoria),
            DiagnosisStatus::Corrected
        );
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            DiagnosisStatus::Pending,
            DiagnosisStatus::AutoClassified,
            DiagnosisStatus::Confirmed,
            DiagnosisStatus::Corrected,
        ] {
            assert_eq!(DiagnosisStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DiagnosisStatus::parse("classified").is_err());
    }

    fn reviewed(auto: DiseaseLabel, manual: DiseaseLabel) -> Diagnosis {
        Diagnosis {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            automatic_label: Some(auto),
            automatic_confidence: Some(0.9),
            probabilities: None,
            manual_label: Some(manual),
            status: DiagnosisStatus::resolve_review(auto, manual),
            attempt_count: 1,
            remark: None,
            created_at: Utc::now(),
            diagnosed_at: Some(Utc::now()),
            corrected_at: Some(Utc::now()),
            corrected_by_user_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_effective_label_prefers_manual() {
        let record = reviewed(DiseaseLabel::BrownRust, DiseaseLabel::Septoria);
        assert_eq!(record.effective_label(), Some(DiseaseLabel::Septoria));
        assert_eq!(record.agrees(), Some(false));

        let record = reviewed(DiseaseLabel::Mildew, DiseaseLabel::Mildew);
        assert_eq!(record.effective_label(), Some(DiseaseLabel::Mildew));
        assert_eq!(record.agrees(), Some(true));
    }
}
