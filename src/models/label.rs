//! The fixed five-way disease taxonomy.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Disease label assigned to a leaf image.
///
/// The set is fixed; the classifier is trained against exactly these five
/// classes and the record store rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseLabel {
    BrownRust,
    Healthy,
    Mildew,
    Septoria,
    YellowRust,
}

impl DiseaseLabel {
    /// All labels in lexicographic order of their wire names.
    /// Arg-max tie-breaking depends on this ordering.
    pub const ALL: [DiseaseLabel; 5] = [
        Self::BrownRust,
        Self::Healthy,
        Self::Mildew,
        Self::Septoria,
        Self::YellowRust,
    ];

    /// Labels in the classifier's output index order.
    pub const MODEL_OUTPUT_ORDER: [DiseaseLabel; 5] = [
        Self::BrownRust,
        Self::YellowRust,
        Self::Septoria,
        Self::Healthy,
        Self::Mildew,
    ];

    /// Get label name as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrownRust => "brown_rust",
            Self::Healthy => "healthy",
            Self::Mildew => "mildew",
            Self::Septoria => "septoria",
            Self::YellowRust => "yellow_rust",
        }
    }

    /// Parse a label from its wire name.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "brown_rust" => Ok(Self::BrownRust),
            "healthy" => Ok(Self::Healthy),
            "mildew" => Ok(Self::Mildew),
            "septoria" => Ok(Self::Septoria),
            "yellow_rust" => Ok(Self::YellowRust),
            other => Err(AppError::InvalidInput(format!(
                "Unknown disease label: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DiseaseLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DiseaseLabel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_lexicographically_sorted() {
        let names: Vec<&str> = DiseaseLabel::ALL.iter().map(|l| l.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_parse_round_trip() {
        for label in DiseaseLabel::ALL {
            assert_eq!(DiseaseLabel::parse(label.as_str()).unwrap(), label);
        }
        assert!(DiseaseLabel::parse("rust").is_err());
    }

    #[test]
    fn test_serde_wire_names() {
        let json = serde_json::to_string(&DiseaseLabel::BrownRust).unwrap();
        assert_eq!(json, "\"brown_rust\"");
        let back: DiseaseLabel = serde_json::from_str("\"yellow_rust\"").unwrap();
        assert_eq!(back, DiseaseLabel::YellowRust);
    }
}
