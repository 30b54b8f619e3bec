//! Domain models for the LeafScan server.

use utoipa::ToSchema;

pub mod analytics;
pub mod diagnosis;
pub mod filters;
pub mod image_asset;
pub mod label;

// Re-export commonly used types
pub use analytics::{AnalyticsSnapshot, ConfusionMatrix, Granularity, SystemReport, TrendBucket};
pub use diagnosis::{Diagnosis, DiagnosisStatus};
pub use filters::{DiagnosisFilter, DiagnosisReportQuery, ListDiagnosesQuery};
pub use image_asset::ImageAsset;
pub use label::DiseaseLabel;

/// Pagination metadata returned with list responses.
#[derive(Debug, Clone, serde::Serialize, ToSchema)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(limit as u64)
        };
        Pagination {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_rounds_up() {
        let p = Pagination::new(1, 20, 41);
        assert_eq!(p.total_pages, 3);

        let p = Pagination::new(1, 20, 40);
        assert_eq!(p.total_pages, 2);

        let p = Pagination::new(1, 20, 0);
        assert_eq!(p.total_pages, 0);
    }
}
