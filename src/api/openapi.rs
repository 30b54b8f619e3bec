//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models, services};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "LeafScan Server",
        version = "0.3.0",
        description = "API server for wheat leaf disease diagnosis: image intake, automatic classification, manual review and aggregate reporting"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::health,
        api::health::ready,
        // Diagnosis endpoints
        api::diagnosis::upload_image,
        api::diagnosis::upload_images,
        api::diagnosis::diagnose_on_upload,
        api::diagnosis::classify_pending_now,
        api::diagnosis::update_manual_diagnosis,
        api::diagnosis::list_diagnoses,
        api::diagnosis::get_diagnosis_image,
        // Analytics endpoints
        api::analytics::diagnosis_report,
        api::analytics::system_report,
    ),
    components(schemas(
        error::ErrorResponse,
        models::DiseaseLabel,
        models::DiagnosisStatus,
        models::Diagnosis,
        models::ImageAsset,
        models::Pagination,
        models::AnalyticsSnapshot,
        models::ConfusionMatrix,
        models::Granularity,
        models::SystemReport,
        models::TrendBucket,
        api::diagnosis::UploadResponse,
        api::diagnosis::RejectedImage,
        api::diagnosis::BatchUploadResponse,
        api::diagnosis::ListDiagnosesResponse,
        api::diagnosis::ManualDiagnosisRequest,
        services::diagnosis::SweepOutcome,
    )),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Diagnosis", description = "Image intake, classification and review"),
        (name = "Analytics", description = "Aggregate reporting")
    )
)]
pub struct ApiDoc;
