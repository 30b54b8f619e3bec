//! Analytics API endpoints.

use actix_web::{get, web, HttpResponse};

use crate::auth::Caller;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::{AnalyticsSnapshot, DiagnosisReportQuery, SystemReport};
use crate::services::analytics;
use crate::services::inference::Classifier;

/// Configure analytics routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(diagnosis_report).service(system_report);
}

/// Aggregate diagnosis statistics over a filtered record set.
///
/// GET /analytics/diagnosis-report
#[utoipa::path(
    get,
    path = "/api/v1/analytics/diagnosis-report",
    tag = "Analytics",
    params(DiagnosisReportQuery),
    responses(
        (status = 200, description = "Point-in-time snapshot", body = AnalyticsSnapshot),
        (status = 400, description = "Unrecognized filter field", body = crate::error::ErrorResponse)
    )
)]
#[get("/analytics/diagnosis-report")]
pub async fn diagnosis_report(
    _caller: Caller,
    pool: web::Data<DbPool>,
    classifier: web::Data<dyn Classifier>,
    query: web::Query<DiagnosisReportQuery>,
) -> AppResult<HttpResponse> {
    let snapshot = analytics::diagnosis_report(&pool, &query, classifier.version()).await?;

    Ok(HttpResponse::Ok().json(snapshot))
}

/// Live system-wide totals. Computed fresh on every call, never cached.
///
/// GET /analytics/system-report
#[utoipa::path(
    get,
    path = "/api/v1/analytics/system-report",
    tag = "Analytics",
    responses(
        (status = 200, description = "Current totals", body = SystemReport)
    )
)]
#[get("/analytics/system-report")]
pub async fn system_report(
    _caller: Caller,
    pool: web::Data<DbPool>,
    classifier: web::Data<dyn Classifier>,
) -> AppResult<HttpResponse> {
    let report = analytics::system_report(&pool, classifier.version()).await?;

    Ok(HttpResponse::Ok().json(report))
}
