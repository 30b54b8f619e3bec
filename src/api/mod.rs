//! API endpoint modules.

pub mod analytics;
pub mod diagnosis;
pub mod health;
pub mod openapi;

pub use analytics::configure_routes as configure_analytics_routes;
pub use diagnosis::configure_routes as configure_diagnosis_routes;
pub use health::configure_health_routes;
pub use openapi::ApiDoc;
