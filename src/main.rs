//! LeafScan Server - Main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware.

mod api;
mod auth;
mod config;
mod db;
mod entity;
mod error;
mod middleware;
mod migration;
mod models;
mod services;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use secrecy::SecretString;
use sea_orm_migration::MigratorTrait;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::api::ApiDoc;
use crate::auth::{IdentityClient, RemoteIdentityProvider, StaticIdentityProvider};
use crate::config::Config;
use crate::db::DbPool;
use crate::services::inference::Classifier;
use crate::services::{start_sweep_task, Storage, SweepConfig, TractClassifier};

/// Fixed user id the static dev resolver maps the dev credential to.
const DEV_USER_ID: &str = "00000000-0000-4000-8000-000000000001";

/// Perform health check (for Docker healthcheck).
async fn health_check() -> bool {
    // Simple check - just verify we can load config
    Config::from_env().is_ok()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Check for --health-check flag (used by Docker HEALTHCHECK)
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        if health_check().await {
            std::process::exit(0);
        } else {
            std::process::exit(1);
        }
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL and LEAF_IDENTITY_ENDPOINT must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  LeafScan Server");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        info!("Using development defaults for DATABASE_URL and S3 credentials");
    }

    // Load the classifier before anything else: without a model the service
    // must never declare itself ready.
    let classifier: Arc<dyn Classifier> =
        match TractClassifier::load(&config.model.path, &config.model.version) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                error!(
                    "Failed to load classifier model from {}: {}",
                    config.model.path.display(),
                    e
                );
                std::process::exit(1);
            }
        };
    info!(
        "Classifier loaded: {} ({})",
        config.model.version,
        config.model.path.display()
    );

    // Initialize database
    let pool = DbPool::connect(&config)
        .await
        .expect("Failed to connect to database");
    info!("Database connection established");

    // Run migrations
    migration::Migrator::up(pool.connection(), None)
        .await
        .expect("Failed to run migrations");
    info!("Database migrations complete");

    // Initialize S3 storage
    let storage = Storage::new(&config.s3)
        .await
        .expect("Failed to initialize S3 storage");

    // Resolve caller identity through the external provider; fall back to
    // the static dev resolver when no endpoint is configured.
    let identity = match config.identity_endpoint {
        Some(ref endpoint) => {
            info!("Using remote identity provider at {}", endpoint);
            IdentityClient::new(Arc::new(RemoteIdentityProvider::new(endpoint)))
        }
        None => {
            let key = config
                .dev_api_key
                .clone()
                .expect("Development requires LEAF_API_KEY or the built-in default");
            let dev_user = Uuid::parse_str(DEV_USER_ID).expect("DEV_USER_ID is a valid UUID");
            warn!("Using static development identity resolver");
            IdentityClient::new(Arc::new(StaticIdentityProvider::new(
                SecretString::from(key),
                dev_user,
            )))
        }
    };

    // Start the pending-diagnosis sweep
    let sweep_config = SweepConfig {
        interval_secs: if config.is_development() {
            60
        } else {
            config.sweep_interval_secs
        },
        batch_limit: config.max_images_per_batch as u64,
    };
    start_sweep_task(
        Arc::new(pool.clone()),
        storage.clone(),
        Arc::clone(&classifier),
        sweep_config,
    );
    info!("Pending-diagnosis sweep started");

    // Prepare shared state
    let bind_address = config.bind_address();
    let max_image_size = config.max_image_size;
    let max_images_per_batch = config.max_images_per_batch;
    let max_concurrent_uploads = config.max_concurrent_uploads;
    let is_development = config.is_development();

    // Create upload semaphore to limit concurrent uploads
    // This bounds memory usage: max_concurrent_uploads × batch payload size
    let upload_semaphore = Arc::new(Semaphore::new(max_concurrent_uploads));
    info!(
        "Upload limits: {}MB max image, {} per batch, {} concurrent uploads",
        max_image_size / 1024 / 1024,
        max_images_per_batch,
        max_concurrent_uploads
    );

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    let openapi = ApiDoc::openapi();

    // Start HTTP server
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = if is_development {
            // Permissive CORS for development
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::CONTENT_TYPE,
                    "X-API-Key".parse().unwrap(),
                ])
                .max_age(3600)
        } else {
            // Restrictive CORS for production (same-origin only)
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::CONTENT_TYPE,
                    "X-API-Key".parse().unwrap(),
                ])
                .max_age(3600)
        };

        App::new()
            // Add CORS middleware (must be before other middleware)
            .wrap(cors)
            // Add request logging middleware
            .wrap(middleware::RequestLogger)
            // Add shared state
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(storage.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(identity.clone()))
            .app_data(web::Data::from(Arc::clone(&classifier)))
            .app_data(web::Data::new(Arc::clone(&upload_semaphore)))
            // Whole-batch multipart allowance; per-image limits are enforced in
            // the streaming code
            .app_data(web::PayloadConfig::new(
                max_image_size * (max_images_per_batch + 1),
            ))
            // Configure API routes
            .service(
                web::scope("/api/v1")
                    .configure(api::configure_health_routes)
                    .configure(api::configure_diagnosis_routes)
                    .configure(api::configure_analytics_routes),
            )
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    });

    // Set worker count
    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}
