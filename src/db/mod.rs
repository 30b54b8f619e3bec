//! Database module providing connection management and queries.

pub mod diagnoses;
pub mod image_assets;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Database connection pool wrapper around SeaORM's `DatabaseConnection`.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect to PostgreSQL using the configured URL.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let mut options = ConnectOptions::new(&config.database_url);
        options
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(DbPool { conn })
    }

    /// Get access to the underlying connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}
