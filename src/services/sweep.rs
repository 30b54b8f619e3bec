//! Background sweep that classifies records left in `Pending`.
//!
//! Plain uploads create records without classifying them; this task picks
//! them up on an interval. It goes through the same compare-and-set path as
//! on-demand classification, so racing with a concurrent `diagnose` call is
//! harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::db::DbPool;
use crate::services::diagnosis::classify_pending;
use crate::services::inference::Classifier;
use crate::services::Storage;

/// Configuration for the sweep task.
#[derive(Clone)]
pub struct SweepConfig {
    /// How often to run, in seconds
    pub interval_secs: u64,
    /// Maximum records classified per run
    pub batch_limit: u64,
}

/// Start the sweep background task.
pub fn start_sweep_task(
    pool: Arc<DbPool>,
    storage: Storage,
    classifier: Arc<dyn Classifier>,
    config: SweepConfig,
) {
    tokio::spawn(async move {
        info!(
            "Starting pending-diagnosis sweep (interval: {} seconds, batch: {})",
            config.interval_secs, config.batch_limit
        );

        let mut ticker = interval(Duration::from_secs(config.interval_secs));

        loop {
            ticker.tick().await;

            match classify_pending(&pool, &storage, &classifier, config.batch_limit).await {
                Ok(outcome) => {
                    if outcome.classified > 0 || outcome.failed > 0 {
                        info!(
                            "Sweep: {} classified, {} skipped, {} failed",
                            outcome.classified, outcome.skipped, outcome.failed
                        );
                    }
                }
                Err(e) => error!("Sweep task error: {}", e),
            }
        }
    });
}
