//! Business logic services.

pub mod analytics;
pub mod diagnosis;
pub mod inference;
pub mod intake;
pub mod storage;
pub mod sweep;

pub use inference::{Classifier, Prediction, TractClassifier};
pub use storage::Storage;
pub use sweep::{start_sweep_task, SweepConfig};
