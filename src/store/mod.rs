//! Append-only persistence of served predictions

pub mod jsonl;
pub mod memory;

use crate::types::prediction::{Prediction, RecordId, StoredPrediction, UserRef};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use jsonl::JsonlPredictionStore;
pub use memory::InMemoryPredictionStore;

/// Storage failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("failed to open prediction store at {path}: {message}")]
    Open { path: String, message: String },

    #[error("failed to write prediction: {0}")]
    WriteFailed(String),

    #[error("failed to read predictions: {0}")]
    ReadFailed(String),
}

/// Append-only store of predictions, scoped by owner.
///
/// Records are never updated or deleted. Each append is atomic: concurrent
/// appends never interleave or lose records, and timestamps never decrease
/// in append order.
pub trait PredictionStore: Send + Sync {
    /// Durably record a prediction and return its new identifier
    fn append(&self, prediction: Prediction) -> Result<RecordId, StoreError>;

    /// All predictions of `owner`, oldest first (append order)
    fn history_for(&self, owner: UserRef) -> Result<Vec<StoredPrediction>, StoreError>;
}

/// Move a timestamp taken before the store lock up to the latest one recorded.
///
/// Requests stamped concurrently can reach the lock out of order; history
/// is append-ordered, so the later append must not carry the earlier time.
pub(crate) fn clamp_timestamp(prediction: &mut Prediction, latest: Option<DateTime<Utc>>) {
    if let Some(latest) = latest {
        if prediction.timestamp < latest {
            prediction.timestamp = latest;
        }
    }
}
