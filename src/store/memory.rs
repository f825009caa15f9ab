//! In-process prediction store

use crate::store::{clamp_timestamp, PredictionStore, StoreError};
use crate::types::prediction::{Prediction, RecordId, StoredPrediction, UserRef};
use std::sync::RwLock;

/// Prediction store kept in memory; contents are lost on restart
#[derive(Default)]
pub struct InMemoryPredictionStore {
    records: RwLock<Vec<StoredPrediction>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all users
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PredictionStore for InMemoryPredictionStore {
    fn append(&self, mut prediction: Prediction) -> Result<RecordId, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::WriteFailed(format!("Lock error: {}", e)))?;

        clamp_timestamp(&mut prediction, records.last().map(|r| r.prediction.timestamp));
        let id = RecordId(records.len() as u64 + 1);
        records.push(StoredPrediction { id, prediction });
        Ok(id)
    }

    fn history_for(&self, owner: UserRef) -> Result<Vec<StoredPrediction>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadFailed(format!("Lock error: {}", e)))?;

        Ok(records
            .iter()
            .filter(|r| r.prediction.owner == owner)
            .cloned()
            .collect())
    }
}
