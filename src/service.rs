//! End-to-end prediction for one authenticated request

use crate::feature_encoder::FeatureEncoder;
use crate::models::{ModelError, ModelKind, ModelRegistry};
use crate::store::{PredictionStore, StoreError};
use crate::types::prediction::{LightStatus, Prediction, PredictionResult, RecordId, UserRef};
use crate::types::request::PredictionRequest;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A prediction that was computed and recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionOutcome {
    pub result: PredictionResult,
    pub record_id: RecordId,
}

/// Why a prediction could not be served
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// A model failed to load at startup; an administrator must fix the deployment
    #[error("{0} is not loaded")]
    ModelsUnavailable(ModelKind),

    /// A loaded model failed while predicting
    #[error("{kind} failed during prediction: {message}")]
    InferenceFailed { kind: ModelKind, message: String },

    /// The prediction was computed but could not be recorded
    #[error("prediction computed but not saved: {source}")]
    PersistenceFailed {
        result: PredictionResult,
        source: StoreError,
    },
}

impl From<ModelError> for ServiceError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Unavailable(kind) => ServiceError::ModelsUnavailable(kind),
            ModelError::Inference { kind, message } => {
                ServiceError::InferenceFailed { kind, message }
            }
        }
    }
}

/// Round to 2 decimal places, halves away from zero (`0.125` becomes `0.13`)
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Orchestrates encode, inference on both models, interpretation and recording.
///
/// Synchronous and fail-fast: nothing is retried, and nothing is recorded
/// unless both models produced an answer.
pub struct PredictionService {
    encoder: FeatureEncoder,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn PredictionStore>,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn PredictionStore>) -> Self {
        Self {
            encoder: FeatureEncoder::new(),
            registry,
            store,
        }
    }

    /// Serve one prediction for `owner` and record it in their history
    pub fn run(
        &self,
        request: &PredictionRequest,
        owner: UserRef,
    ) -> Result<PredictionOutcome, ServiceError> {
        let features = self.encoder.encode(request);

        let raw_temp = self.registry.predict_temperature(&features).map_err(|e| {
            warn!(owner = %owner, error = %e, "Temperature prediction unavailable");
            ServiceError::from(e)
        })?;
        let raw_label = self.registry.predict_light(&features).map_err(|e| {
            warn!(owner = %owner, error = %e, "Light status prediction unavailable");
            ServiceError::from(e)
        })?;

        let result = PredictionResult {
            predicted_ac_temp: round_to_hundredths(raw_temp),
            predicted_light_status: LightStatus::from(raw_label),
        };
        debug!(
            owner = %owner,
            raw_temp = raw_temp,
            raw_label = raw_label.0,
            "Model outputs interpreted"
        );

        let prediction = Prediction::new(request, &result, owner);
        let record_id = self.store.append(prediction).map_err(|source| {
            error!(owner = %owner, error = %source, "Prediction computed but not saved");
            ServiceError::PersistenceFailed { result, source }
        })?;

        info!(
            owner = %owner,
            record_id = %record_id,
            ac_temp = result.predicted_ac_temp,
            light_status = %result.predicted_light_status,
            "Prediction served"
        );

        Ok(PredictionOutcome { result, record_id })
    }
}
