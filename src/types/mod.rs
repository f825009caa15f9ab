//! Type definitions for the climate prediction service

pub mod prediction;
pub mod request;

pub use prediction::{
    LightStatus, Prediction, PredictionResult, RawClassLabel, RecordId, StoredPrediction, UserRef,
};
pub use request::{PredictionRequest, ValidationError};
