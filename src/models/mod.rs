//! ML model loading and inference components

pub mod loader;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use crate::feature_encoder::FeatureVector;
use crate::types::prediction::RawClassLabel;
use std::fmt;
use thiserror::Error;

pub use loader::{ModelLoader, OnnxClassifier, OnnxRegressor};
pub use registry::{ModelAvailability, ModelPaths, ModelRegistry};

/// The two models the service serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Target AC temperature regressor
    Regressor,
    /// Light status classifier
    Classifier,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Regressor => "ac_temperature_regressor",
            ModelKind::Classifier => "light_status_classifier",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Regression model producing the target AC temperature
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<f64>;
}

/// Classification model producing the raw light-status label
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<RawClassLabel>;
}

/// Why a model could not be loaded at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("{kind} artifact not found at {path}")]
    NotFound { kind: ModelKind, path: String },

    #[error("failed to load {kind} artifact: {message}")]
    Runtime { kind: ModelKind, message: String },

    #[error("{kind} failed its startup self-check: {message}")]
    SelfCheck { kind: ModelKind, message: String },
}

/// Failure of a single inference call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{0} is not loaded")]
    Unavailable(ModelKind),

    #[error("{kind} inference failed: {message}")]
    Inference { kind: ModelKind, message: String },
}
