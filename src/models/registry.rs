//! Process-wide holder of the two inference models

use crate::feature_encoder::{FeatureVector, FEATURE_COUNT};
use crate::models::loader::{ModelLoader, OnnxClassifier, OnnxRegressor};
use crate::models::{Classifier, LoadError, ModelError, ModelKind, Regressor};
use crate::types::prediction::RawClassLabel;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Locations of the two model artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub regressor_path: PathBuf,
    pub classifier_path: PathBuf,
}

/// A model that either loaded or is explicitly unavailable
enum ModelSlot<M: ?Sized> {
    Ready(Box<M>),
    Unavailable(LoadError),
}

impl<M: ?Sized> ModelSlot<M> {
    fn from_result(result: Result<Box<M>, LoadError>) -> Self {
        match result {
            Ok(model) => ModelSlot::Ready(model),
            Err(e) => ModelSlot::Unavailable(e),
        }
    }

    fn get(&self, kind: ModelKind) -> Result<&M, ModelError> {
        match self {
            ModelSlot::Ready(model) => Ok(model.as_ref()),
            ModelSlot::Unavailable(_) => Err(ModelError::Unavailable(kind)),
        }
    }

    fn load_error(&self) -> Option<&LoadError> {
        match self {
            ModelSlot::Ready(_) => None,
            ModelSlot::Unavailable(e) => Some(e),
        }
    }
}

/// Which models are ready to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAvailability {
    pub regressor: bool,
    pub classifier: bool,
}

impl ModelAvailability {
    pub fn all_ready(&self) -> bool {
        self.regressor && self.classifier
    }
}

/// Owns both models for the lifetime of the process.
///
/// Built once before any request is accepted and shared read-only afterwards.
/// There is no reload; a failed model stays unavailable until restart.
pub struct ModelRegistry {
    regressor: ModelSlot<dyn Regressor>,
    classifier: ModelSlot<dyn Classifier>,
}

impl ModelRegistry {
    /// Load both ONNX artifacts.
    ///
    /// Each model is loaded and self-checked independently; a failure marks
    /// only that model unavailable and is logged, it never aborts startup.
    pub fn load(paths: &ModelPaths, onnx_threads: usize) -> Self {
        let loader = ModelLoader::with_threads(onnx_threads);

        let regressor = load_regressor(&loader, &paths.regressor_path);
        if let Err(e) = &regressor {
            error!(model = %ModelKind::Regressor, error = %e, "Error loading AC temperature model");
        }

        let classifier = load_classifier(&loader, &paths.classifier_path);
        if let Err(e) = &classifier {
            error!(model = %ModelKind::Classifier, error = %e, "Error loading light status model");
        }

        let registry = Self::new(regressor, classifier);
        let availability = registry.availability();
        info!(
            regressor = availability.regressor,
            classifier = availability.classifier,
            "Model registry initialized"
        );
        registry
    }

    /// Build a registry from already-resolved load outcomes
    pub fn new(
        regressor: Result<Box<dyn Regressor>, LoadError>,
        classifier: Result<Box<dyn Classifier>, LoadError>,
    ) -> Self {
        Self {
            regressor: ModelSlot::from_result(regressor),
            classifier: ModelSlot::from_result(classifier),
        }
    }

    /// Build a registry with both models ready
    pub fn with_models(
        regressor: impl Regressor + 'static,
        classifier: impl Classifier + 'static,
    ) -> Self {
        Self::new(Ok(Box::new(regressor)), Ok(Box::new(classifier)))
    }

    /// Predict the target AC temperature
    pub fn predict_temperature(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let kind = ModelKind::Regressor;
        let value = self
            .regressor
            .get(kind)?
            .predict(features)
            .map_err(|e| inference_error(kind, e))?;

        if !value.is_finite() {
            return Err(ModelError::Inference {
                kind,
                message: format!("non-finite output {}", value),
            });
        }
        Ok(value)
    }

    /// Predict the raw light-status label
    pub fn predict_light(&self, features: &FeatureVector) -> Result<RawClassLabel, ModelError> {
        let kind = ModelKind::Classifier;
        self.classifier
            .get(kind)?
            .predict(features)
            .map_err(|e| inference_error(kind, e))
    }

    pub fn availability(&self) -> ModelAvailability {
        ModelAvailability {
            regressor: self.regressor.load_error().is_none(),
            classifier: self.classifier.load_error().is_none(),
        }
    }

    /// The error that left a model unavailable, if any
    pub fn load_error(&self, kind: ModelKind) -> Option<&LoadError> {
        match kind {
            ModelKind::Regressor => self.regressor.load_error(),
            ModelKind::Classifier => self.classifier.load_error(),
        }
    }
}

fn inference_error(kind: ModelKind, e: anyhow::Error) -> ModelError {
    ModelError::Inference {
        kind,
        message: format!("{:#}", e),
    }
}

fn ensure_exists(kind: ModelKind, path: &Path) -> Result<(), LoadError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(LoadError::NotFound {
            kind,
            path: path.display().to_string(),
        })
    }
}

fn load_regressor(loader: &ModelLoader, path: &Path) -> Result<Box<dyn Regressor>, LoadError> {
    let kind = ModelKind::Regressor;
    ensure_exists(kind, path)?;
    let model = OnnxRegressor::load(loader, path, kind.name()).map_err(|e| LoadError::Runtime {
        kind,
        message: format!("{:#}", e),
    })?;
    check_regressor(Box::new(model))
}

fn load_classifier(loader: &ModelLoader, path: &Path) -> Result<Box<dyn Classifier>, LoadError> {
    let kind = ModelKind::Classifier;
    ensure_exists(kind, path)?;
    let model = OnnxClassifier::load(loader, path, kind.name()).map_err(|e| LoadError::Runtime {
        kind,
        message: format!("{:#}", e),
    })?;
    check_classifier(Box::new(model))
}

/// Probe a freshly loaded regressor with a zeroed vector of the expected arity.
///
/// A model trained on a different number of columns rejects the probe here
/// instead of mispredicting later.
pub fn check_regressor(model: Box<dyn Regressor>) -> Result<Box<dyn Regressor>, LoadError> {
    let kind = ModelKind::Regressor;
    match model.predict(&FeatureVector::zeroed()) {
        Ok(value) if value.is_finite() => Ok(model),
        Ok(value) => Err(LoadError::SelfCheck {
            kind,
            message: format!("probe returned non-finite output {}", value),
        }),
        Err(e) => Err(LoadError::SelfCheck {
            kind,
            message: format!("probe with {} features failed: {:#}", FEATURE_COUNT, e),
        }),
    }
}

/// Probe a freshly loaded classifier with a zeroed vector of the expected arity
pub fn check_classifier(model: Box<dyn Classifier>) -> Result<Box<dyn Classifier>, LoadError> {
    match model.predict(&FeatureVector::zeroed()) {
        Ok(_) => Ok(model),
        Err(e) => Err(LoadError::SelfCheck {
            kind: ModelKind::Classifier,
            message: format!("probe with {} features failed: {:#}", FEATURE_COUNT, e),
        }),
    }
}
