//! In-process model doubles for unit tests

use crate::feature_encoder::FeatureVector;
use crate::models::{Classifier, Regressor};
use crate::types::prediction::RawClassLabel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Regressor returning a fixed value and counting its calls
pub struct FixedRegressor {
    pub value: f64,
    pub calls: Arc<AtomicUsize>,
}

impl FixedRegressor {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Regressor for FixedRegressor {
    fn predict(&self, _features: &FeatureVector) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value)
    }
}

/// Classifier returning a fixed label and counting its calls
pub struct FixedClassifier {
    pub label: i64,
    pub calls: Arc<AtomicUsize>,
}

impl FixedClassifier {
    pub fn new(label: i64) -> Self {
        Self {
            label,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Classifier for FixedClassifier {
    fn predict(&self, _features: &FeatureVector) -> anyhow::Result<RawClassLabel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawClassLabel(self.label))
    }
}

/// Regressor whose runtime always errors
pub struct BrokenRegressor;

impl Regressor for BrokenRegressor {
    fn predict(&self, _features: &FeatureVector) -> anyhow::Result<f64> {
        anyhow::bail!("input arity mismatch")
    }
}

/// Regressor echoing one feature back, to observe what the registry was given
pub struct EchoRegressor {
    pub index: usize,
}

impl Regressor for EchoRegressor {
    fn predict(&self, features: &FeatureVector) -> anyhow::Result<f64> {
        Ok(features.as_slice()[self.index] as f64)
    }
}
