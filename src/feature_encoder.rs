//! Feature encoding for climate model inference.
//!
//! Both exported models were trained on the same five columns. Their order is
//! not recorded in the ONNX artifacts, so [`FEATURE_NAMES`] is the one place it
//! is written down; the encoder and the registry's load-time probe both use it.

use crate::types::request::PredictionRequest;

/// Number of features both models expect
pub const FEATURE_COUNT: usize = 5;

/// Feature names in the exact column order used during training
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "outside_temp",
    "room_temp",
    "occupancy",
    "hour_of_day",
    "weekday",
];

/// Fixed-length model input, ordered as [`FEATURE_NAMES`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    /// All-zero vector, used to probe freshly loaded models
    pub fn zeroed() -> Self {
        Self([0.0; FEATURE_COUNT])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of a named feature
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<f32> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|idx| self.0[idx])
    }
}

/// Encoder that turns validated requests into model input vectors.
pub struct FeatureEncoder;

impl FeatureEncoder {
    /// Create a new feature encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode a request.
    ///
    /// Total for any well-typed request; ranges are not re-checked here.
    pub fn encode(&self, req: &PredictionRequest) -> FeatureVector {
        FeatureVector([
            req.outside_temp as f32,
            req.room_temp as f32,
            req.occupancy as f32,
            req.hour_of_day as f32,
            req.weekday as f32,
        ])
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Get feature names in encoding order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self::new()
    }
}
