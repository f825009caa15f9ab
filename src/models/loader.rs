//! ONNX model loader

use crate::feature_encoder::FeatureVector;
use crate::models::{Classifier, Regressor};
use crate::types::prediction::RawClassLabel;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Model name
    pub name: String,
    /// ONNX Runtime session (running a session needs exclusive access)
    session: Mutex<Session>,
    /// Input name for the model
    pub input_name: String,
    /// Output name holding the prediction
    pub output_name: String,
}

impl LoadedModel {
    /// Run the model on one feature vector and hand the outputs to `extract`
    fn run<T>(
        &self,
        features: &FeatureVector,
        extract: impl FnOnce(&SessionOutputs, &str) -> Result<T>,
    ) -> Result<T> {
        // Prepare input tensor - shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor = Tensor::from_array((shape, features.as_slice().to_vec()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_tensor])
            .with_context(|| format!("Failed to run model {}", self.name))?;

        extract(&outputs, self.output_name.as_str())
    }
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Load a single ONNX model from file.
    ///
    /// `preferred_output` names the output to read; when the graph has no
    /// output of that name, the first output whose name contains it is used,
    /// then the first output.
    pub fn load_model<P: AsRef<Path>>(
        &self,
        path: P,
        name: &str,
        preferred_output: &str,
    ) -> Result<LoadedModel> {
        let path = path.as_ref();

        info!(
            model = %name,
            path = %path.display(),
            threads = self.onnx_threads,
            "Loading ONNX model"
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name == preferred_output)
            .or_else(|| {
                session
                    .outputs
                    .iter()
                    .find(|o| o.name.contains(preferred_output))
            })
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| preferred_output.to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Regressor exported from scikit-learn, output `variable` of shape [1, 1]
pub struct OnnxRegressor(LoadedModel);

impl OnnxRegressor {
    pub const OUTPUT: &'static str = "variable";

    pub fn load<P: AsRef<Path>>(loader: &ModelLoader, path: P, name: &str) -> Result<Self> {
        loader.load_model(path, name, Self::OUTPUT).map(Self)
    }
}

impl Regressor for OnnxRegressor {
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self.0.run(features, |outputs, output_name| {
            let output = outputs
                .get(output_name)
                .with_context(|| format!("Missing output {}", output_name))?;
            let (_, data) = output.try_extract_tensor::<f32>()?;
            let value = data
                .first()
                .copied()
                .context("Regressor returned an empty tensor")?;

            debug!(model = %self.0.name, value = value, "Extracted regression output");
            Ok(value as f64)
        })
    }
}

/// Classifier exported from scikit-learn, output `output_label` holding class labels
pub struct OnnxClassifier(LoadedModel);

impl OnnxClassifier {
    pub const OUTPUT: &'static str = "output_label";

    pub fn load<P: AsRef<Path>>(loader: &ModelLoader, path: P, name: &str) -> Result<Self> {
        loader.load_model(path, name, Self::OUTPUT).map(Self)
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<RawClassLabel> {
        self.0.run(features, |outputs, output_name| {
            let output = outputs
                .get(output_name)
                .with_context(|| format!("Missing output {}", output_name))?;

            // Integer labels are the usual export; some converters emit floats
            if let Ok((_, data)) = output.try_extract_tensor::<i64>() {
                let label = data
                    .first()
                    .copied()
                    .context("Classifier returned an empty label tensor")?;
                return Ok(RawClassLabel(label));
            }

            let (_, data) = output.try_extract_tensor::<f32>()?;
            let value = data
                .first()
                .copied()
                .context("Classifier returned an empty label tensor")?;
            if value.fract() != 0.0 {
                anyhow::bail!("Classifier label {} is not an integer", value);
            }
            Ok(RawClassLabel(value as i64))
        })
    }
}
