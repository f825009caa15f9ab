//! Smart Climate Prediction Service
//!
//! Serves session-gated predictions from two pre-trained models: a regressor
//! for the target air-conditioning temperature and a classifier for the
//! lighting state. Every prediction served is recorded in the requesting
//! user's history.

pub mod config;
pub mod consumer;
pub mod feature_encoder;
pub mod gate;
pub mod handler;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod service;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use feature_encoder::{FeatureEncoder, FeatureVector, FEATURE_NAMES};
pub use gate::{AccessGate, SessionEvent, SessionToken, Unauthorized};
pub use handler::{PredictionResponse, RequestHandler};
pub use models::registry::ModelRegistry;
pub use producer::ReplyPublisher;
pub use service::{PredictionOutcome, PredictionService, ServiceError};
pub use store::{InMemoryPredictionStore, JsonlPredictionStore, PredictionStore, StoreError};
pub use types::{LightStatus, Prediction, PredictionRequest, PredictionResult, UserRef};
