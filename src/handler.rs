//! Transport-independent request handling.
//!
//! Every request passes the access gate first, then input validation, then
//! the prediction service. Every failure is turned into a structured response
//! here; nothing propagates to the transport as an error.

use crate::gate::{AccessGate, SessionEvent, SessionToken};
use crate::metrics::{RequestOutcome, ServiceMetrics};
use crate::service::{PredictionService, ServiceError};
use crate::store::PredictionStore;
use crate::types::prediction::{PredictionResult, RecordId, StoredPrediction};
use crate::types::request::PredictionRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Prediction request as received from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictEnvelope {
    pub session: SessionToken,
    pub request: PredictionRequest,
}

/// History request as received from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEnvelope {
    pub session: SessionToken,
}

/// Reply to a prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionResponse {
    /// Computed and saved to the user's history
    Ok {
        result: PredictionResult,
        record_id: RecordId,
    },
    /// Computed but not saved; the result will not appear in history
    NotSaved {
        result: PredictionResult,
        message: String,
    },
    ModelsUnavailable { message: String },
    InferenceFailed { message: String },
    Unauthorized { message: String },
    InvalidInput { message: String },
    BadRequest { message: String },
}

impl PredictionResponse {
    fn outcome(&self) -> Option<RequestOutcome> {
        match self {
            PredictionResponse::Ok { result, .. } => {
                Some(RequestOutcome::Served(result.predicted_light_status))
            }
            PredictionResponse::NotSaved { .. } => Some(RequestOutcome::NotSaved),
            PredictionResponse::ModelsUnavailable { .. } => Some(RequestOutcome::ModelsUnavailable),
            PredictionResponse::InferenceFailed { .. } => Some(RequestOutcome::InferenceFailed),
            PredictionResponse::Unauthorized { .. } => Some(RequestOutcome::Unauthorized),
            PredictionResponse::InvalidInput { .. } => Some(RequestOutcome::InvalidInput),
            PredictionResponse::BadRequest { .. } => None,
        }
    }
}

impl From<ServiceError> for PredictionResponse {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::ModelsUnavailable(_) => PredictionResponse::ModelsUnavailable {
                message: "Models are not loaded properly. Please contact the administrator."
                    .to_string(),
            },
            ServiceError::InferenceFailed { .. } => PredictionResponse::InferenceFailed {
                message: format!("Error during prediction: {}", e),
            },
            ServiceError::PersistenceFailed { result, ref source } => {
                PredictionResponse::NotSaved {
                    result,
                    message: format!("Prediction was computed but could not be saved: {}", source),
                }
            }
        }
    }
}

/// Reply to a history request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoryResponse {
    Ok { predictions: Vec<StoredPrediction> },
    Unauthorized { message: String },
    Unavailable { message: String },
    BadRequest { message: String },
}

const LOGIN_REQUIRED: &str = "Please log in to access this page.";

/// Routes decoded requests through gate, validation, service and store
pub struct RequestHandler {
    gate: Arc<AccessGate>,
    service: Arc<PredictionService>,
    store: Arc<dyn PredictionStore>,
    metrics: Arc<ServiceMetrics>,
}

impl RequestHandler {
    pub fn new(
        gate: Arc<AccessGate>,
        service: Arc<PredictionService>,
        store: Arc<dyn PredictionStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            gate,
            service,
            store,
            metrics,
        }
    }

    /// Handle a raw prediction payload
    pub fn handle_predict_payload(&self, payload: &[u8]) -> PredictionResponse {
        match serde_json::from_slice::<PredictEnvelope>(payload) {
            Ok(envelope) => self.handle_predict(envelope),
            Err(e) => {
                warn!(error = %e, "Failed to deserialize prediction request");
                PredictionResponse::BadRequest {
                    message: format!("Malformed request: {}", e),
                }
            }
        }
    }

    /// Handle a decoded prediction request
    pub fn handle_predict(&self, envelope: PredictEnvelope) -> PredictionResponse {
        let start_time = Instant::now();
        let response = self.predict(envelope);

        if let Some(outcome) = response.outcome() {
            self.metrics.record(outcome, start_time.elapsed());
        }
        response
    }

    fn predict(&self, envelope: PredictEnvelope) -> PredictionResponse {
        let owner = match self.gate.authorize(&envelope.session) {
            Ok(owner) => owner,
            Err(_) => {
                debug!(session = %envelope.session, "Rejected prediction request");
                return PredictionResponse::Unauthorized {
                    message: LOGIN_REQUIRED.to_string(),
                };
            }
        };

        if let Err(e) = envelope.request.validate() {
            debug!(owner = %owner, error = %e, "Invalid prediction input");
            return PredictionResponse::InvalidInput {
                message: e.to_string(),
            };
        }

        match self.service.run(&envelope.request, owner) {
            Ok(outcome) => PredictionResponse::Ok {
                result: outcome.result,
                record_id: outcome.record_id,
            },
            Err(e) => e.into(),
        }
    }

    /// Handle a raw history payload
    pub fn handle_history_payload(&self, payload: &[u8]) -> HistoryResponse {
        match serde_json::from_slice::<HistoryEnvelope>(payload) {
            Ok(envelope) => self.handle_history(envelope),
            Err(e) => {
                warn!(error = %e, "Failed to deserialize history request");
                HistoryResponse::BadRequest {
                    message: format!("Malformed request: {}", e),
                }
            }
        }
    }

    /// Handle a decoded history request
    pub fn handle_history(&self, envelope: HistoryEnvelope) -> HistoryResponse {
        let Ok(owner) = self.gate.authorize(&envelope.session) else {
            return HistoryResponse::Unauthorized {
                message: LOGIN_REQUIRED.to_string(),
            };
        };

        match self.store.history_for(owner) {
            Ok(predictions) => HistoryResponse::Ok { predictions },
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to read prediction history");
                HistoryResponse::Unavailable {
                    message: "History is temporarily unavailable.".to_string(),
                }
            }
        }
    }

    /// Apply a raw session event payload
    pub fn handle_session_payload(&self, payload: &[u8]) {
        match serde_json::from_slice::<SessionEvent>(payload) {
            Ok(event) => self.handle_session_event(event),
            Err(e) => warn!(error = %e, "Failed to deserialize session event"),
        }
    }

    /// Apply a session lifecycle event from the credential service
    pub fn handle_session_event(&self, event: SessionEvent) {
        self.gate.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{FixedClassifier, FixedRegressor};
    use crate::models::{LoadError, ModelKind, ModelRegistry};
    use crate::store::testing::FailingStore;
    use crate::store::InMemoryPredictionStore;
    use crate::types::prediction::{LightStatus, UserRef};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    struct Fixture {
        handler: RequestHandler,
        gate: Arc<AccessGate>,
        store: Arc<InMemoryPredictionStore>,
        metrics: Arc<ServiceMetrics>,
    }

    fn fixture(registry: ModelRegistry) -> Fixture {
        let gate = Arc::new(AccessGate::new(Duration::hours(1)));
        let store = Arc::new(InMemoryPredictionStore::new());
        let metrics = Arc::new(ServiceMetrics::new());
        let service = Arc::new(PredictionService::new(Arc::new(registry), store.clone()));
        let handler = RequestHandler::new(gate.clone(), service, store.clone(), metrics.clone());
        Fixture {
            handler,
            gate,
            store,
            metrics,
        }
    }

    fn envelope(session: SessionToken) -> PredictEnvelope {
        PredictEnvelope {
            session,
            request: PredictionRequest::new(30.0, 24.0, 3, 14, 2),
        }
    }

    #[test]
    fn test_authorized_prediction() {
        let f = fixture(ModelRegistry::with_models(
            FixedRegressor::new(21.456),
            FixedClassifier::new(1),
        ));
        let token = f.gate.open(UserRef(7));

        let response = f.handler.handle_predict(envelope(token));

        assert_eq!(
            response,
            PredictionResponse::Ok {
                result: PredictionResult {
                    predicted_ac_temp: 21.46,
                    predicted_light_status: LightStatus::On,
                },
                record_id: RecordId(1),
            }
        );
        assert_eq!(f.store.history_for(UserRef(7)).unwrap().len(), 1);
        assert_eq!(f.metrics.predictions_served.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unauthorized_never_reaches_models() {
        let regressor = FixedRegressor::new(21.0);
        let classifier = FixedClassifier::new(1);
        let regressor_calls = regressor.calls.clone();
        let classifier_calls = classifier.calls.clone();
        let f = fixture(ModelRegistry::with_models(regressor, classifier));

        let response = f
            .handler
            .handle_predict(envelope(SessionToken("forged".to_string())));

        assert!(matches!(response, PredictionResponse::Unauthorized { .. }));
        assert_eq!(regressor_calls.load(Ordering::SeqCst), 0);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
        assert!(f.store.is_empty());
        assert_eq!(f.metrics.unauthorized.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_logged_out_session_is_rejected() {
        let regressor = FixedRegressor::new(21.0);
        let regressor_calls = regressor.calls.clone();
        let f = fixture(ModelRegistry::with_models(regressor, FixedClassifier::new(1)));
        let token = f.gate.open(UserRef(2));
        f.gate.close(&token);

        let response = f.handler.handle_predict(envelope(token));

        assert!(matches!(response, PredictionResponse::Unauthorized { .. }));
        assert_eq!(regressor_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_input_never_reaches_models() {
        let regressor = FixedRegressor::new(21.0);
        let regressor_calls = regressor.calls.clone();
        let f = fixture(ModelRegistry::with_models(regressor, FixedClassifier::new(1)));
        let token = f.gate.open(UserRef(2));

        let response = f.handler.handle_predict(PredictEnvelope {
            session: token,
            request: PredictionRequest::new(30.0, 24.0, 3, 24, 2),
        });

        assert!(matches!(response, PredictionResponse::InvalidInput { .. }));
        assert_eq!(regressor_calls.load(Ordering::SeqCst), 0);
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_models_unavailable_response() {
        let f = fixture(ModelRegistry::new(
            Err(LoadError::NotFound {
                kind: ModelKind::Regressor,
                path: "missing.onnx".to_string(),
            }),
            Ok(Box::new(FixedClassifier::new(1))),
        ));
        let token = f.gate.open(UserRef(2));

        let response = f.handler.handle_predict(envelope(token));

        assert!(matches!(response, PredictionResponse::ModelsUnavailable { .. }));
        assert!(f.store.is_empty());
        assert_eq!(f.metrics.models_unavailable.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_not_saved_response_keeps_result() {
        let gate = Arc::new(AccessGate::new(Duration::hours(1)));
        let store = Arc::new(FailingStore::default());
        let registry =
            ModelRegistry::with_models(FixedRegressor::new(20.004), FixedClassifier::new(0));
        let service = Arc::new(PredictionService::new(Arc::new(registry), store.clone()));
        let handler =
            RequestHandler::new(gate.clone(), service, store, Arc::new(ServiceMetrics::new()));
        let token = gate.open(UserRef(9));

        let response = handler.handle_predict(envelope(token));

        match response {
            PredictionResponse::NotSaved { result, .. } => {
                assert_eq!(result.predicted_ac_temp, 20.0);
                assert_eq!(result.predicted_light_status, LightStatus::Off);
            }
            other => panic!("expected NotSaved, got {:?}", other),
        }
    }

    #[test]
    fn test_history_roundtrip() {
        let f = fixture(ModelRegistry::with_models(
            FixedRegressor::new(22.5),
            FixedClassifier::new(1),
        ));
        let alice = f.gate.open(UserRef(1));
        let bob = f.gate.open(UserRef(2));
        f.handler.handle_predict(envelope(alice.clone()));
        f.handler.handle_predict(envelope(alice.clone()));
        f.handler.handle_predict(envelope(bob));

        match f.handler.handle_history(HistoryEnvelope { session: alice }) {
            HistoryResponse::Ok { predictions } => {
                assert_eq!(predictions.len(), 2);
                assert!(predictions.iter().all(|p| p.prediction.owner == UserRef(1)));
                assert!(predictions[0].id < predictions[1].id);
            }
            other => panic!("expected history, got {:?}", other),
        }

        let response = f.handler.handle_history(HistoryEnvelope {
            session: SessionToken("anonymous".to_string()),
        });
        assert!(matches!(response, HistoryResponse::Unauthorized { .. }));
    }

    #[test]
    fn test_payload_decoding() {
        let f = fixture(ModelRegistry::with_models(
            FixedRegressor::new(22.0),
            FixedClassifier::new(0),
        ));

        let response = f.handler.handle_predict_payload(b"{not json");
        assert!(matches!(response, PredictionResponse::BadRequest { .. }));
        assert_eq!(f.metrics.total_requests(), 0);

        f.handler.handle_session_payload(
            br#"{"event":"opened","token":"t-1","user":5,"expires_at":"2999-01-01T00:00:00Z"}"#,
        );
        let response = f.handler.handle_predict_payload(
            br#"{"session":"t-1","request":{"outside_temp":30.0,"room_temp":24.0,"occupancy":3,"hour_of_day":14,"weekday":2}}"#,
        );

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"]["predicted_light_status"], "Off");
        assert_eq!(json["record_id"], 1);
    }
}
