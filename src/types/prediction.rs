//! Prediction results and persisted prediction records

use crate::types::request::PredictionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of the user a prediction belongs to.
///
/// Issued by the credential collaborator; the core only compares and stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRef(pub u64);

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Store-assigned identifier of a persisted prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class label exactly as emitted by the light-status classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawClassLabel(pub i64);

/// Lighting state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightStatus {
    On,
    Off,
}

impl From<RawClassLabel> for LightStatus {
    /// Label `1` means the lights should be on; every other label means off.
    fn from(label: RawClassLabel) -> Self {
        if label.0 == 1 {
            LightStatus::On
        } else {
            LightStatus::Off
        }
    }
}

impl fmt::Display for LightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightStatus::On => write!(f, "On"),
            LightStatus::Off => write!(f, "Off"),
        }
    }
}

/// Interpreted output of both models for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Target AC temperature (°C), rounded to 2 decimal places
    pub predicted_ac_temp: f64,
    /// Predicted lighting state
    pub predicted_light_status: LightStatus,
}

/// A served prediction as it is recorded in a user's history.
///
/// Created once per successful inference and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// User the prediction was served to
    pub owner: UserRef,

    pub outside_temp: f64,
    pub room_temp: f64,
    pub occupancy: u32,
    pub hour_of_day: u8,
    pub weekday: u8,

    pub predicted_ac_temp: f64,
    pub predicted_light_status: LightStatus,

    /// Creation time (server clock), never earlier than the store's previous record
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    /// Build a record from the request, its result and the owning user, stamped now
    pub fn new(request: &PredictionRequest, result: &PredictionResult, owner: UserRef) -> Self {
        Self {
            owner,
            outside_temp: request.outside_temp,
            room_temp: request.room_temp,
            occupancy: request.occupancy,
            hour_of_day: request.hour_of_day,
            weekday: request.weekday,
            predicted_ac_temp: result.predicted_ac_temp,
            predicted_light_status: result.predicted_light_status,
            timestamp: Utc::now(),
        }
    }

    /// The interpreted result part of the record
    pub fn result(&self) -> PredictionResult {
        PredictionResult {
            predicted_ac_temp: self.predicted_ac_temp,
            predicted_light_status: self.predicted_light_status,
        }
    }
}

/// A prediction together with the identifier the store assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub id: RecordId,
    #[serde(flatten)]
    pub prediction: Prediction,
}
