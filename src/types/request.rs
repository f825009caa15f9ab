//! Prediction request submitted by an authenticated user

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accepted temperature range in °C (inclusive), for both outside and room readings
pub const TEMPERATURE_RANGE: (f64, f64) = (-50.0, 50.0);

/// Maximum accepted number of people in the room
pub const MAX_OCCUPANCY: u32 = 100;

/// Environmental readings for one prediction.
///
/// The prediction core trusts these values to be in range; the transport
/// calls [`PredictionRequest::validate`] before handing a request over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Outside temperature (°C)
    pub outside_temp: f64,

    /// Room temperature (°C)
    pub room_temp: f64,

    /// Number of people in the room
    pub occupancy: u32,

    /// Hour of the day (0-23)
    pub hour_of_day: u8,

    /// Day of the week (0 = Monday, 6 = Sunday)
    pub weekday: u8,
}

/// Input rejected before it reaches the prediction core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}°C, got {value}")]
    Temperature {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("occupancy must be between 0 and {max}, got {value}")]
    Occupancy { max: u32, value: u32 },

    #[error("hour_of_day must be between 0 and 23, got {0}")]
    HourOfDay(u8),

    #[error("weekday must be between 0 (Monday) and 6 (Sunday), got {0}")]
    Weekday(u8),
}

impl PredictionRequest {
    /// Create a new request
    pub fn new(
        outside_temp: f64,
        room_temp: f64,
        occupancy: u32,
        hour_of_day: u8,
        weekday: u8,
    ) -> Self {
        Self {
            outside_temp,
            room_temp,
            occupancy,
            hour_of_day,
            weekday,
        }
    }

    /// Check every field against its documented range
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_temperature("outside_temp", self.outside_temp)?;
        check_temperature("room_temp", self.room_temp)?;

        if self.occupancy > MAX_OCCUPANCY {
            return Err(ValidationError::Occupancy {
                max: MAX_OCCUPANCY,
                value: self.occupancy,
            });
        }
        if self.hour_of_day > 23 {
            return Err(ValidationError::HourOfDay(self.hour_of_day));
        }
        if self.weekday > 6 {
            return Err(ValidationError::Weekday(self.weekday));
        }

        Ok(())
    }
}

fn check_temperature(field: &'static str, value: f64) -> Result<(), ValidationError> {
    let (min, max) = TEMPERATURE_RANGE;
    // NaN fails both comparisons, so test for containment rather than exclusion
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::Temperature {
            field,
            min,
            max,
            value,
        })
    }
}
