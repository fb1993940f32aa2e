// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Core module - domain records, the safety engine and its background loops

mod engine;
mod scheduler;
mod event_bus;

pub use engine::{AssessmentOutcome, AssessmentReport, BatchSummary, SafetyEngine, SosOutcome};
pub use scheduler::Scheduler;
pub use event_bus::{EventBus, Event, EventType, EventPayload};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SafetyError};

pub type TouristId = i64;
pub type LocationId = i64;

/// Safety score, always within `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SafetyScore(u8);

impl SafetyScore {
    pub const MAX: SafetyScore = SafetyScore(100);
    pub const MIN: SafetyScore = SafetyScore(0);

    /// Build a score from any signed value, clamping into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Apply a signed adjustment, clamping the result.
    pub fn adjusted(self, delta: i64) -> Self {
        Self::clamped(self.0 as i64 + delta)
    }
}

impl Default for SafetyScore {
    fn default() -> Self {
        Self::MAX
    }
}

impl std::fmt::Display for SafetyScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered tourist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tourist {
    pub id: TouristId,
    pub name: String,
    pub safety_score: SafetyScore,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored GPS fix. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub id: LocationId,
    pub tourist_id: TouristId,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A GPS fix that has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub tourist_id: TouristId,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl NewLocation {
    pub fn new(
        tourist_id: TouristId,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            tourist_id,
            latitude,
            longitude,
            speed: None,
            altitude: None,
            accuracy: None,
            heading: None,
            timestamp,
        })
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn into_point(self, id: LocationId) -> LocationPoint {
        LocationPoint {
            id,
            tourist_id: self.tourist_id,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            altitude: self.altitude,
            accuracy: self.accuracy,
            heading: self.heading,
            timestamp: self.timestamp,
        }
    }
}

/// Reject coordinates outside the WGS84 range.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(SafetyError::InvalidInput(format!("latitude {} out of range", latitude)));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(SafetyError::InvalidInput(format!("longitude {} out of range", longitude)));
    }
    Ok(())
}

/// Engine runtime counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub assessments: u64,
    pub assessment_failures: u64,
    pub alerts_emitted: u64,
    pub sos_events: u64,
    pub last_assessment: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_score_clamps() {
        assert_eq!(SafetyScore::clamped(-15).value(), 0);
        assert_eq!(SafetyScore::clamped(140).value(), 100);
        assert_eq!(SafetyScore::clamped(64).value(), 64);
        assert_eq!(SafetyScore::clamped(20).adjusted(-40).value(), 0);
        assert_eq!(SafetyScore::clamped(98).adjusted(5).value(), 100);
    }

    #[test]
    fn test_new_location_rejects_out_of_range() {
        let now = Utc::now();
        assert!(NewLocation::new(1, 91.0, 0.0, now).is_err());
        assert!(NewLocation::new(1, 0.0, -180.5, now).is_err());
        assert!(NewLocation::new(1, f64::NAN, 0.0, now).is_err());
        assert!(NewLocation::new(1, -90.0, 180.0, now).is_ok());
    }
}
