// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Persistence boundary for tourists, locations, zones, assessments and alerts

mod sqlite;

pub use sqlite::{Database, DatabaseStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{LocationId, LocationPoint, NewLocation, SafetyScore, Tourist, TouristId};
use crate::detection::{Alert, Assessment, NewAlert, NewAssessment};
use crate::error::Result;
use crate::geo::Zone;
use crate::models::ModelType;

/// Filter for a tourist's location history. Results are ascending by
/// timestamp and hold at most `limit` of the most recent matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            since: None,
            before: None,
            limit,
        }
    }

    pub fn up_to(before: DateTime<Utc>, limit: usize) -> Self {
        Self {
            since: None,
            before: Some(before),
            limit,
        }
    }
}

/// Location row joined with its tourist's context, as used for training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub point: LocationPoint,
    pub safety_score: SafetyScore,
    pub active_alerts: u32,
}

/// Result of a committed assessment bundle
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedAssessment {
    pub assessment: Assessment,
    pub alerts: Vec<Alert>,
}

/// Store consumed by the engine and the model lifecycle.
///
/// Missing tourists or locations surface as [`crate::SafetyError::NotFound`];
/// any failure of the backing store surfaces as [`crate::SafetyError::Store`].
#[async_trait]
pub trait SafetyStore: Send + Sync {
    async fn get_zones(&self, active_only: bool) -> Result<Vec<Zone>>;

    async fn get_recent_locations(&self, tourist_id: TouristId, query: HistoryQuery) -> Result<Vec<LocationPoint>>;

    async fn get_tourist(&self, id: TouristId) -> Result<Tourist>;

    async fn get_location(&self, id: LocationId) -> Result<LocationPoint>;

    async fn insert_tourist(&self, name: &str) -> Result<Tourist>;

    async fn insert_zone(&self, zone: &Zone) -> Result<Zone>;

    async fn insert_location(&self, location: &NewLocation) -> Result<LocationPoint>;

    async fn update_tourist_safety_score(&self, id: TouristId, score: SafetyScore) -> Result<()>;

    async fn insert_assessment(&self, assessment: &NewAssessment) -> Result<Assessment>;

    async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert>;

    /// Assessment insert, tourist score update, alert inserts and removal of
    /// the location's claim in one transaction. Nothing is written if any
    /// step fails.
    async fn commit_assessment(&self, assessment: &NewAssessment, alerts: &[NewAlert]) -> Result<CommittedAssessment>;

    /// Score update and panic alert in one transaction.
    async fn commit_sos(&self, tourist_id: TouristId, score: SafetyScore, alert: &NewAlert) -> Result<Alert>;

    /// Most recent `limit` locations of the trailing `days_back` days,
    /// ascending by timestamp.
    async fn get_training_window(&self, model_type: ModelType, days_back: u32, limit: usize) -> Result<Vec<TrainingRow>>;

    /// Locations stored since `since` with no assessment and no live claim.
    /// Claims taken before `stale_before` count as abandoned.
    async fn unassessed_locations(
        &self,
        since: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LocationPoint>>;

    /// Atomically claim a location for assessment, taking over a claim older
    /// than `stale_before`. `false` when another worker holds a live claim or
    /// the location is already assessed.
    async fn claim_location(&self, id: LocationId, stale_before: DateTime<Utc>) -> Result<bool>;

    /// Give a claim back after a failed assessment so it can be retried.
    async fn release_claim(&self, id: LocationId) -> Result<()>;

    async fn get_assessment_for_location(&self, location_id: LocationId) -> Result<Option<Assessment>>;

    async fn get_alerts(&self, tourist_id: TouristId) -> Result<Vec<Alert>>;
}
