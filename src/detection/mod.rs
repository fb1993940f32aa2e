// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Detection module - score fusion, severity classification and alerts

mod fusion;
mod routing;

pub use fusion::*;
pub use routing::*;

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{LocationId, SafetyScore, TouristId};

/// Severity tier derived from the safety score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyTier {
    Safe,
    Warning,
    Critical,
}

impl SafetyTier {
    /// `>= 80` safe, `50..80` warning, below 50 critical.
    pub fn from_score(score: SafetyScore) -> Self {
        match score.value() {
            80..=100 => SafetyTier::Safe,
            50..=79 => SafetyTier::Warning,
            _ => SafetyTier::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::Safe => "SAFE",
            SafetyTier::Warning => "WARNING",
            SafetyTier::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SAFE" => Some(SafetyTier::Safe),
            "WARNING" => Some(SafetyTier::Warning),
            "CRITICAL" => Some(SafetyTier::Critical),
            _ => None,
        }
    }

    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            SafetyTier::Safe => &["Continue enjoying your trip safely!"],
            SafetyTier::Warning => &[
                "Stay alert and avoid isolated areas",
                "Keep emergency contacts updated",
                "Consider returning to safe zones",
            ],
            SafetyTier::Critical => &[
                "IMMEDIATE ACTION REQUIRED",
                "Contact emergency services if needed",
                "Move to nearest safe location",
                "Notify emergency contacts",
            ],
        }
    }

    /// First three recommendations joined into one line.
    pub fn recommended_action(&self) -> String {
        self.recommendations()
            .iter()
            .take(3)
            .copied()
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl std::fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Panic,
    Geofence,
    Anomaly,
    Temporal,
    LowSafetyScore,
    Sos,
    Manual,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Panic => "panic",
            AlertType::Geofence => "geofence",
            AlertType::Anomaly => "anomaly",
            AlertType::Temporal => "temporal",
            AlertType::LowSafetyScore => "low_safety_score",
            AlertType::Sos => "sos",
            AlertType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "panic" => Some(AlertType::Panic),
            "geofence" => Some(AlertType::Geofence),
            "anomaly" => Some(AlertType::Anomaly),
            "temporal" => Some(AlertType::Temporal),
            "low_safety_score" => Some(AlertType::LowSafetyScore),
            "sos" => Some(AlertType::Sos),
            "manual" => Some(AlertType::Manual),
            _ => None,
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(AlertSeverity::Low),
            "MEDIUM" => Some(AlertSeverity::Medium),
            "HIGH" => Some(AlertSeverity::High),
            "CRITICAL" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// Alert status; transitions beyond `Active` are operator-driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    FalseAlarm,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalseAlarm => "false_alarm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            "false_alarm" => Some(AlertStatus::FalseAlarm),
            _ => None,
        }
    }
}

/// Alert not yet written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub tourist_id: TouristId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub auto_generated: bool,
    pub ai_confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl NewAlert {
    pub fn into_alert(self, id: i64) -> Alert {
        Alert {
            id,
            tourist_id: self.tourist_id,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message,
            description: self.description,
            latitude: self.latitude,
            longitude: self.longitude,
            auto_generated: self.auto_generated,
            ai_confidence: self.ai_confidence,
            status: AlertStatus::Active,
            timestamp: self.timestamp,
        }
    }
}

/// Stored alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub tourist_id: TouristId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub auto_generated: bool,
    pub ai_confidence: Option<f64>,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
}

/// Assessment not yet written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAssessment {
    pub tourist_id: TouristId,
    pub location_id: LocationId,
    pub safety_score: SafetyScore,
    pub severity: SafetyTier,
    pub geofence_alert: bool,
    pub anomaly_score: f64,
    pub temporal_risk_score: f64,
    pub confidence: f64,
    pub recommended_action: String,
    pub model_versions: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl NewAssessment {
    pub fn into_assessment(self, id: i64) -> Assessment {
        Assessment {
            id,
            tourist_id: self.tourist_id,
            location_id: self.location_id,
            safety_score: self.safety_score,
            severity: self.severity,
            geofence_alert: self.geofence_alert,
            anomaly_score: self.anomaly_score,
            temporal_risk_score: self.temporal_risk_score,
            confidence: self.confidence,
            recommended_action: self.recommended_action,
            model_versions: self.model_versions,
            created_at: self.created_at,
        }
    }
}

/// Stored, immutable assessment of one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: i64,
    pub tourist_id: TouristId,
    pub location_id: LocationId,
    pub safety_score: SafetyScore,
    pub severity: SafetyTier,
    pub geofence_alert: bool,
    pub anomaly_score: f64,
    pub temporal_risk_score: f64,
    pub confidence: f64,
    pub recommended_action: String,
    pub model_versions: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
