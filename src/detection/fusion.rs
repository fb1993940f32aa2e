// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Score fusion - additive penalties from geofence, anomaly and temporal signals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AlertSeverity, AlertType, NewAlert, SafetyTier};
use crate::analysis::{AnomalyAssessment, TemporalAssessment};
use crate::config::{Config, ScoringConfig};
use crate::core::{LocationPoint, SafetyScore, TouristId};
use crate::geo::GeofenceResult;

/// Everything fusion needs for one assessed point
#[derive(Debug, Clone, Copy)]
pub struct FusionInputs<'a> {
    pub tourist_id: TouristId,
    pub location: &'a LocationPoint,
    pub geofence: &'a GeofenceResult,
    pub anomaly: &'a AnomalyAssessment,
    pub temporal: &'a TemporalAssessment,
}

/// Point deductions applied to the base score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyBreakdown {
    pub geofence: i64,
    pub anomaly: i64,
    pub temporal: i64,
    pub bonus: i64,
}

/// Fused result for one assessed point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub score: SafetyScore,
    pub tier: SafetyTier,
    pub recommended_action: String,
    pub confidence: f64,
    pub penalties: PenaltyBreakdown,
    pub alerts: Vec<NewAlert>,
}

/// Result of an SOS, which bypasses fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosResolution {
    pub score: SafetyScore,
    pub tier: SafetyTier,
    pub alert: NewAlert,
}

/// Score fusion and classifier
#[derive(Debug, Clone)]
pub struct ScoreFusion {
    scoring: ScoringConfig,
    anomaly_alert_threshold: f64,
    temporal_alert_threshold: f64,
}

impl ScoreFusion {
    pub fn new(scoring: ScoringConfig, anomaly_alert_threshold: f64, temporal_alert_threshold: f64) -> Self {
        Self {
            scoring,
            anomaly_alert_threshold,
            temporal_alert_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.scoring.clone(),
            config.anomaly.alert_threshold,
            config.temporal.alert_threshold,
        )
    }

    /// Fresh assessment from a base of 100.
    pub fn fuse(&self, inputs: FusionInputs<'_>) -> FusionOutcome {
        let anomaly_score = inputs.anomaly.anomaly_score.clamp(0.0, 1.0);
        let temporal_risk = inputs.temporal.risk_score.clamp(0.0, 1.0);
        let restricted = inputs.geofence.in_restricted;

        let mut penalties = PenaltyBreakdown {
            geofence: if restricted { self.scoring.geofence_penalty } else { 0 },
            anomaly: (anomaly_score * self.scoring.anomaly_weight).round() as i64,
            temporal: (temporal_risk * self.scoring.temporal_weight).round() as i64,
            bonus: 0,
        };
        if !restricted
            && anomaly_score < self.scoring.bonus_max_anomaly
            && temporal_risk < self.scoring.bonus_max_temporal
        {
            penalties.bonus = self.scoring.clean_bonus;
        }

        let raw = SafetyScore::MAX.value() as i64
            - penalties.geofence
            - penalties.anomaly
            - penalties.temporal
            + penalties.bonus;
        let score = SafetyScore::clamped(raw);
        let tier = SafetyTier::from_score(score);

        let confidence = (inputs.geofence.confidence + inputs.anomaly.confidence + inputs.temporal.confidence) / 3.0;

        let alerts = self.alerts_for(&inputs, anomaly_score, temporal_risk, score);

        debug!(
            "Fused score {} ({}) for tourist {}: geofence -{}, anomaly -{}, temporal -{}, bonus +{}",
            score, tier, inputs.tourist_id, penalties.geofence, penalties.anomaly, penalties.temporal, penalties.bonus
        );

        FusionOutcome {
            score,
            tier,
            recommended_action: tier.recommended_action(),
            confidence,
            penalties,
            alerts,
        }
    }

    fn alerts_for(
        &self,
        inputs: &FusionInputs<'_>,
        anomaly_score: f64,
        temporal_risk: f64,
        score: SafetyScore,
    ) -> Vec<NewAlert> {
        let location = inputs.location;
        let alert = |alert_type, severity, message: String, confidence: Option<f64>| NewAlert {
            tourist_id: inputs.tourist_id,
            alert_type,
            severity,
            message,
            description: None,
            latitude: Some(location.latitude),
            longitude: Some(location.longitude),
            auto_generated: true,
            ai_confidence: confidence,
            timestamp: location.timestamp,
        };

        let mut alerts = Vec::new();

        if inputs.geofence.in_restricted {
            let danger = inputs.geofence.danger_level().unwrap_or(0);
            let severity = if danger >= self.scoring.high_danger_level {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            let name = inputs.geofence.zone.as_ref().map(|z| z.name.as_str()).unwrap_or("unknown");
            let mut a = alert(
                AlertType::Geofence,
                severity,
                format!("Tourist entered restricted zone: {}", name),
                Some(inputs.geofence.confidence),
            );
            a.description = Some(format!("Danger level {}", danger));
            alerts.push(a);
        }

        if anomaly_score > self.anomaly_alert_threshold {
            alerts.push(alert(
                AlertType::Anomaly,
                AlertSeverity::Medium,
                format!("Unusual behavior detected (confidence: {:.2})", inputs.anomaly.confidence),
                Some(inputs.anomaly.confidence),
            ));
        }

        if temporal_risk > self.temporal_alert_threshold {
            alerts.push(alert(
                AlertType::Temporal,
                AlertSeverity::Medium,
                "Unusual movement pattern detected".to_string(),
                Some(inputs.temporal.confidence),
            ));
        }

        if score.value() < self.scoring.low_score_alert {
            alerts.push(alert(
                AlertType::LowSafetyScore,
                AlertSeverity::High,
                format!("Safety score dropped to {}", score),
                None,
            ));
        }

        alerts
    }

    /// SOS: fixed penalty off the current score plus an unconditional
    /// CRITICAL panic alert.
    pub fn sos(
        &self,
        tourist_id: TouristId,
        current: SafetyScore,
        position: Option<(f64, f64)>,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> SosResolution {
        let score = current.adjusted(-self.scoring.sos_penalty);
        let alert = NewAlert {
            tourist_id,
            alert_type: AlertType::Panic,
            severity: AlertSeverity::Critical,
            message: message.unwrap_or_else(|| "Emergency SOS triggered".to_string()),
            description: Some(format!("Safety score {} -> {}", current, score)),
            latitude: position.map(|(lat, _)| lat),
            longitude: position.map(|(_, lon)| lon),
            auto_generated: false,
            ai_confidence: None,
            timestamp: at,
        };

        SosResolution {
            score,
            tier: SafetyTier::from_score(score),
            alert,
        }
    }
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnomalyAssessment, TemporalAssessment};
    use crate::geo::{Polygon, Zone};
    use proptest::prelude::*;

    fn point() -> LocationPoint {
        LocationPoint {
            id: 1,
            tourist_id: 9,
            latitude: 28.05,
            longitude: 77.05,
            speed: None,
            altitude: None,
            accuracy: None,
            heading: None,
            timestamp: Utc::now(),
        }
    }

    fn restricted(danger: u8) -> GeofenceResult {
        let polygon = Polygon::new(vec![[77.0, 28.0], [77.1, 28.0], [77.1, 28.1], [77.0, 28.1]]).unwrap();
        GeofenceResult {
            in_restricted: true,
            zone: Some(Zone::restricted("Border Area", polygon, danger, 0.0).unwrap()),
            in_safe: false,
            safe_zone: None,
            confidence: 1.0,
        }
    }

    fn clear() -> GeofenceResult {
        GeofenceResult {
            confidence: 1.0,
            ..GeofenceResult::default()
        }
    }

    fn signals(anomaly: f64, temporal: f64) -> (AnomalyAssessment, TemporalAssessment) {
        let a = AnomalyAssessment {
            anomaly_score: anomaly,
            is_anomaly: anomaly > 0.5,
            confidence: 0.85,
            raw_score: Some(0.5 - anomaly),
        };
        let t = TemporalAssessment {
            risk_score: temporal,
            confidence: 0.75,
            ..TemporalAssessment::default()
        };
        (a, t)
    }

    fn fuse(geofence: &GeofenceResult, anomaly: f64, temporal: f64) -> FusionOutcome {
        let p = point();
        let (a, t) = signals(anomaly, temporal);
        ScoreFusion::default().fuse(FusionInputs {
            tourist_id: 9,
            location: &p,
            geofence,
            anomaly: &a,
            temporal: &t,
        })
    }

    #[test]
    fn test_restricted_zone_penalty() {
        let outcome = fuse(&restricted(5), 0.0, 0.0);
        assert_eq!(outcome.score.value(), 70);
        assert_eq!(outcome.tier, SafetyTier::Warning);
        assert_eq!(outcome.penalties.bonus, 0);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].alert_type, AlertType::Geofence);
        assert_eq!(outcome.alerts[0].severity, AlertSeverity::High);
    }

    #[test]
    fn test_low_danger_geofence_alert_is_medium() {
        let outcome = fuse(&restricted(3), 0.0, 0.0);
        assert_eq!(outcome.alerts[0].severity, AlertSeverity::Medium);
    }

    #[test]
    fn test_clean_signals_get_bonus_capped() {
        let outcome = fuse(&clear(), 0.1, 0.1);
        assert_eq!(outcome.penalties.anomaly, 3);
        assert_eq!(outcome.penalties.temporal, 2);
        assert_eq!(outcome.penalties.bonus, 5);
        assert_eq!(outcome.score.value(), 100);
        assert_eq!(outcome.tier, SafetyTier::Safe);
        assert!(outcome.alerts.is_empty());
    }

    #[test]
    fn test_worst_case_penalties() {
        let outcome = fuse(&restricted(5), 1.0, 1.0);
        // 100 - 30 - 25 - 20
        assert_eq!(outcome.score.value(), 25);
        assert_eq!(outcome.tier, SafetyTier::Critical);
        let types: Vec<AlertType> = outcome.alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(
            types,
            vec![AlertType::Geofence, AlertType::Anomaly, AlertType::Temporal, AlertType::LowSafetyScore]
        );
    }

    #[test]
    fn test_score_never_goes_negative() {
        let scoring = ScoringConfig {
            geofence_penalty: 80,
            ..ScoringConfig::default()
        };
        let p = point();
        let (a, t) = signals(1.0, 1.0);
        let geofence = restricted(5);
        let outcome = ScoreFusion::new(scoring, 0.7, 0.7).fuse(FusionInputs {
            tourist_id: 9,
            location: &p,
            geofence: &geofence,
            anomaly: &a,
            temporal: &t,
        });
        assert_eq!(outcome.score.value(), 0);
        assert_eq!(outcome.tier, SafetyTier::Critical);
    }

    #[test]
    fn test_penalties_round_half_away_from_zero() {
        // 0.5 * 25 = 12.5 -> 13
        let outcome = fuse(&clear(), 0.5, 0.0);
        assert_eq!(outcome.penalties.anomaly, 13);
        assert_eq!(outcome.score.value(), 87);
    }

    #[test]
    fn test_alert_thresholds_are_strict() {
        let at = fuse(&clear(), 0.7, 0.7);
        assert!(at.alerts.iter().all(|a| a.alert_type != AlertType::Anomaly && a.alert_type != AlertType::Temporal));
        let above = fuse(&clear(), 0.71, 0.71);
        assert_eq!(above.alerts.len(), 2);
    }

    #[test]
    fn test_confidence_is_mean_of_sub_models() {
        let outcome = fuse(&clear(), 0.0, 0.0);
        assert!((outcome.confidence - (1.0 + 0.85 + 0.75) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sos_penalty() {
        let fusion = ScoreFusion::default();
        let sos = fusion.sos(9, SafetyScore::clamped(90), Some((28.6, 77.2)), None, Utc::now());
        assert_eq!(sos.score.value(), 50);
        assert_eq!(sos.tier, SafetyTier::Warning);
        assert_eq!(sos.alert.alert_type, AlertType::Panic);
        assert_eq!(sos.alert.severity, AlertSeverity::Critical);

        let floor = fusion.sos(9, SafetyScore::clamped(25), None, None, Utc::now());
        assert_eq!(floor.score.value(), 0);
    }

    proptest! {
        #[test]
        fn prop_score_stays_in_bounds(
            in_zone in any::<bool>(),
            danger in 1u8..=5,
            anomaly in -0.5f64..1.5,
            temporal in -0.5f64..1.5,
        ) {
            let geofence = if in_zone { restricted(danger) } else { clear() };
            let outcome = fuse(&geofence, anomaly, temporal);
            prop_assert!(outcome.score.value() <= 100);
            prop_assert_eq!(outcome.tier, SafetyTier::from_score(outcome.score));
            prop_assert!((0.0..=1.0).contains(&outcome.confidence));
        }
    }
}
