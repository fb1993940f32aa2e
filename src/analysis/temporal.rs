// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Temporal risk heuristics and per-tourist movement profiles

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::MovementSeries;
use super::statistics::{mean, population_variance, quantile, StatisticalAnalyzer};
use crate::config::TemporalConfig;
use crate::core::LocationPoint;
use crate::error::{Result, SafetyError};

/// Confidence reported when the window is too short to analyze
pub const TEMPORAL_LOW_CONFIDENCE: f64 = 0.3;

/// Confidence reported after a caught fault or timeout
pub const TEMPORAL_FAULT_CONFIDENCE: f64 = 0.1;

pub const TEMPORAL_CONFIDENCE: f64 = 0.75;

/// Confidence for windows with fewer than `CONFIDENT_INTERVALS` intervals
pub const TEMPORAL_SHORT_CONFIDENCE: f64 = 0.5;

const CONFIDENT_INTERVALS: usize = 3;

const Z_THRESHOLD: f64 = 2.0;

/// Individual risk contributions before clamping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub low_speed: f64,
    pub erratic: f64,
    pub night: f64,
    pub speed_jump: f64,
}

impl RiskFactors {
    pub fn total(&self) -> f64 {
        (self.low_speed + self.erratic + self.night + self.speed_jump).min(1.0)
    }
}

/// Fractions of samples with |z| > 2, informational only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalDiagnostics {
    pub time_gap_outliers: f64,
    pub speed_outliers: f64,
    pub bearing_outliers: f64,
    pub above_profile_speed: bool,
}

/// Temporal analyzer output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalAssessment {
    pub risk_score: f64,
    pub pattern_deviation: f64,
    pub confidence: f64,
    pub factors: RiskFactors,
    pub diagnostics: TemporalDiagnostics,
}

impl TemporalAssessment {
    pub fn fallback(confidence: f64) -> Self {
        Self {
            confidence,
            ..Self::default()
        }
    }
}

/// Movement profile for one tourist's training history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementProfile {
    pub avg_speed: f64,
    pub speed_variance: f64,
    /// `1 / (1 + cv)` of the time gaps, 1.0 for perfectly even reporting
    pub time_regularity: f64,
}

impl MovementProfile {
    /// Needs at least three ascending points.
    pub fn from_points(points: &[LocationPoint]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let series = MovementSeries::from_points(points);
        let gap_mean = mean(&series.gaps_secs);
        let gap_cv = if gap_mean > 0.0 {
            population_variance(&series.gaps_secs).sqrt() / gap_mean
        } else {
            0.0
        };

        Some(Self {
            avg_speed: mean(&series.speeds_kmh),
            speed_variance: population_variance(&series.speeds_kmh),
            time_regularity: 1.0 / (1.0 + gap_cv),
        })
    }
}

/// Percentile thresholds fitted from movement profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalThresholds {
    pub speed_variance_p90: f64,
    pub time_regularity_p10: f64,
    pub avg_speed_p95: f64,
    pub profiles: usize,
}

impl TemporalThresholds {
    pub fn fit(profiles: &[MovementProfile]) -> Result<Self> {
        if profiles.is_empty() {
            return Err(SafetyError::Computation("no movement profiles to fit".into()));
        }

        let variances: Vec<f64> = profiles.iter().map(|p| p.speed_variance).collect();
        let regularity: Vec<f64> = profiles.iter().map(|p| p.time_regularity).collect();
        let speeds: Vec<f64> = profiles.iter().map(|p| p.avg_speed).collect();

        let thresholds = Self {
            speed_variance_p90: quantile(&variances, 0.9),
            time_regularity_p10: quantile(&regularity, 0.1),
            avg_speed_p95: quantile(&speeds, 0.95),
            profiles: profiles.len(),
        };

        if ![
            thresholds.speed_variance_p90,
            thresholds.time_regularity_p10,
            thresholds.avg_speed_p95,
        ]
        .iter()
        .all(|v| v.is_finite())
        {
            return Err(SafetyError::Computation("non-finite temporal thresholds".into()));
        }

        Ok(thresholds)
    }
}

/// Temporal risk analyzer
#[derive(Debug, Clone)]
pub struct TemporalRiskAnalyzer {
    config: TemporalConfig,
    stats: StatisticalAnalyzer,
}

impl TemporalRiskAnalyzer {
    pub fn new(config: TemporalConfig) -> Self {
        Self {
            config,
            stats: StatisticalAnalyzer::new(),
        }
    }

    /// Variance above which movement counts as erratic.
    pub fn erratic_threshold(&self, thresholds: Option<&TemporalThresholds>) -> f64 {
        match thresholds {
            Some(t) => self.config.erratic_variance.max(t.speed_variance_p90),
            None => self.config.erratic_variance,
        }
    }

    /// Analyze an ascending window ending at the assessed point. `at` is the
    /// assessed point's timestamp.
    pub fn analyze(
        &self,
        window: &[LocationPoint],
        at: DateTime<Utc>,
        thresholds: Option<&TemporalThresholds>,
    ) -> TemporalAssessment {
        if window.len() < self.config.min_points {
            return TemporalAssessment::fallback(TEMPORAL_LOW_CONFIDENCE);
        }

        let series = MovementSeries::from_points(window);
        let speeds = &series.speeds_kmh;
        let avg_speed = mean(speeds);
        let variance = population_variance(speeds);

        let mut factors = RiskFactors::default();

        if avg_speed < 0.5 {
            factors.low_speed = 0.4 * (0.5 - avg_speed) / 0.5;
        }

        if variance > self.erratic_threshold(thresholds) {
            factors.erratic = 0.3 * (variance / 20.0).min(1.0);
        }

        factors.night = match at.hour() {
            0..=4 => 0.3,
            5 | 22 | 23 => 0.2,
            _ => 0.0,
        };

        let jump = series.max_speed_jump();
        if jump > 10.0 {
            factors.speed_jump = 0.2 * (jump / 50.0).min(1.0);
        }

        let risk_score = factors.total();
        if !risk_score.is_finite() {
            return TemporalAssessment::fallback(TEMPORAL_FAULT_CONFIDENCE);
        }

        let diagnostics = TemporalDiagnostics {
            time_gap_outliers: self.stats.outlier_fraction(&series.gaps_secs, Z_THRESHOLD),
            speed_outliers: self.stats.outlier_fraction(speeds, Z_THRESHOLD),
            bearing_outliers: self.stats.outlier_fraction(&series.bearing_changes(), Z_THRESHOLD),
            above_profile_speed: thresholds.map(|t| avg_speed > t.avg_speed_p95).unwrap_or(false),
        };

        // Only reachable below the default `min_points` of 5
        let confidence = if series.intervals() >= CONFIDENT_INTERVALS {
            TEMPORAL_CONFIDENCE
        } else {
            TEMPORAL_SHORT_CONFIDENCE
        };

        debug!(
            "Temporal risk {:.3} (low_speed={:.2}, erratic={:.2}, night={:.2}, jump={:.2})",
            risk_score, factors.low_speed, factors.erratic, factors.night, factors.speed_jump
        );

        TemporalAssessment {
            risk_score,
            pattern_deviation: (variance / 15.0).min(1.0),
            confidence,
            factors,
            diagnostics,
        }
    }
}
