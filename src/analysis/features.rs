// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Movement feature extraction over a bounded location window

use std::collections::HashSet;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::statistics::{mean, population_variance};
use crate::config::FeatureConfig;
use crate::core::LocationPoint;
use crate::geo::haversine_km;

pub const FEATURE_COUNT: usize = 8;

/// Column order shared by extraction, training and inference
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "avg_speed",
    "inactivity_duration",
    "route_deviation",
    "speed_variance",
    "location_density",
    "zone_risk_score",
    "time_of_day_risk",
    "movement_consistency",
];

/// Elapsed-time floor for speed computation (hours)
const MIN_INTERVAL_HOURS: f64 = 0.01;

/// Straight-line distance below which route deviation is undefined (km)
const MIN_STRAIGHT_KM: f64 = 0.01;

/// Fixed-order movement features for one assessed point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
    insufficient: bool,
}

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            values,
            insufficient: false,
        }
    }

    /// All-zero vector standing in for "not enough history".
    pub fn insufficient() -> Self {
        Self {
            values: [0.0; FEATURE_COUNT],
            insufficient: true,
        }
    }

    /// True when the vector must not be treated as an observation.
    pub fn is_degenerate(&self) -> bool {
        self.insufficient || self.values.iter().all(|&v| v == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }
}

/// Per-interval series derived from consecutive points
#[derive(Debug, Clone, Default)]
pub struct MovementSeries {
    pub distances_km: Vec<f64>,
    pub gaps_secs: Vec<f64>,
    pub speeds_kmh: Vec<f64>,
    pub bearings_deg: Vec<f64>,
}

impl MovementSeries {
    /// Points must already be in ascending timestamp order.
    pub fn from_points(points: &[LocationPoint]) -> Self {
        let mut series = Self::default();

        for pair in points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let km = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
            let secs = (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0;
            let hours = (secs / 3600.0).max(MIN_INTERVAL_HOURS);

            series.distances_km.push(km);
            series.gaps_secs.push(secs);
            series.speeds_kmh.push(km / hours);
            series.bearings_deg.push(initial_bearing(a, b));
        }

        series
    }

    pub fn intervals(&self) -> usize {
        self.speeds_kmh.len()
    }

    /// Absolute heading changes between consecutive intervals, in `[0, 180]`.
    pub fn bearing_changes(&self) -> Vec<f64> {
        self.bearings_deg
            .windows(2)
            .map(|w| {
                let delta = (w[1] - w[0]).rem_euclid(360.0);
                if delta > 180.0 { 360.0 - delta } else { delta }
            })
            .collect()
    }

    /// Largest absolute change between consecutive speeds.
    pub fn max_speed_jump(&self) -> f64 {
        self.speeds_kmh
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max)
    }
}

fn initial_bearing(a: &LocationPoint, b: &LocationPoint) -> f64 {
    let (phi1, phi2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Night window used by the feature vector: [22:00, 06:00)
pub fn time_of_day_risk(at: DateTime<Utc>) -> f64 {
    let hour = at.hour();
    if hour >= 22 || hour < 6 { 0.8 } else { 0.2 }
}

/// Movement feature extractor
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn history_window(&self) -> usize {
        self.config.history_window
    }

    /// History (most recent `history_window` points, excluding `point`)
    /// plus `point`, ascending by timestamp.
    pub fn build_window(&self, history: &[LocationPoint], point: &LocationPoint) -> Vec<LocationPoint> {
        let mut window: Vec<LocationPoint> = history
            .iter()
            .filter(|p| p.id != point.id)
            .cloned()
            .collect();
        window.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        window.dedup_by_key(|p| p.id);

        let excess = window.len().saturating_sub(self.config.history_window);
        window.drain(..excess);

        window.push(point.clone());
        window.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        window
    }

    /// Extract the 8 features for `point` given its prior history.
    pub fn extract(&self, history: &[LocationPoint], point: &LocationPoint, zone_risk: f64) -> FeatureVector {
        let window = self.build_window(history, point);
        if window.len() - 1 < self.config.min_history {
            return FeatureVector::insufficient();
        }
        self.from_window(&window, zone_risk, point.timestamp)
    }

    /// Features over an already-built ascending window.
    pub fn from_window(&self, window: &[LocationPoint], zone_risk: f64, at: DateTime<Utc>) -> FeatureVector {
        let series = MovementSeries::from_points(window);
        let speeds = &series.speeds_kmh;

        let avg_speed = mean(speeds);
        let speed_variance = population_variance(speeds);

        let inactivity_duration = if speeds.is_empty() {
            0.0
        } else {
            let idle = speeds
                .iter()
                .filter(|&&s| s < self.config.inactivity_speed_kmh)
                .count();
            idle as f64 / speeds.len() as f64 * 100.0
        };

        let route_deviation = match (window.first(), window.last()) {
            (Some(first), Some(last)) => {
                let straight = haversine_km(first.latitude, first.longitude, last.latitude, last.longitude);
                if straight < MIN_STRAIGHT_KM {
                    0.0
                } else {
                    let path: f64 = series.distances_km.iter().sum();
                    ((path - straight) / straight).clamp(0.0, 1.0)
                }
            }
            _ => 0.0,
        };

        let location_density = if window.is_empty() {
            0.0
        } else {
            let cells: HashSet<(i64, i64)> = window
                .iter()
                .map(|p| ((p.latitude * 1000.0).round() as i64, (p.longitude * 1000.0).round() as i64))
                .collect();
            (cells.len() as f64 / window.len() as f64 * 10.0).min(10.0)
        };

        let movement_consistency = 1.0 - (speed_variance / 10.0).min(1.0);

        FeatureVector::new([
            avg_speed,
            inactivity_duration,
            route_deviation,
            speed_variance,
            location_density,
            zone_risk,
            time_of_day_risk(at),
            movement_consistency,
        ])
    }
}
