// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Geofence evaluation against restricted and safe zones

use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Polygon;
use crate::db::SafetyStore;
use crate::error::{Result, SafetyError};

/// Zone category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Restricted,
    Safe,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Restricted => "restricted",
            ZoneKind::Safe => "safe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restricted" => Some(ZoneKind::Restricted),
            "safe" => Some(ZoneKind::Safe),
            _ => None,
        }
    }
}

/// Named polygonal area with its risk weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub kind: ZoneKind,
    pub polygon: Polygon,
    /// 1-5, restricted zones only
    pub danger_level: Option<u8>,
    pub buffer_meters: f64,
    pub is_active: bool,
}

impl Zone {
    pub fn restricted(name: &str, polygon: Polygon, danger_level: u8, buffer_meters: f64) -> Result<Self> {
        if !(1..=5).contains(&danger_level) {
            return Err(SafetyError::InvalidInput(format!(
                "danger level {} outside 1-5", danger_level
            )));
        }
        Self::build(name, ZoneKind::Restricted, polygon, Some(danger_level), buffer_meters)
    }

    pub fn safe(name: &str, polygon: Polygon) -> Result<Self> {
        Self::build(name, ZoneKind::Safe, polygon, None, 0.0)
    }

    fn build(
        name: &str,
        kind: ZoneKind,
        polygon: Polygon,
        danger_level: Option<u8>,
        buffer_meters: f64,
    ) -> Result<Self> {
        if !buffer_meters.is_finite() || buffer_meters < 0.0 {
            return Err(SafetyError::InvalidInput(format!(
                "buffer {} must be a non-negative distance", buffer_meters
            )));
        }
        Ok(Self {
            id: 0,
            name: name.to_string(),
            kind,
            polygon,
            danger_level,
            buffer_meters,
            is_active: true,
        })
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.polygon.contains_buffered(longitude, latitude, self.buffer_meters)
    }
}

/// Result of testing one point against the zone set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeofenceResult {
    pub in_restricted: bool,
    pub zone: Option<Zone>,
    pub in_safe: bool,
    pub safe_zone: Option<Zone>,
    pub confidence: f64,
}

impl GeofenceResult {
    pub fn danger_level(&self) -> Option<u8> {
        self.zone.as_ref().and_then(|z| z.danger_level)
    }

    /// Zone risk feature: restricted beats safe, neither is mid risk.
    pub fn zone_risk_score(&self) -> f64 {
        if self.in_restricted {
            self.danger_level().map(|d| (d as f64 / 10.0).min(1.0)).unwrap_or(0.0)
        } else if self.in_safe {
            0.1
        } else {
            0.3
        }
    }
}

/// Pure point-in-zone evaluator
#[derive(Debug, Clone, Default)]
pub struct GeofenceEvaluator;

impl GeofenceEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// First matching zone of each kind wins.
    pub fn evaluate(&self, latitude: f64, longitude: f64, zones: &[Zone]) -> GeofenceResult {
        let active = || zones.iter().filter(|z| z.is_active);

        let zone = active()
            .filter(|z| z.kind == ZoneKind::Restricted)
            .find(|z| z.contains(latitude, longitude))
            .cloned();
        let safe_zone = active()
            .filter(|z| z.kind == ZoneKind::Safe)
            .find(|z| z.contains(latitude, longitude))
            .cloned();

        GeofenceResult {
            in_restricted: zone.is_some(),
            zone,
            in_safe: safe_zone.is_some(),
            safe_zone,
            confidence: 1.0,
        }
    }
}

struct CachedZones {
    fetched_at: Instant,
    zones: Arc<Vec<Zone>>,
}

/// TTL cache over the store's active zone set
pub struct ZoneCache {
    ttl: Duration,
    inner: RwLock<Option<CachedZones>>,
}

impl ZoneCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Current snapshot, refreshed from the store once the TTL lapses.
    /// A failed refresh keeps serving the stale snapshot if one exists.
    pub async fn zones(&self, store: &dyn SafetyStore) -> Result<Arc<Vec<Zone>>> {
        if let Some(cached) = self.inner.read().as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.zones.clone());
            }
        }

        match store.get_zones(true).await {
            Ok(zones) => {
                let zones = Arc::new(zones);
                debug!("Refreshed zone cache with {} zones", zones.len());
                *self.inner.write() = Some(CachedZones {
                    fetched_at: Instant::now(),
                    zones: zones.clone(),
                });
                Ok(zones)
            }
            Err(e) => match self.inner.read().as_ref() {
                Some(stale) => {
                    warn!("Zone refresh failed, serving stale snapshot: {}", e);
                    Ok(stale.zones.clone())
                }
                None => Err(e),
            },
        }
    }

    pub fn invalidate(&self) {
        *self.inner.write() = None;
        info!("Zone cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(lon: f64, lat: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            [lon, lat],
            [lon + size, lat],
            [lon + size, lat + size],
            [lon, lat + size],
        ])
        .unwrap()
    }

    fn zones() -> Vec<Zone> {
        vec![
            Zone::restricted("Border Area", square(77.0, 28.0, 0.1), 5, 0.0).unwrap(),
            Zone::safe("Old Town", square(77.2, 28.2, 0.1)).unwrap(),
        ]
    }

    #[test]
    fn test_restricted_hit() {
        let result = GeofenceEvaluator::new().evaluate(28.05, 77.05, &zones());
        assert!(result.in_restricted);
        assert!(!result.in_safe);
        assert_eq!(result.danger_level(), Some(5));
        assert!((result.zone_risk_score() - 0.5).abs() < 1e-12);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_safe_and_outside() {
        let evaluator = GeofenceEvaluator::new();
        let safe = evaluator.evaluate(28.25, 77.25, &zones());
        assert!(safe.in_safe && !safe.in_restricted);
        assert!((safe.zone_risk_score() - 0.1).abs() < 1e-12);

        let outside = evaluator.evaluate(10.0, 10.0, &zones());
        assert!(!outside.in_safe && !outside.in_restricted);
        assert!((outside.zone_risk_score() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_inactive_zone_ignored() {
        let mut zs = zones();
        zs[0].is_active = false;
        let result = GeofenceEvaluator::new().evaluate(28.05, 77.05, &zs);
        assert!(!result.in_restricted);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let evaluator = GeofenceEvaluator::new();
        let zs = zones();
        for &(lat, lon) in &[(28.05, 77.05), (28.25, 77.25), (0.0, 0.0), (28.1, 77.1)] {
            let a = evaluator.evaluate(lat, lon, &zs);
            let b = evaluator.evaluate(lat, lon, &zs);
            assert_eq!(a.in_restricted, b.in_restricted);
            assert_eq!(a.in_safe, b.in_safe);
        }
    }

    #[tokio::test]
    async fn test_zone_cache_serves_stale_snapshot() {
        let db = crate::db::Database::open_in_memory().unwrap();
        for zone in zones() {
            db.insert_zone(&zone).await.unwrap();
        }

        let cache = ZoneCache::new(Duration::ZERO);
        assert_eq!(cache.zones(&db).await.unwrap().len(), 2);

        db.execute_raw("DROP TABLE zones;").unwrap();
        assert_eq!(cache.zones(&db).await.unwrap().len(), 2);

        cache.invalidate();
        assert!(cache.zones(&db).await.is_err());
    }

    #[test]
    fn test_zone_validation() {
        assert!(Zone::restricted("x", square(0.0, 0.0, 1.0), 0, 0.0).is_err());
        assert!(Zone::restricted("x", square(0.0, 0.0, 1.0), 6, 0.0).is_err());
        assert!(Zone::restricted("x", square(0.0, 0.0, 1.0), 3, -1.0).is_err());
    }
}
