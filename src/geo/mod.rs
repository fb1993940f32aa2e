// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Geometry primitives - great-circle distance and GeoJSON-ordered polygons

mod geofence;

pub use geofence::*;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SafetyError};

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Coarse metres-per-degree conversion used for zone buffers
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Great-circle distance between two (lat, lon) pairs in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Polygon outer ring in GeoJSON `(lon, lat)` order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct Polygon {
    ring: Vec<[f64; 2]>,
}

impl Polygon {
    /// Build a polygon from `(lon, lat)` vertices. A closing vertex equal to
    /// the first one is accepted and dropped.
    pub fn new(mut ring: Vec<[f64; 2]>) -> Result<Self> {
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return Err(SafetyError::InvalidInput(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                ring.len()
            )));
        }
        for &[lon, lat] in &ring {
            crate::core::validate_coordinates(lat, lon)?;
        }
        Ok(Self { ring })
    }

    /// Parse a GeoJSON `Polygon` geometry or a bare ring.
    pub fn from_geojson(value: &serde_json::Value) -> Result<Self> {
        let rings = match value.get("coordinates") {
            Some(coordinates) => coordinates
                .get(0)
                .cloned()
                .ok_or_else(|| SafetyError::InvalidInput("polygon has no outer ring".into()))?,
            None => value.clone(),
        };
        let ring: Vec<[f64; 2]> = serde_json::from_value(rings)?;
        Self::new(ring)
    }

    pub fn to_geojson(&self) -> serde_json::Value {
        let mut closed = self.ring.clone();
        closed.push(self.ring[0]);
        serde_json::json!({ "type": "Polygon", "coordinates": [closed] })
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.ring
    }

    /// Ray-casting containment test, `x` = longitude, `y` = latitude.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let n = self.ring.len();
        let mut inside = false;
        let mut j = n - 1;

        for i in 0..n {
            let [xi, yi] = self.ring[i];
            let [xj, yj] = self.ring[j];

            if (yi > lat) != (yj > lat) {
                let x_cross = (xj - xi) * (lat - yi) / (yj - yi) + xi;
                if lon < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }

    /// Planar distance in degrees from the point to the nearest ring edge.
    pub fn boundary_distance_deg(&self, lon: f64, lat: f64) -> f64 {
        let n = self.ring.len();
        (0..n)
            .map(|i| segment_distance(self.ring[i], self.ring[(i + 1) % n], [lon, lat]))
            .fold(f64::INFINITY, f64::min)
    }

    /// Containment with a metre buffer around the ring. Equivalent to
    /// testing against the polygon expanded by `buffer_meters / 111000` degrees.
    pub fn contains_buffered(&self, lon: f64, lat: f64, buffer_meters: f64) -> bool {
        if self.contains(lon, lat) {
            return true;
        }
        buffer_meters > 0.0
            && self.boundary_distance_deg(lon, lat) <= buffer_meters / METERS_PER_DEGREE
    }
}

impl TryFrom<Vec<[f64; 2]>> for Polygon {
    type Error = SafetyError;

    fn try_from(ring: Vec<[f64; 2]>) -> Result<Self> {
        Self::new(ring)
    }
}

impl From<Polygon> for Vec<[f64; 2]> {
    fn from(polygon: Polygon) -> Self {
        polygon.ring
    }
}

fn segment_distance(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq < 1e-18 {
        0.0
    } else {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0)
    };

    let (cx, cy) = (a[0] + t * dx, a[1] + t * dy);
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}
