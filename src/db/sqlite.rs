// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! SQLite-backed store

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{CommittedAssessment, HistoryQuery, SafetyStore, TrainingRow};
use crate::config::DatabaseConfig;
use crate::core::{LocationId, LocationPoint, NewLocation, SafetyScore, Tourist, TouristId};
use crate::detection::{
    Alert, AlertSeverity, AlertStatus, AlertType, Assessment, NewAlert, NewAssessment, SafetyTier,
};
use crate::error::{Result, SafetyError};
use crate::geo::{Polygon, Zone, ZoneKind};
use crate::models::ModelType;

const LOCATION_COLUMNS: &str =
    "l.id, l.tourist_id, l.latitude, l.longitude, l.speed, l.altitude, l.accuracy, l.heading, l.timestamp";

const ASSESSMENT_COLUMNS: &str = "id, tourist_id, location_id, safety_score, severity, geofence_alert, \
     anomaly_score, temporal_risk_score, confidence, recommended_action, model_versions, created_at";

const ALERT_COLUMNS: &str = "id, tourist_id, alert_type, severity, message, description, latitude, longitude, \
     auto_generated, ai_confidence, status, timestamp";

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
        "#,
        )?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Create database tables
    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tourists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                safety_score INTEGER NOT NULL DEFAULT 100
                    CHECK (safety_score BETWEEN 0 AND 100),
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tourist_id INTEGER NOT NULL REFERENCES tourists(id),
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                speed REAL,
                altitude REAL,
                accuracy REAL,
                heading REAL,
                timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_locations_tourist_time ON locations(tourist_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_locations_timestamp ON locations(timestamp);
            CREATE INDEX IF NOT EXISTS idx_locations_created ON locations(created_at);

            CREATE TABLE IF NOT EXISTS zones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                polygon TEXT NOT NULL,
                danger_level INTEGER CHECK (danger_level BETWEEN 1 AND 5),
                buffer_meters REAL NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS assessments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tourist_id INTEGER NOT NULL REFERENCES tourists(id),
                location_id INTEGER NOT NULL UNIQUE REFERENCES locations(id),
                safety_score INTEGER NOT NULL,
                severity TEXT NOT NULL,
                geofence_alert INTEGER NOT NULL,
                anomaly_score REAL NOT NULL,
                temporal_risk_score REAL NOT NULL,
                confidence REAL NOT NULL,
                recommended_action TEXT NOT NULL,
                model_versions TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tourist_id INTEGER NOT NULL REFERENCES tourists(id),
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                description TEXT,
                latitude REAL,
                longitude REAL,
                auto_generated INTEGER NOT NULL,
                ai_confidence REAL,
                status TEXT NOT NULL DEFAULT 'active',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_tourist ON alerts(tourist_id, status);

            CREATE TABLE IF NOT EXISTS location_claims (
                location_id INTEGER PRIMARY KEY,
                claimed_at TEXT NOT NULL
            );
        "#,
        )?;

        Ok(())
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            tourists: count("tourists")?,
            locations: count("locations")?,
            zones: count("zones")?,
            assessments: count("assessments")?,
            alerts: count("alerts")?,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| SafetyError::Store(format!("store task failed: {}", e)))?
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub tourists: usize,
    pub locations: usize,
    pub zones: usize,
    pub assessments: usize,
    pub alerts: usize,
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn text_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown value '{}'", raw)))
}

fn score_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<SafetyScore> {
    Ok(SafetyScore::clamped(row.get::<_, i64>(idx)?))
}

fn tourist_from_row(row: &Row<'_>) -> rusqlite::Result<Tourist> {
    Ok(Tourist {
        id: row.get(0)?,
        name: row.get(1)?,
        safety_score: score_at(row, 2)?,
        is_active: row.get(3)?,
        created_at: time_at(row, 4)?,
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<LocationPoint> {
    Ok(LocationPoint {
        id: row.get(0)?,
        tourist_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        speed: row.get(4)?,
        altitude: row.get(5)?,
        accuracy: row.get(6)?,
        heading: row.get(7)?,
        timestamp: time_at(row, 8)?,
    })
}

fn zone_from_row(row: &Row<'_>) -> rusqlite::Result<Zone> {
    let ring: String = row.get(3)?;
    let polygon: Polygon = serde_json::from_str(&ring).map_err(|e| conversion_error(3, e.to_string()))?;
    let danger_level: Option<i64> = row.get(4)?;

    Ok(Zone {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: text_enum(row, 2, ZoneKind::parse)?,
        polygon,
        danger_level: danger_level.map(|d| d.clamp(1, 5) as u8),
        buffer_meters: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn assessment_from_row(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    let versions: String = row.get(10)?;
    let model_versions: BTreeMap<String, String> =
        serde_json::from_str(&versions).map_err(|e| conversion_error(10, e.to_string()))?;

    Ok(Assessment {
        id: row.get(0)?,
        tourist_id: row.get(1)?,
        location_id: row.get(2)?,
        safety_score: score_at(row, 3)?,
        severity: text_enum(row, 4, SafetyTier::parse)?,
        geofence_alert: row.get(5)?,
        anomaly_score: row.get(6)?,
        temporal_risk_score: row.get(7)?,
        confidence: row.get(8)?,
        recommended_action: row.get(9)?,
        model_versions,
        created_at: time_at(row, 11)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        tourist_id: row.get(1)?,
        alert_type: text_enum(row, 2, AlertType::parse)?,
        severity: text_enum(row, 3, AlertSeverity::parse)?,
        message: row.get(4)?,
        description: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        auto_generated: row.get(8)?,
        ai_confidence: row.get(9)?,
        status: text_enum(row, 10, AlertStatus::parse)?,
        timestamp: time_at(row, 11)?,
    })
}

fn require_tourist(conn: &Connection, id: TouristId) -> Result<()> {
    conn.query_row("SELECT 1 FROM tourists WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .ok_or_else(|| SafetyError::NotFound(format!("tourist {}", id)))
}

fn write_alert(conn: &Connection, alert: &NewAlert) -> Result<Alert> {
    conn.execute(
        r#"INSERT INTO alerts
           (tourist_id, alert_type, severity, message, description, latitude, longitude,
            auto_generated, ai_confidence, status, timestamp)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        params![
            alert.tourist_id,
            alert.alert_type.as_str(),
            alert.severity.as_str(),
            alert.message,
            alert.description,
            alert.latitude,
            alert.longitude,
            alert.auto_generated,
            alert.ai_confidence,
            AlertStatus::Active.as_str(),
            ts(&alert.timestamp),
        ],
    )?;
    Ok(alert.clone().into_alert(conn.last_insert_rowid()))
}

fn write_assessment(conn: &Connection, assessment: &NewAssessment) -> Result<Assessment> {
    let already: Option<i64> = conn
        .query_row(
            "SELECT id FROM assessments WHERE location_id = ?1",
            params![assessment.location_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing) = already {
        return Err(SafetyError::InvalidInput(format!(
            "location {} already assessed (assessment {})",
            assessment.location_id, existing
        )));
    }

    conn.execute(
        r#"INSERT INTO assessments
           (tourist_id, location_id, safety_score, severity, geofence_alert, anomaly_score,
            temporal_risk_score, confidence, recommended_action, model_versions, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        params![
            assessment.tourist_id,
            assessment.location_id,
            assessment.safety_score.value(),
            assessment.severity.as_str(),
            assessment.geofence_alert,
            assessment.anomaly_score,
            assessment.temporal_risk_score,
            assessment.confidence,
            assessment.recommended_action,
            serde_json::to_string(&assessment.model_versions)?,
            ts(&assessment.created_at),
        ],
    )?;
    Ok(assessment.clone().into_assessment(conn.last_insert_rowid()))
}

fn write_score(conn: &Connection, id: TouristId, score: SafetyScore) -> Result<()> {
    let updated = conn.execute(
        "UPDATE tourists SET safety_score = ?1 WHERE id = ?2",
        params![score.value(), id],
    )?;
    if updated == 0 {
        return Err(SafetyError::NotFound(format!("tourist {}", id)));
    }
    Ok(())
}

#[async_trait]
impl SafetyStore for Database {
    async fn get_zones(&self, active_only: bool) -> Result<Vec<Zone>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, kind, polygon, danger_level, buffer_meters, is_active FROM zones
                 WHERE (?1 = 0 OR is_active = 1) ORDER BY id",
            )?;
            let zones = stmt
                .query_map(params![active_only], zone_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(zones)
        })
        .await
    }

    async fn get_recent_locations(&self, tourist_id: TouristId, query: HistoryQuery) -> Result<Vec<LocationPoint>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM locations l
                 WHERE l.tourist_id = ?1
                   AND (?2 IS NULL OR l.timestamp >= ?2)
                   AND (?3 IS NULL OR l.timestamp <= ?3)
                 ORDER BY l.timestamp DESC, l.id DESC LIMIT ?4",
                LOCATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut points = stmt
                .query_map(
                    params![
                        tourist_id,
                        query.since.as_ref().map(ts),
                        query.before.as_ref().map(ts),
                        query.limit as i64,
                    ],
                    location_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            points.reverse();
            Ok(points)
        })
        .await
    }

    async fn get_tourist(&self, id: TouristId) -> Result<Tourist> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, name, safety_score, is_active, created_at FROM tourists WHERE id = ?1",
                params![id],
                tourist_from_row,
            )
            .optional()?
            .ok_or_else(|| SafetyError::NotFound(format!("tourist {}", id)))
        })
        .await
    }

    async fn get_location(&self, id: LocationId) -> Result<LocationPoint> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM locations l WHERE l.id = ?1", LOCATION_COLUMNS),
                params![id],
                location_from_row,
            )
            .optional()?
            .ok_or_else(|| SafetyError::NotFound(format!("location {}", id)))
        })
        .await
    }

    async fn insert_tourist(&self, name: &str) -> Result<Tourist> {
        let name = name.to_string();
        self.run(move |conn| {
            let tourist = Tourist {
                id: 0,
                name,
                safety_score: SafetyScore::MAX,
                is_active: true,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO tourists (name, safety_score, is_active, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![tourist.name, tourist.safety_score.value(), tourist.is_active, ts(&tourist.created_at)],
            )?;
            Ok(Tourist {
                id: conn.last_insert_rowid(),
                ..tourist
            })
        })
        .await
    }

    async fn insert_zone(&self, zone: &Zone) -> Result<Zone> {
        let zone = zone.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO zones (name, kind, polygon, danger_level, buffer_meters, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    zone.name,
                    zone.kind.as_str(),
                    serde_json::to_string(&zone.polygon)?,
                    zone.danger_level,
                    zone.buffer_meters,
                    zone.is_active,
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Stored {} zone '{}' as {}", zone.kind.as_str(), zone.name, id);
            Ok(Zone { id, ..zone })
        })
        .await
    }

    async fn insert_location(&self, location: &NewLocation) -> Result<LocationPoint> {
        let location = location.clone();
        self.run(move |conn| {
            require_tourist(conn, location.tourist_id)?;
            conn.execute(
                "INSERT INTO locations
                 (tourist_id, latitude, longitude, speed, altitude, accuracy, heading, timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    location.tourist_id,
                    location.latitude,
                    location.longitude,
                    location.speed,
                    location.altitude,
                    location.accuracy,
                    location.heading,
                    ts(&location.timestamp),
                    ts(&Utc::now()),
                ],
            )?;
            Ok(location.into_point(conn.last_insert_rowid()))
        })
        .await
    }

    async fn update_tourist_safety_score(&self, id: TouristId, score: SafetyScore) -> Result<()> {
        self.run(move |conn| write_score(conn, id, score)).await
    }

    async fn insert_assessment(&self, assessment: &NewAssessment) -> Result<Assessment> {
        let assessment = assessment.clone();
        self.run(move |conn| write_assessment(conn, &assessment)).await
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert> {
        let alert = alert.clone();
        self.run(move |conn| {
            require_tourist(conn, alert.tourist_id)?;
            write_alert(conn, &alert)
        })
        .await
    }

    async fn commit_assessment(&self, assessment: &NewAssessment, alerts: &[NewAlert]) -> Result<CommittedAssessment> {
        let assessment = assessment.clone();
        let alerts = alerts.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let stored = write_assessment(&tx, &assessment)?;
            write_score(&tx, assessment.tourist_id, assessment.safety_score)?;
            let stored_alerts = alerts
                .iter()
                .map(|alert| write_alert(&tx, alert))
                .collect::<Result<Vec<_>>>()?;
            tx.execute(
                "DELETE FROM location_claims WHERE location_id = ?1",
                params![assessment.location_id],
            )?;

            tx.commit()?;
            Ok(CommittedAssessment {
                assessment: stored,
                alerts: stored_alerts,
            })
        })
        .await
    }

    async fn commit_sos(&self, tourist_id: TouristId, score: SafetyScore, alert: &NewAlert) -> Result<Alert> {
        let alert = alert.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            write_score(&tx, tourist_id, score)?;
            let stored = write_alert(&tx, &alert)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn get_training_window(&self, model_type: ModelType, days_back: u32, limit: usize) -> Result<Vec<TrainingRow>> {
        let since = Utc::now() - chrono::Duration::days(days_back as i64);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {}, t.safety_score,
                        (SELECT COUNT(*) FROM alerts a WHERE a.tourist_id = l.tourist_id AND a.status = 'active')
                 FROM locations l JOIN tourists t ON t.id = l.tourist_id
                 WHERE l.timestamp >= ?1
                 ORDER BY l.timestamp DESC, l.id DESC LIMIT ?2",
                LOCATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params![ts(&since), limit as i64], |row| {
                    Ok(TrainingRow {
                        point: location_from_row(row)?,
                        safety_score: score_at(row, 9)?,
                        active_alerts: row.get::<_, i64>(10)?.max(0) as u32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.reverse();
            debug!("Training window for {}: {} rows over {} days", model_type, rows.len(), days_back);
            Ok(rows)
        })
        .await
    }

    async fn unassessed_locations(
        &self,
        since: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LocationPoint>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM locations l
                 LEFT JOIN assessments a ON a.location_id = l.id
                 LEFT JOIN location_claims c ON c.location_id = l.id
                 WHERE l.created_at >= ?1 AND a.id IS NULL
                   AND (c.location_id IS NULL OR c.claimed_at < ?2)
                 ORDER BY l.timestamp ASC, l.id ASC LIMIT ?3",
                LOCATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let points = stmt
                .query_map(params![ts(&since), ts(&stale_before), limit as i64], location_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(points)
        })
        .await
    }

    async fn claim_location(&self, id: LocationId, stale_before: DateTime<Utc>) -> Result<bool> {
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT INTO location_claims (location_id, claimed_at)
                 SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM assessments WHERE location_id = ?1)
                 ON CONFLICT(location_id) DO UPDATE SET claimed_at = excluded.claimed_at
                 WHERE location_claims.claimed_at < ?3",
                params![id, ts(&Utc::now()), ts(&stale_before)],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release_claim(&self, id: LocationId) -> Result<()> {
        self.run(move |conn| {
            conn.execute("DELETE FROM location_claims WHERE location_id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn get_assessment_for_location(&self, location_id: LocationId) -> Result<Option<Assessment>> {
        self.run(move |conn| {
            let assessment = conn
                .query_row(
                    &format!("SELECT {} FROM assessments WHERE location_id = ?1", ASSESSMENT_COLUMNS),
                    params![location_id],
                    assessment_from_row,
                )
                .optional()?;
            Ok(assessment)
        })
        .await
    }

    async fn get_alerts(&self, tourist_id: TouristId) -> Result<Vec<Alert>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM alerts WHERE tourist_id = ?1 ORDER BY id",
                ALERT_COLUMNS
            ))?;
            let alerts = stmt
                .query_map(params![tourist_id], alert_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(alerts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn square(lon: f64, lat: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            [lon, lat],
            [lon + size, lat],
            [lon + size, lat + size],
            [lon, lat + size],
        ])
        .unwrap()
    }

    fn assessment_for(point: &LocationPoint, score: i64) -> NewAssessment {
        let safety_score = SafetyScore::clamped(score);
        let severity = SafetyTier::from_score(safety_score);
        NewAssessment {
            tourist_id: point.tourist_id,
            location_id: point.id,
            safety_score,
            severity,
            geofence_alert: false,
            anomaly_score: 0.0,
            temporal_risk_score: 0.0,
            confidence: 0.77,
            recommended_action: severity.recommended_action(),
            model_versions: BTreeMap::from([("isolation_forest".to_string(), "untrained".to_string())]),
            created_at: Utc::now(),
        }
    }

    fn alert_for(tourist_id: TouristId) -> NewAlert {
        NewAlert {
            tourist_id,
            alert_type: AlertType::LowSafetyScore,
            severity: AlertSeverity::High,
            message: "Safety score dropped to 30".into(),
            description: None,
            latitude: None,
            longitude: None,
            auto_generated: true,
            ai_confidence: Some(0.77),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_tourist_and_location_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Asha").await.unwrap();
        assert_eq!(tourist.safety_score, SafetyScore::MAX);

        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let stored = db
            .insert_location(&NewLocation::new(tourist.id, 28.6, 77.2, at).unwrap().with_speed(1.2))
            .await
            .unwrap();

        let loaded = db.get_location(stored.id).await.unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(db.get_tourist(tourist.id).await.unwrap().name, "Asha");
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_tourist(9).await, Err(SafetyError::NotFound(_))));
        assert!(matches!(db.get_location(9).await, Err(SafetyError::NotFound(_))));

        let orphan = NewLocation::new(9, 1.0, 1.0, Utc::now()).unwrap();
        assert!(matches!(db.insert_location(&orphan).await, Err(SafetyError::NotFound(_))));
        assert!(matches!(
            db.update_tourist_safety_score(9, SafetyScore::MIN).await,
            Err(SafetyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_query_is_ascending_and_bounded() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Ben").await.unwrap();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

        // Inserted out of order on purpose
        for minute in [4, 0, 3, 1, 2] {
            let at = base + chrono::Duration::minutes(minute);
            db.insert_location(&NewLocation::new(tourist.id, 10.0, 10.0 + minute as f64 * 0.001, at).unwrap())
                .await
                .unwrap();
        }

        let latest = db.get_recent_locations(tourist.id, HistoryQuery::latest(3)).await.unwrap();
        let minutes: Vec<i64> = latest.iter().map(|p| (p.timestamp - base).num_minutes()).collect();
        assert_eq!(minutes, vec![2, 3, 4]);

        let bounded = db
            .get_recent_locations(tourist.id, HistoryQuery::up_to(base + chrono::Duration::minutes(2), 10))
            .await
            .unwrap();
        assert_eq!(bounded.len(), 3);
        assert!(bounded.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_zones_filtering() {
        let db = Database::open_in_memory().unwrap();
        let restricted = Zone::restricted("Border Area", square(77.0, 28.0, 0.1), 5, 50.0).unwrap();
        let mut closed = Zone::safe("Closed Park", square(77.5, 28.5, 0.1)).unwrap();
        closed.is_active = false;

        let stored = db.insert_zone(&restricted).await.unwrap();
        db.insert_zone(&closed).await.unwrap();

        let active = db.get_zones(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, stored.id);
        assert_eq!(active[0].danger_level, Some(5));
        assert_eq!(active[0].polygon, restricted.polygon);
        assert_eq!(db.get_zones(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_assessment_is_atomic() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Chen").await.unwrap();
        let point = db
            .insert_location(&NewLocation::new(tourist.id, 1.0, 1.0, Utc::now()).unwrap())
            .await
            .unwrap();

        let committed = db
            .commit_assessment(&assessment_for(&point, 30), &[alert_for(tourist.id)])
            .await
            .unwrap();
        assert_eq!(committed.alerts.len(), 1);
        assert_eq!(db.get_tourist(tourist.id).await.unwrap().safety_score.value(), 30);

        let loaded = db.get_assessment_for_location(point.id).await.unwrap().unwrap();
        assert_eq!(loaded.severity, SafetyTier::Critical);
        assert_eq!(loaded.model_versions.get("isolation_forest").map(String::as_str), Some("untrained"));

        // Second assessment of the same location is rejected and writes nothing
        let again = db.commit_assessment(&assessment_for(&point, 90), &[alert_for(tourist.id)]).await;
        assert!(matches!(again, Err(SafetyError::InvalidInput(_))));
        assert_eq!(db.get_tourist(tourist.id).await.unwrap().safety_score.value(), 30);
        assert_eq!(db.get_alerts(tourist.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_score() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Dana").await.unwrap();
        let point = db
            .insert_location(&NewLocation::new(tourist.id, 1.0, 1.0, Utc::now()).unwrap())
            .await
            .unwrap();

        db.execute_raw("DROP TABLE alerts;").unwrap();

        let result = db.commit_assessment(&assessment_for(&point, 20), &[alert_for(tourist.id)]).await;
        assert!(matches!(result, Err(SafetyError::Store(_))));
        assert_eq!(db.get_tourist(tourist.id).await.unwrap().safety_score, SafetyScore::MAX);
        assert!(db.get_assessment_for_location(point.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claims_are_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Eli").await.unwrap();
        let since = Utc::now() - chrono::Duration::seconds(5);
        let cutoff = Utc::now() - chrono::Duration::seconds(60);
        let a = db
            .insert_location(&NewLocation::new(tourist.id, 1.0, 1.0, Utc::now()).unwrap())
            .await
            .unwrap();
        let b = db
            .insert_location(&NewLocation::new(tourist.id, 1.0, 1.001, Utc::now()).unwrap())
            .await
            .unwrap();

        assert_eq!(db.unassessed_locations(since, cutoff, 10).await.unwrap().len(), 2);

        assert!(db.claim_location(a.id, cutoff).await.unwrap());
        assert!(!db.claim_location(a.id, cutoff).await.unwrap());
        let pending = db.unassessed_locations(since, cutoff, 10).await.unwrap();
        assert_eq!(pending.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b.id]);

        db.release_claim(a.id).await.unwrap();
        assert_eq!(db.unassessed_locations(since, cutoff, 10).await.unwrap().len(), 2);

        // An assessed location can never be claimed again
        db.commit_assessment(&assessment_for(&b, 95), &[]).await.unwrap();
        assert!(!db.claim_location(b.id, Utc::now() + chrono::Duration::hours(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_abandoned_claim_expires() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Gil").await.unwrap();
        let since = Utc::now() - chrono::Duration::seconds(5);
        let point = db
            .insert_location(&NewLocation::new(tourist.id, 2.0, 2.0, Utc::now()).unwrap())
            .await
            .unwrap();

        let live = Utc::now() - chrono::Duration::seconds(60);
        assert!(db.claim_location(point.id, live).await.unwrap());
        assert!(db.unassessed_locations(since, live, 10).await.unwrap().is_empty());

        // Once the lease has run out the location is visible and claimable again
        let expired = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(db.unassessed_locations(since, expired, 10).await.unwrap().len(), 1);
        assert!(db.claim_location(point.id, expired).await.unwrap());
        assert!(!db.claim_location(point.id, live).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_clears_claim() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Hal").await.unwrap();
        let point = db
            .insert_location(&NewLocation::new(tourist.id, 3.0, 3.0, Utc::now()).unwrap())
            .await
            .unwrap();

        assert!(db.claim_location(point.id, Utc::now() - chrono::Duration::seconds(60)).await.unwrap());
        db.commit_assessment(&assessment_for(&point, 88), &[]).await.unwrap();

        let claims: i64 = db
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM location_claims", [], |row| row.get(0))
            .unwrap();
        assert_eq!(claims, 0);
    }

    #[tokio::test]
    async fn test_training_window_carries_context() {
        let db = Database::open_in_memory().unwrap();
        let tourist = db.insert_tourist("Fay").await.unwrap();
        for i in 0..4 {
            let at = Utc::now() - chrono::Duration::minutes(10 - i);
            db.insert_location(&NewLocation::new(tourist.id, 5.0, 5.0 + i as f64 * 0.001, at).unwrap())
                .await
                .unwrap();
        }
        let stale = Utc::now() - chrono::Duration::days(3);
        db.insert_location(&NewLocation::new(tourist.id, 5.0, 5.0, stale).unwrap()).await.unwrap();
        db.insert_alert(&alert_for(tourist.id)).await.unwrap();

        let rows = db.get_training_window(ModelType::IsolationForest, 1, 5000).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.windows(2).all(|w| w[0].point.timestamp <= w[1].point.timestamp));
        assert!(rows.iter().all(|r| r.active_alerts == 1));

        let capped = db.get_training_window(ModelType::Temporal, 1, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[1].point.timestamp, rows[3].point.timestamp);
    }

    #[tokio::test]
    async fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        db.insert_tourist("Gil").await.unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.tourists, 1);
        assert_eq!(stats.locations, 0);
    }
}
