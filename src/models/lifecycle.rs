// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Model lifecycle - periodic retraining and atomic publication of fitted models

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::{ModelState, ModelStore, ModelType};
use crate::analysis::{FeatureExtractor, FeatureVector, IsolationModel, MovementProfile, TemporalThresholds};
use crate::config::{AnomalyConfig, Config, LifecycleConfig};
use crate::core::{EventBus, LocationPoint, TouristId};
use crate::db::{SafetyStore, TrainingRow};
use crate::error::{Result, SafetyError};
use crate::geo::{GeofenceEvaluator, Zone};

/// Version recorded on assessments made without a fitted model
pub const UNTRAINED_VERSION: &str = "untrained";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelPhase {
    Untrained,
    Trained,
    Retraining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NotDue,
    InsufficientData,
    AlreadyRunning,
}

/// Result of one retrain request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainOutcome {
    Trained { version: String, samples: usize },
    Skipped(SkipReason),
    Failed(String),
}

impl RetrainOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RetrainOutcome::Failed(_))
    }
}

/// Per-model status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub phase: ModelPhase,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub seconds_since_training: Option<i64>,
    pub next_due: Option<DateTime<Utc>>,
    pub samples: usize,
    pub version: Option<String>,
}

/// Clears the running flag for a model type when training ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the fitted models. Readers clone the published `Arc`; a retrain
/// builds a complete new state and swaps it in, so inference never sees a
/// half-updated model.
pub struct ModelLifecycleManager {
    config: LifecycleConfig,
    anomaly: AnomalyConfig,
    extractor: FeatureExtractor,
    store: Arc<dyn SafetyStore>,
    model_store: Option<Arc<dyn ModelStore>>,
    event_bus: Option<Arc<EventBus>>,
    isolation: RwLock<Option<Arc<ModelState<IsolationModel>>>>,
    temporal: RwLock<Option<Arc<ModelState<TemporalThresholds>>>>,
    running: [AtomicBool; 2],
}

impl ModelLifecycleManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn SafetyStore>,
        model_store: Option<Arc<dyn ModelStore>>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            config: config.lifecycle.clone(),
            anomaly: config.anomaly.clone(),
            extractor: FeatureExtractor::new(config.features.clone()),
            store,
            model_store,
            event_bus,
            isolation: RwLock::new(None),
            temporal: RwLock::new(None),
            running: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    pub fn isolation_model(&self) -> Option<Arc<ModelState<IsolationModel>>> {
        self.isolation.read().clone()
    }

    pub fn temporal_thresholds(&self) -> Option<Arc<ModelState<TemporalThresholds>>> {
        self.temporal.read().clone()
    }

    pub fn install_isolation_model(&self, state: ModelState<IsolationModel>) {
        *self.isolation.write() = Some(Arc::new(state));
    }

    pub fn install_temporal_thresholds(&self, state: ModelState<TemporalThresholds>) {
        *self.temporal.write() = Some(Arc::new(state));
    }

    fn published(&self, model_type: ModelType) -> Option<(DateTime<Utc>, String, usize)> {
        match model_type {
            ModelType::IsolationForest => self
                .isolation
                .read()
                .as_ref()
                .map(|s| (s.trained_at, s.version.clone(), s.samples)),
            ModelType::Temporal => self
                .temporal
                .read()
                .as_ref()
                .map(|s| (s.trained_at, s.version.clone(), s.samples)),
        }
    }

    pub fn last_trained_at(&self, model_type: ModelType) -> Option<DateTime<Utc>> {
        self.published(model_type).map(|(at, _, _)| at)
    }

    /// Version of every model type, `untrained` where none is published.
    pub fn model_versions(&self) -> BTreeMap<String, String> {
        ModelType::ALL
            .iter()
            .map(|t| {
                let version = self
                    .published(*t)
                    .map(|(_, v, _)| v)
                    .unwrap_or_else(|| UNTRAINED_VERSION.to_string());
                (t.as_str().to_string(), version)
            })
            .collect()
    }

    pub fn phase(&self, model_type: ModelType) -> ModelPhase {
        if self.running[model_type.index()].load(Ordering::Acquire) {
            ModelPhase::Retraining
        } else if self.published(model_type).is_some() {
            ModelPhase::Trained
        } else {
            ModelPhase::Untrained
        }
    }

    fn interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.retrain_interval_secs as i64)
    }

    pub fn is_due(&self, model_type: ModelType, now: DateTime<Utc>) -> bool {
        match self.last_trained_at(model_type) {
            Some(at) => now - at >= self.interval(),
            None => true,
        }
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        let now = Utc::now();
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let published = self.published(model_type);
                ModelStatus {
                    model_type,
                    phase: self.phase(model_type),
                    last_trained_at: published.as_ref().map(|(at, _, _)| *at),
                    seconds_since_training: published.as_ref().map(|(at, _, _)| (now - *at).num_seconds()),
                    next_due: published.as_ref().map(|(at, _, _)| *at + self.interval()),
                    samples: published.as_ref().map(|(_, _, n)| *n).unwrap_or(0),
                    version: published.map(|(_, v, _)| v),
                }
            })
            .collect()
    }

    /// Retrain `model_type` over the scheduled window if its interval has lapsed.
    pub async fn check_and_retrain(&self, model_type: ModelType) -> Result<RetrainOutcome> {
        if !self.is_due(model_type, Utc::now()) {
            debug!("{} model not due for retraining", model_type);
            return Ok(RetrainOutcome::Skipped(SkipReason::NotDue));
        }
        self.retrain(model_type, self.config.days_back).await
    }

    /// One pass of the training loop over every model type.
    pub async fn check_all(&self) -> Result<Vec<(ModelType, RetrainOutcome)>> {
        let mut outcomes = Vec::with_capacity(ModelType::ALL.len());
        for model_type in ModelType::ALL {
            outcomes.push((model_type, self.check_and_retrain(model_type).await?));
        }
        Ok(outcomes)
    }

    /// Retrain every model type over the wider forced window, ignoring the interval.
    pub async fn force_retrain_all(&self) -> Result<Vec<(ModelType, RetrainOutcome)>> {
        info!("Forcing retrain of all models over {} days", self.config.force_days_back);
        let mut outcomes = Vec::with_capacity(ModelType::ALL.len());
        for model_type in ModelType::ALL {
            outcomes.push((model_type, self.retrain(model_type, self.config.force_days_back).await?));
        }
        Ok(outcomes)
    }

    async fn retrain(&self, model_type: ModelType, days_back: u32) -> Result<RetrainOutcome> {
        let flag = &self.running[model_type.index()];
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} retrain already running, skipping", model_type);
            return Ok(RetrainOutcome::Skipped(SkipReason::AlreadyRunning));
        }
        let _guard = RunningGuard(flag);

        let rows = self
            .store
            .get_training_window(model_type, days_back, self.config.row_limit)
            .await?;

        if rows.len() < self.config.min_data_points {
            warn!(
                "Insufficient data for {}: {} rows, need {}",
                model_type,
                rows.len(),
                self.config.min_data_points
            );
            return Ok(RetrainOutcome::Skipped(SkipReason::InsufficientData));
        }

        info!("Retraining {} model on {} rows", model_type, rows.len());

        let outcome = match model_type {
            ModelType::IsolationForest => {
                let zones = self.store.get_zones(true).await?;
                let extractor = self.extractor.clone();
                let anomaly = self.anomaly.clone();
                let min_rows = self.config.min_data_points;
                let fitted = fit_blocking(move || {
                    let vectors = training_vectors(&extractor, &zones, &rows);
                    let samples = vectors.iter().filter(|v| !v.is_degenerate()).count();
                    IsolationModel::fit(&vectors, &anomaly, min_rows).map(|model| (model, samples))
                })
                .await;

                match fitted {
                    Ok((model, samples)) => {
                        let state = ModelState::new(model_type, model, samples, Utc::now());
                        let version = state.version.clone();
                        self.persist(model_type, &state).await;
                        *self.isolation.write() = Some(Arc::new(state));
                        RetrainOutcome::Trained { version, samples }
                    }
                    Err(e) => RetrainOutcome::Failed(e.to_string()),
                }
            }
            ModelType::Temporal => {
                let fitted = fit_blocking(move || {
                    let profiles: Vec<MovementProfile> = group_by_tourist(&rows)
                        .values()
                        .filter_map(|points| MovementProfile::from_points(points))
                        .collect();
                    TemporalThresholds::fit(&profiles)
                })
                .await;

                match fitted {
                    Ok(thresholds) => {
                        let samples = thresholds.profiles;
                        let state = ModelState::new(model_type, thresholds, samples, Utc::now());
                        let version = state.version.clone();
                        self.persist(model_type, &state).await;
                        *self.temporal.write() = Some(Arc::new(state));
                        RetrainOutcome::Trained { version, samples }
                    }
                    Err(e) => RetrainOutcome::Failed(e.to_string()),
                }
            }
        };

        match &outcome {
            RetrainOutcome::Trained { version, samples } => {
                info!("{} model trained: version {}, {} samples", model_type, version, samples);
                if let Some(bus) = &self.event_bus {
                    bus.publish_model_trained(model_type.as_str(), version, *samples);
                }
            }
            RetrainOutcome::Failed(reason) => {
                error!("{} retrain failed, keeping previous model: {}", model_type, reason);
                if let Some(bus) = &self.event_bus {
                    bus.publish_error(&format!("{} retrain failed: {}", model_type, reason));
                }
            }
            RetrainOutcome::Skipped(_) => {}
        }

        Ok(outcome)
    }

    async fn persist<T: Serialize + Sync>(&self, model_type: ModelType, state: &ModelState<T>) {
        let Some(model_store) = &self.model_store else {
            return;
        };
        let blob = match bincode::serialize(state) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Could not serialize {} model: {}", model_type, e);
                return;
            }
        };
        if let Err(e) = model_store.save_model_blob(model_type, blob).await {
            warn!("Could not persist {} model: {}", model_type, e);
        }
    }

    /// Restore previously saved models. Returns how many were loaded; an
    /// unreadable blob is skipped.
    pub async fn load_persisted(&self) -> Result<usize> {
        let Some(model_store) = &self.model_store else {
            return Ok(0);
        };

        let mut loaded = 0;
        for model_type in ModelType::ALL {
            let Some(blob) = model_store.load_model_blob(model_type).await? else {
                continue;
            };
            let restored = match model_type {
                ModelType::IsolationForest => decode::<IsolationModel>(&blob).map(|s| self.install_isolation_model(s)),
                ModelType::Temporal => decode::<TemporalThresholds>(&blob).map(|s| self.install_temporal_thresholds(s)),
            };
            match restored {
                Ok(()) => {
                    loaded += 1;
                    info!("Restored persisted {} model", model_type);
                }
                Err(e) => warn!("Ignoring unreadable {} model blob: {}", model_type, e),
            }
        }
        Ok(loaded)
    }
}

fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<ModelState<T>> {
    Ok(bincode::deserialize(blob)?)
}

async fn fit_blocking<T, F>(fit: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(fit)
        .await
        .map_err(|e| SafetyError::Computation(format!("training task failed: {}", e)))?
}

fn group_by_tourist(rows: &[TrainingRow]) -> HashMap<TouristId, Vec<LocationPoint>> {
    let mut grouped: HashMap<TouristId, Vec<LocationPoint>> = HashMap::new();
    for row in rows {
        grouped.entry(row.point.tourist_id).or_default().push(row.point.clone());
    }
    for points in grouped.values_mut() {
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    }
    grouped
}

/// One feature vector per training row, each built from the rows of the
/// same tourist that precede it.
fn training_vectors(extractor: &FeatureExtractor, zones: &[Zone], rows: &[TrainingRow]) -> Vec<FeatureVector> {
    let evaluator = &GeofenceEvaluator::new();
    let window = extractor.history_window();

    group_by_tourist(rows)
        .values()
        .flat_map(|points| {
            (0..points.len()).map(move |i| {
                let point = &points[i];
                let history = &points[i.saturating_sub(window)..i];
                let zone_risk = evaluator.evaluate(point.latitude, point.longitude, zones).zone_risk_score();
                extractor.extract(history, point, zone_risk)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventPayload, NewLocation};
    use crate::db::Database;
    use crate::models::FileModelStore;

    async fn seed(db: &Database, tourists: usize, points_each: usize) {
        for t in 0..tourists {
            let tourist = db.insert_tourist(&format!("tourist-{}", t)).await.unwrap();
            for i in 0..points_each {
                let at = Utc::now() - chrono::Duration::minutes((points_each - i) as i64);
                // ~4 km/h walk with a per-tourist heading
                let step = 0.0006 * i as f64;
                let lat = 28.6 + step * (t as f64 * 0.3).cos();
                let lon = 77.2 + step * (t as f64 * 0.3).sin();
                db.insert_location(&NewLocation::new(tourist.id, lat, lon, at).unwrap())
                    .await
                    .unwrap();
            }
        }
    }

    fn manager(db: Arc<Database>) -> ModelLifecycleManager {
        ModelLifecycleManager::new(&Config::default(), db, None, None)
    }

    #[tokio::test]
    async fn test_insufficient_data_skips() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 3, 8).await;
        let lifecycle = manager(db);

        let outcomes = lifecycle.force_retrain_all().await.unwrap();
        for (_, outcome) in &outcomes {
            assert_eq!(*outcome, RetrainOutcome::Skipped(SkipReason::InsufficientData));
        }
        assert!(lifecycle.isolation_model().is_none());
        assert!(lifecycle.temporal_thresholds().is_none());
        assert_eq!(lifecycle.phase(ModelType::IsolationForest), ModelPhase::Untrained);
    }

    #[tokio::test]
    async fn test_trains_then_waits_for_interval() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 6, 8).await;
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe_events();
        let lifecycle = ModelLifecycleManager::new(&Config::default(), db, None, Some(bus));

        let outcome = lifecycle.check_and_retrain(ModelType::IsolationForest).await.unwrap();
        match outcome {
            RetrainOutcome::Trained { samples, .. } => assert_eq!(samples, 36),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(lifecycle.phase(ModelType::IsolationForest), ModelPhase::Trained);
        assert!(matches!(events.recv().await.unwrap().payload, EventPayload::ModelTrained { .. }));

        assert_eq!(
            lifecycle.check_and_retrain(ModelType::IsolationForest).await.unwrap(),
            RetrainOutcome::Skipped(SkipReason::NotDue)
        );

        let temporal = lifecycle.check_and_retrain(ModelType::Temporal).await.unwrap();
        assert_eq!(
            temporal,
            RetrainOutcome::Trained {
                version: lifecycle.temporal_thresholds().unwrap().version.clone(),
                samples: 6,
            }
        );
        assert!(lifecycle.model_versions().values().all(|v| v != UNTRAINED_VERSION));
    }

    #[tokio::test]
    async fn test_due_retrain_below_minimum_keeps_trained_model() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 6, 8).await;
        let mut config = Config::default();
        config.lifecycle.retrain_interval_secs = 0;
        let lifecycle = ModelLifecycleManager::new(&config, db.clone(), None, None);

        for model_type in ModelType::ALL {
            let outcome = lifecycle.check_and_retrain(model_type).await.unwrap();
            assert!(matches!(outcome, RetrainOutcome::Trained { .. }), "{:?}", outcome);
        }
        let trained_at: Vec<_> = ModelType::ALL.iter().map(|t| lifecycle.last_trained_at(*t)).collect();
        let versions = lifecycle.model_versions();

        // Shrink the window to one row under the minimum
        let keep = config.lifecycle.min_data_points - 1;
        db.execute_raw(&format!("DELETE FROM locations WHERE id > {};", keep)).unwrap();

        for model_type in ModelType::ALL {
            assert!(lifecycle.is_due(model_type, Utc::now()));
            assert_eq!(
                lifecycle.check_and_retrain(model_type).await.unwrap(),
                RetrainOutcome::Skipped(SkipReason::InsufficientData)
            );
            assert_eq!(lifecycle.phase(model_type), ModelPhase::Trained);
        }
        let after: Vec<_> = ModelType::ALL.iter().map(|t| lifecycle.last_trained_at(*t)).collect();
        assert_eq!(after, trained_at);
        assert_eq!(lifecycle.model_versions(), versions);
    }

    #[tokio::test]
    async fn test_failed_fit_keeps_previous_state() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        // One point per tourist: every feature vector is degenerate
        seed(&db, 30, 1).await;
        let lifecycle = manager(db);

        let previous = ModelState::new(
            ModelType::Temporal,
            TemporalThresholds {
                speed_variance_p90: 7.5,
                time_regularity_p10: 0.6,
                avg_speed_p95: 5.0,
                profiles: 12,
            },
            12,
            Utc::now() - chrono::Duration::hours(1),
        );
        let previous_version = previous.version.clone();
        lifecycle.install_temporal_thresholds(previous);

        let outcomes = lifecycle.force_retrain_all().await.unwrap();
        assert!(outcomes.iter().all(|(_, o)| o.is_failed()));
        assert!(lifecycle.isolation_model().is_none());
        assert_eq!(lifecycle.temporal_thresholds().unwrap().version, previous_version);
    }

    #[tokio::test]
    async fn test_concurrent_retrains_coalesce() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 6, 8).await;
        let lifecycle = manager(db);

        let (a, b) = tokio::join!(
            lifecycle.check_and_retrain(ModelType::IsolationForest),
            lifecycle.check_and_retrain(ModelType::IsolationForest)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let trained = outcomes.iter().filter(|o| matches!(o, RetrainOutcome::Trained { .. })).count();
        let skipped = outcomes
            .iter()
            .filter(|o| **o == RetrainOutcome::Skipped(SkipReason::AlreadyRunning))
            .count();
        assert_eq!((trained, skipped), (1, 1));
        assert_eq!(lifecycle.phase(ModelType::IsolationForest), ModelPhase::Trained);
    }

    #[tokio::test]
    async fn test_persisted_models_reload() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 6, 8).await;
        let dir = std::env::temp_dir().join(format!("tourguard-lifecycle-{}", uuid::Uuid::new_v4()));
        let model_store: Arc<dyn ModelStore> = Arc::new(FileModelStore::new(&dir));

        let first = ModelLifecycleManager::new(&Config::default(), db.clone(), Some(model_store.clone()), None);
        first.force_retrain_all().await.unwrap();

        let second = ModelLifecycleManager::new(&Config::default(), db, Some(model_store), None);
        assert_eq!(second.load_persisted().await.unwrap(), 2);
        assert_eq!(second.model_versions(), first.model_versions());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_status_reports_due_time() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, 6, 8).await;
        let lifecycle = manager(db);
        lifecycle.check_and_retrain(ModelType::Temporal).await.unwrap();

        let status = lifecycle.status();
        let temporal = status.iter().find(|s| s.model_type == ModelType::Temporal).unwrap();
        let trained_at = temporal.last_trained_at.unwrap();
        assert_eq!(temporal.next_due, Some(trained_at + chrono::Duration::seconds(300)));
        assert_eq!(temporal.samples, 6);

        let isolation = status.iter().find(|s| s.model_type == ModelType::IsolationForest).unwrap();
        assert_eq!(isolation.phase, ModelPhase::Untrained);
        assert!(isolation.version.is_none());
    }
}
