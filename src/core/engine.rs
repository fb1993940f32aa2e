// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Safety engine - runs each location through geofence, anomaly and temporal
//! scoring, fuses the result and commits it

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{EngineStats, EventBus, LocationId, LocationPoint, NewLocation, SafetyScore, Scheduler, TouristId};
use crate::analysis::{
    AnomalyAssessment, AnomalyScorer, FeatureExtractor, TemporalAssessment, TemporalRiskAnalyzer, CONFIDENCE_FAULT,
    TEMPORAL_FAULT_CONFIDENCE,
};
use crate::config::Config;
use crate::db::{HistoryQuery, SafetyStore};
use crate::detection::{Alert, Assessment, FusionInputs, NewAssessment, PenaltyBreakdown, SafetyTier, ScoreFusion};
use crate::error::{Result, SafetyError};
use crate::geo::{GeofenceEvaluator, GeofenceResult, ZoneCache};
use crate::models::{ModelLifecycleManager, ModelStore, ModelType, RetrainOutcome, UNTRAINED_VERSION};

/// Everything produced by one committed assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub assessment: Assessment,
    pub alerts: Vec<Alert>,
    pub geofence: GeofenceResult,
    pub anomaly: AnomalyAssessment,
    pub temporal: TemporalAssessment,
    pub penalties: PenaltyBreakdown,
    /// Inference exceeded its budget or crashed and the fallback path was used
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentOutcome {
    Assessed(Box<AssessmentReport>),
    /// Another worker holds the claim or the location is already assessed
    AlreadyClaimed(LocationId),
}

impl AssessmentOutcome {
    pub fn report(&self) -> Option<&AssessmentReport> {
        match self {
            AssessmentOutcome::Assessed(report) => Some(report),
            AssessmentOutcome::AlreadyClaimed(_) => None,
        }
    }
}

/// Result of an SOS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosOutcome {
    pub tourist_id: TouristId,
    pub previous_score: SafetyScore,
    pub safety_score: SafetyScore,
    pub tier: SafetyTier,
    pub alert: Alert,
}

/// Counts for one batch of assessments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub assessed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn merge(&mut self, other: BatchSummary) {
        self.assessed += other.assessed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

type TouristLocks = Mutex<HashMap<TouristId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one tourist's assessment lock. The map entry is removed when the
/// last holder drops.
struct TouristGuard<'a> {
    locks: &'a TouristLocks,
    tourist_id: TouristId,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for TouristGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        let idle = locks
            .get(&self.tourist_id)
            .map_or(false, |current| Arc::ptr_eq(current, &self.lock) && Arc::strong_count(&self.lock) == 2);
        if idle {
            locks.remove(&self.tourist_id);
        }
    }
}

/// Main safety engine, built once and shared as `Arc`
pub struct SafetyEngine {
    config: Arc<Config>,
    store: Arc<dyn SafetyStore>,
    lifecycle: Arc<ModelLifecycleManager>,
    event_bus: Arc<EventBus>,
    zones: ZoneCache,
    extractor: FeatureExtractor,
    geofence: GeofenceEvaluator,
    scorer: AnomalyScorer,
    temporal: TemporalRiskAnalyzer,
    fusion: ScoreFusion,
    tourist_locks: TouristLocks,
    queue_tx: mpsc::Sender<LocationId>,
    queue_rx: Mutex<Option<mpsc::Receiver<LocationId>>>,
    stats: RwLock<EngineStats>,
}

impl SafetyEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn SafetyStore>,
        model_store: Option<Arc<dyn ModelStore>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let lifecycle = Arc::new(ModelLifecycleManager::new(
            &config,
            store.clone(),
            model_store,
            Some(event_bus.clone()),
        ));
        let (queue_tx, queue_rx) = mpsc::channel(config.realtime.queue_capacity.max(1));

        Self {
            zones: ZoneCache::new(config.geofence.zone_cache_ttl()),
            extractor: FeatureExtractor::new(config.features.clone()),
            geofence: GeofenceEvaluator::new(),
            scorer: AnomalyScorer::new(),
            temporal: TemporalRiskAnalyzer::new(config.temporal.clone()),
            fusion: ScoreFusion::from_config(&config),
            config: Arc::new(config),
            store,
            lifecycle,
            event_bus,
            tourist_locks: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Restore persisted models and, when configured, run the initial training.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing safety engine...");

        let restored = self.lifecycle.load_persisted().await?;
        info!("Restored {} persisted models", restored);

        if self.config.lifecycle.initial_training {
            match self.lifecycle.force_retrain_all().await {
                Ok(outcomes) => {
                    for (model_type, outcome) in outcomes {
                        info!("Initial training of {}: {:?}", model_type, outcome);
                    }
                }
                Err(e) => error!("Initial training failed: {}", e),
            }
        }

        info!("Safety engine initialized");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SafetyStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycleManager> {
        &self.lifecycle
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn zone_cache(&self) -> &ZoneCache {
        &self.zones
    }

    async fn lock_tourist(&self, tourist_id: TouristId) -> TouristGuard<'_> {
        let lock = self
            .tourist_locks
            .lock()
            .entry(tourist_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        TouristGuard {
            locks: &self.tourist_locks,
            tourist_id,
            lock,
            guard: Some(guard),
        }
    }

    /// Tourists with a per-tourist lock currently held or awaited.
    pub fn active_tourist_locks(&self) -> usize {
        self.tourist_locks.lock().len()
    }

    /// Store a location and queue it for assessment.
    pub async fn record_location(&self, location: NewLocation) -> Result<LocationPoint> {
        let point = self.store.insert_location(&location).await?;
        if let Err(e) = self.queue_tx.try_send(point.id) {
            // The sweep picks up anything the queue could not take
            warn!("Assessment queue rejected location {}: {}", point.id, e);
        }
        Ok(point)
    }

    /// Store a location and assess it before returning.
    pub async fn process_location_update(&self, location: NewLocation) -> Result<AssessmentOutcome> {
        let point = self.store.insert_location(&location).await?;
        self.assess_point(point).await
    }

    pub async fn assess_location(&self, location_id: LocationId) -> Result<AssessmentOutcome> {
        let point = self.store.get_location(location_id).await?;
        self.assess_point(point).await
    }

    async fn assess_point(&self, point: LocationPoint) -> Result<AssessmentOutcome> {
        let stale_before = self.config.realtime.claim_cutoff(Utc::now());
        if !self.store.claim_location(point.id, stale_before).await? {
            debug!("Location {} already claimed", point.id);
            return Ok(AssessmentOutcome::AlreadyClaimed(point.id));
        }

        let location_id = point.id;
        match self.assess_claimed(point).await {
            Ok(report) => Ok(AssessmentOutcome::Assessed(Box::new(report))),
            Err(e) => {
                self.stats.write().assessment_failures += 1;
                if let Err(release) = self.store.release_claim(location_id).await {
                    warn!(
                        "Could not release claim on location {}, retry after the {}s lease: {}",
                        location_id, self.config.realtime.claim_lease_secs, release
                    );
                }
                Err(e)
            }
        }
    }

    async fn assess_claimed(&self, point: LocationPoint) -> Result<AssessmentReport> {
        let _guard = self.lock_tourist(point.tourist_id).await;

        let tourist = self.store.get_tourist(point.tourist_id).await?;
        let history = self
            .store
            .get_recent_locations(
                point.tourist_id,
                HistoryQuery::up_to(point.timestamp, self.extractor.history_window() + 1),
            )
            .await?;
        let zones = self.zones.zones(self.store.as_ref()).await?;

        let geofence = self.geofence.evaluate(point.latitude, point.longitude, &zones);
        let (anomaly, temporal, model_versions, degraded) = self.infer(&history, &point, &geofence).await;

        let fused = self.fusion.fuse(FusionInputs {
            tourist_id: point.tourist_id,
            location: &point,
            geofence: &geofence,
            anomaly: &anomaly,
            temporal: &temporal,
        });

        let assessment = NewAssessment {
            tourist_id: point.tourist_id,
            location_id: point.id,
            safety_score: fused.score,
            severity: fused.tier,
            geofence_alert: geofence.in_restricted,
            anomaly_score: anomaly.anomaly_score,
            temporal_risk_score: temporal.risk_score,
            confidence: fused.confidence,
            recommended_action: fused.recommended_action.clone(),
            model_versions,
            created_at: Utc::now(),
        };

        let committed = self.store.commit_assessment(&assessment, &fused.alerts).await?;

        debug!(
            "Assessed location {} for tourist {}: score {} -> {} ({})",
            point.id, tourist.id, tourist.safety_score, fused.score, fused.tier
        );

        self.event_bus.publish_assessment(committed.assessment.clone());
        for alert in &committed.alerts {
            self.event_bus.publish_alert(alert.clone());
        }

        {
            let mut stats = self.stats.write();
            stats.assessments += 1;
            stats.alerts_emitted += committed.alerts.len() as u64;
            stats.last_assessment = Some(committed.assessment.created_at);
        }

        Ok(AssessmentReport {
            assessment: committed.assessment,
            alerts: committed.alerts,
            geofence,
            anomaly,
            temporal,
            penalties: fused.penalties,
            degraded,
        })
    }

    /// Feature extraction and both sub-models on the blocking pool, under
    /// the inference budget. Any fault or timeout yields the fallback pair.
    async fn infer(
        &self,
        history: &[LocationPoint],
        point: &LocationPoint,
        geofence: &GeofenceResult,
    ) -> (AnomalyAssessment, TemporalAssessment, BTreeMap<String, String>, bool) {
        let isolation = self.lifecycle.isolation_model();
        let thresholds = self.lifecycle.temporal_thresholds();

        let mut versions = BTreeMap::new();
        versions.insert(
            ModelType::IsolationForest.as_str().to_string(),
            isolation.as_ref().map_or_else(|| UNTRAINED_VERSION.to_string(), |s| s.version.clone()),
        );
        versions.insert(
            ModelType::Temporal.as_str().to_string(),
            thresholds.as_ref().map_or_else(|| UNTRAINED_VERSION.to_string(), |s| s.version.clone()),
        );

        let extractor = self.extractor.clone();
        let scorer = self.scorer.clone();
        let analyzer = self.temporal.clone();
        let history = history.to_vec();
        let point = point.clone();
        let zone_risk = geofence.zone_risk_score();

        let job = tokio::task::spawn_blocking(move || {
            let features = extractor.extract(&history, &point, zone_risk);
            let window = extractor.build_window(&history, &point);
            let anomaly = scorer.score(isolation.as_deref().map(|s| &s.model), &features);
            let temporal = analyzer.analyze(&window, point.timestamp, thresholds.as_deref().map(|s| &s.model));
            (anomaly, temporal)
        });

        match tokio::time::timeout(self.config.realtime.inference_timeout(), job).await {
            Ok(Ok((anomaly, temporal))) => (anomaly, temporal, versions, false),
            Ok(Err(e)) => {
                warn!("Inference task failed, using fallback scores: {}", e);
                (
                    AnomalyAssessment::fallback(CONFIDENCE_FAULT),
                    TemporalAssessment::fallback(TEMPORAL_FAULT_CONFIDENCE),
                    versions,
                    true,
                )
            }
            Err(_) => {
                warn!(
                    "Inference exceeded {:?}, using fallback scores",
                    self.config.realtime.inference_timeout()
                );
                (
                    AnomalyAssessment::fallback(CONFIDENCE_FAULT),
                    TemporalAssessment::fallback(TEMPORAL_FAULT_CONFIDENCE),
                    versions,
                    true,
                )
            }
        }
    }

    /// Assess a set of points. Points of one tourist run in timestamp order;
    /// different tourists run concurrently. Failures are logged and counted.
    pub async fn assess_batch(&self, points: Vec<LocationPoint>) -> BatchSummary {
        let mut by_tourist: BTreeMap<TouristId, Vec<LocationPoint>> = BTreeMap::new();
        for point in points {
            by_tourist.entry(point.tourist_id).or_default().push(point);
        }

        let runs = by_tourist.into_values().map(|mut points| async move {
            points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
            let mut summary = BatchSummary::default();
            for point in points {
                let location_id = point.id;
                match self.assess_point(point).await {
                    Ok(AssessmentOutcome::Assessed(_)) => summary.assessed += 1,
                    Ok(AssessmentOutcome::AlreadyClaimed(_)) => summary.skipped += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!("Assessment of location {} failed: {}", location_id, e);
                    }
                }
            }
            summary
        });

        let mut total = BatchSummary::default();
        for summary in join_all(runs).await {
            total.merge(summary);
        }
        total
    }

    /// Fallback pass over recently stored locations that nothing has claimed.
    pub async fn sweep_unassessed(&self) -> Result<BatchSummary> {
        let realtime = &self.config.realtime;
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(realtime.sweep_lookback_secs as i64);
        let pending = self
            .store
            .unassessed_locations(since, realtime.claim_cutoff(now), realtime.sweep_limit)
            .await?;
        if pending.is_empty() {
            return Ok(BatchSummary::default());
        }

        info!("Sweeping {} unassessed locations", pending.len());
        let summary = self.assess_batch(pending).await;
        if summary.failed > 0 {
            warn!("Sweep finished with {} failed assessments", summary.failed);
        }
        Ok(summary)
    }

    /// SOS bypasses fusion: fixed penalty plus an unconditional CRITICAL alert.
    pub async fn trigger_sos(
        &self,
        tourist_id: TouristId,
        position: Option<(f64, f64)>,
        message: Option<String>,
    ) -> Result<SosOutcome> {
        if let Some((latitude, longitude)) = position {
            super::validate_coordinates(latitude, longitude)?;
        }

        let _guard = self.lock_tourist(tourist_id).await;

        let tourist = self.store.get_tourist(tourist_id).await?;
        let resolution = self
            .fusion
            .sos(tourist_id, tourist.safety_score, position, message, Utc::now());
        let alert = self
            .store
            .commit_sos(tourist_id, resolution.score, &resolution.alert)
            .await?;

        warn!(
            "SOS from tourist {}: score {} -> {}",
            tourist_id, tourist.safety_score, resolution.score
        );
        self.event_bus.publish_alert(alert.clone());

        {
            let mut stats = self.stats.write();
            stats.sos_events += 1;
            stats.alerts_emitted += 1;
        }

        Ok(SosOutcome {
            tourist_id,
            previous_score: tourist.safety_score,
            safety_score: resolution.score,
            tier: resolution.tier,
            alert,
        })
    }

    /// One training-loop pass; a failed retrain fails the pass so the
    /// scheduler backs off.
    pub async fn training_pass(&self) -> Result<()> {
        let outcomes = self.lifecycle.check_all().await?;
        for (model_type, outcome) in outcomes {
            if let RetrainOutcome::Failed(reason) = outcome {
                return Err(SafetyError::Computation(format!("{} retrain failed: {}", model_type, reason)));
            }
        }
        Ok(())
    }

    /// Drain the work queue until shutdown.
    pub async fn run_queue(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let Some(mut rx) = self.queue_rx.lock().take() else {
            warn!("Assessment queue already has a consumer");
            return;
        };
        let batch_limit = self.config.realtime.sweep_limit.max(1);
        info!("Starting assessment queue...");

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(first) = received else { break };
                    let mut ids = vec![first];
                    while ids.len() < batch_limit {
                        match rx.try_recv() {
                            Ok(id) => ids.push(id),
                            Err(_) => break,
                        }
                    }
                    self.assess_queued(ids).await;
                }
                _ = shutdown.recv() => {
                    info!("Assessment queue shutting down...");
                    break;
                }
            }
        }
    }

    async fn assess_queued(&self, ids: Vec<LocationId>) {
        let mut points = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_location(id).await {
                Ok(point) => points.push(point),
                Err(e) => error!("Queued location {} could not be loaded: {}", id, e),
            }
        }
        let summary = self.assess_batch(points).await;
        debug!("Queue batch: {:?}", summary);
    }

    /// Register the training loop, the sweep loop and the queue worker.
    pub async fn spawn_background(self: &Arc<Self>, scheduler: &Scheduler) {
        let lifecycle = &self.config.lifecycle;
        let realtime = &self.config.realtime;

        let engine = self.clone();
        scheduler
            .add_task(
                "model-training",
                Duration::from_secs(lifecycle.retrain_interval_secs.max(1)),
                Duration::from_secs(lifecycle.failure_backoff_secs),
                move || {
                    let engine = engine.clone();
                    async move { engine.training_pass().await }
                },
            )
            .await;

        let engine = self.clone();
        let sweep_interval = Duration::from_secs(realtime.sweep_interval_secs.max(1));
        scheduler
            .add_task("unassessed-sweep", sweep_interval, sweep_interval, move || {
                let engine = engine.clone();
                async move { engine.sweep_unassessed().await.map(|_| ()) }
            })
            .await;

        let engine = self.clone();
        scheduler
            .spawn_worker("assessment-queue", move |shutdown| engine.run_queue(shutdown))
            .await;
    }
}
