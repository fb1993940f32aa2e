// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Event bus for committed alerts and assessments

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::detection::{Alert, Assessment};

/// Event types in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Alert,
    Assessment,
    ModelTrained,
    Error,
}

/// Generic event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Alert(Alert),
    Assessment(Assessment),
    ModelTrained { model_type: String, version: String, samples: usize },
    Error { message: String },
}

/// Central event bus. Publishing never blocks and never fails; events sent
/// with no subscriber are dropped.
pub struct EventBus {
    alert_tx: broadcast::Sender<Alert>,
    assessment_tx: broadcast::Sender<Assessment>,
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (alert_tx, _) = broadcast::channel(capacity);
        let (assessment_tx, _) = broadcast::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            alert_tx,
            assessment_tx,
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn publish_alert(&self, alert: Alert) {
        let _ = self.alert_tx.send(alert.clone());
        self.publish_event(EventType::Alert, EventPayload::Alert(alert));
    }

    pub fn publish_assessment(&self, assessment: Assessment) {
        let _ = self.assessment_tx.send(assessment.clone());
        self.publish_event(EventType::Assessment, EventPayload::Assessment(assessment));
    }

    pub fn publish_model_trained(&self, model_type: &str, version: &str, samples: usize) {
        self.publish_event(
            EventType::ModelTrained,
            EventPayload::ModelTrained {
                model_type: model_type.to_string(),
                version: version.to_string(),
                samples,
            },
        );
    }

    pub fn publish_error(&self, message: &str) {
        self.publish_event(
            EventType::Error,
            EventPayload::Error {
                message: message.to_string(),
            },
        );
    }

    fn publish_event(&self, event_type: EventType, payload: EventPayload) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_assessments(&self) -> broadcast::Receiver<Assessment> {
        self.assessment_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn events_published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AlertSeverity, AlertStatus, AlertType};

    fn alert() -> Alert {
        Alert {
            id: 1,
            tourist_id: 3,
            alert_type: AlertType::Geofence,
            severity: AlertSeverity::High,
            message: "Tourist entered restricted zone: Border Area".into(),
            description: None,
            latitude: Some(28.05),
            longitude: Some(77.05),
            auto_generated: true,
            ai_confidence: Some(1.0),
            status: AlertStatus::Active,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_alert_reaches_both_channels() {
        let bus = EventBus::new(16);
        let mut alerts = bus.subscribe_alerts();
        let mut events = bus.subscribe_events();

        bus.publish_alert(alert());

        assert_eq!(alerts.recv().await.unwrap().id, 1);
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Alert);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_usable() {
        let bus = EventBus::new(0);
        let mut alerts = bus.subscribe_alerts();
        bus.publish_alert(alert());
        assert_eq!(alerts.recv().await.unwrap().id, 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish_error("store unavailable");
        bus.publish_model_trained("isolation_forest", "v1", 30);
        assert_eq!(bus.events_published(), 2);
    }
}
