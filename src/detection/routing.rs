// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Alert routing - plans notification channels for committed alerts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::{Alert, AlertSeverity};
use crate::core::EventBus;

/// Downstream notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    PoliceDashboard,
    FamilySms,
    FamilyCall,
    FamilyEmail,
    TouristApp,
}

/// Channels and follow-up actions planned for one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub alert_id: i64,
    pub severity: AlertSeverity,
    pub channels: Vec<NotificationChannel>,
    pub urgent: bool,
    /// Minutes before an unresolved alert is escalated
    pub escalate_after_minutes: Option<u32>,
}

/// Consumer of committed alerts. Delivery itself is external; the router
/// decides fan-out by severity and logs it.
pub struct AlertRouter {
    routed: AtomicU64,
}

impl AlertRouter {
    pub fn new() -> Self {
        Self {
            routed: AtomicU64::new(0),
        }
    }

    pub fn plan(&self, alert: &Alert) -> RoutePlan {
        use NotificationChannel::*;

        let (channels, urgent, escalate_after_minutes) = match alert.severity {
            AlertSeverity::Critical => (vec![PoliceDashboard, FamilySms, FamilyCall, TouristApp], true, Some(15)),
            AlertSeverity::High => (vec![PoliceDashboard, FamilySms, TouristApp], true, None),
            AlertSeverity::Medium => (vec![TouristApp, FamilyEmail], false, None),
            AlertSeverity::Low => (vec![TouristApp], false, None),
        };

        RoutePlan {
            alert_id: alert.id,
            severity: alert.severity,
            channels,
            urgent,
            escalate_after_minutes,
        }
    }

    pub fn route(&self, alert: &Alert) -> RoutePlan {
        let plan = self.plan(alert);
        self.routed.fetch_add(1, Ordering::Relaxed);

        match alert.severity {
            AlertSeverity::Critical => error!(
                "CRITICAL alert {} for tourist {}: {} -> {:?}",
                alert.id, alert.tourist_id, alert.message, plan.channels
            ),
            AlertSeverity::High => warn!(
                "HIGH alert {} for tourist {}: {} -> {:?}",
                alert.id, alert.tourist_id, alert.message, plan.channels
            ),
            _ => info!(
                "{} alert {} for tourist {}: {} -> {:?}",
                alert.severity.as_str(), alert.id, alert.tourist_id, alert.message, plan.channels
            ),
        }

        plan
    }

    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Consume alerts from the bus until shutdown.
    pub async fn run(self: Arc<Self>, event_bus: Arc<EventBus>, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting alert router...");
        let mut alert_rx = event_bus.subscribe_alerts();

        loop {
            tokio::select! {
                received = alert_rx.recv() => match received {
                    Ok(alert) => {
                        self.route(&alert);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Alert router lagged, {} alerts not routed", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    info!("Alert router shutting down...");
                    break;
                }
            }
        }
    }
}

impl Default for AlertRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AlertStatus, AlertType};
    use chrono::Utc;

    fn alert(severity: AlertSeverity) -> Alert {
        Alert {
            id: 11,
            tourist_id: 2,
            alert_type: AlertType::Panic,
            severity,
            message: "Emergency SOS triggered".into(),
            description: None,
            latitude: None,
            longitude: None,
            auto_generated: false,
            ai_confidence: None,
            status: AlertStatus::Active,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_critical_plan_escalates() {
        let plan = AlertRouter::new().plan(&alert(AlertSeverity::Critical));
        assert!(plan.urgent);
        assert_eq!(plan.escalate_after_minutes, Some(15));
        assert!(plan.channels.contains(&NotificationChannel::PoliceDashboard));
        assert!(plan.channels.contains(&NotificationChannel::FamilyCall));
    }

    #[test]
    fn test_low_plan_is_app_only() {
        let plan = AlertRouter::new().plan(&alert(AlertSeverity::Low));
        assert_eq!(plan.channels, vec![NotificationChannel::TouristApp]);
        assert!(!plan.urgent);
    }

    #[tokio::test]
    async fn test_router_consumes_bus() {
        let bus = Arc::new(EventBus::new(8));
        let router = Arc::new(AlertRouter::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(router.clone().run(bus.clone(), shutdown_rx));

        // The router subscribes inside `run`; keep publishing until it is live
        for _ in 0..100 {
            bus.publish_alert(alert(AlertSeverity::High));
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if router.routed_count() > 0 {
                break;
            }
        }

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
        assert!(router.routed_count() >= 1);
    }
}
