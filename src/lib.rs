// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! TourGuard - Tourist Safety Scoring Service
//!
//! Every reported GPS fix runs through a hybrid pipeline:
//! - Geofencing against restricted and safe zones
//! - Isolation Forest anomaly scoring over 8 movement features
//! - Temporal heuristics (idling, erratic speed, night travel, speed jumps)
//! - Additive score fusion into a 0-100 safety score, a tier and alerts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Safety Engine                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  location ─→ ┌──────────┐  ┌──────────┐  ┌──────────┐        │
//! │              │ Geofence │  │ Anomaly  │  │ Temporal │        │
//! │              └────┬─────┘  └────┬─────┘  └────┬─────┘        │
//! │                   └────────→ Fusion ←─────────┘              │
//! │                                │                             │
//! │  ┌─────────┐   commit   ┌──────┴─────┐   publish  ┌────────┐ │
//! │  │  Store  │ ←───────── │ Assessment │ ─────────→ │ Router │ │
//! │  └─────────┘            └────────────┘            └────────┘ │
//! │       ↑                                                      │
//! │  ┌────┴─────────────┐   retrain / swap   ┌────────────────┐  │
//! │  │ Model Lifecycle  │ ─────────────────→ │  Model Store   │  │
//! │  └──────────────────┘                    └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod core;
pub mod geo;
pub mod analysis;
pub mod detection;
pub mod models;
pub mod config;
pub mod db;
pub mod error;

// Re-exports for convenience
pub use config::Config;
pub use core::{AssessmentOutcome, EventBus, SafetyEngine, Scheduler, SosOutcome};
pub use detection::{AlertRouter, SafetyTier, ScoreFusion};
pub use models::{FileModelStore, ModelLifecycleManager, ModelStore};
pub use db::{Database, SafetyStore};
pub use error::{Result, SafetyError};

/// TourGuard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// TourGuard name
pub const NAME: &str = "TourGuard";
