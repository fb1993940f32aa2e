// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Fitted model state, persistence and the retraining lifecycle

mod lifecycle;
mod persistence;

pub use lifecycle::*;
pub use persistence::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model families managed by the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    IsolationForest,
    Temporal,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::IsolationForest, ModelType::Temporal];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::IsolationForest => "isolation_forest",
            ModelType::Temporal => "temporal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "isolation_forest" => Some(ModelType::IsolationForest),
            "temporal" => Some(ModelType::Temporal),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            ModelType::IsolationForest => 0,
            ModelType::Temporal => 1,
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published generation of a fitted model. Never mutated after
/// construction; a retrain publishes a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState<T> {
    pub model: T,
    pub trained_at: DateTime<Utc>,
    pub version: String,
    pub samples: usize,
}

impl<T> ModelState<T> {
    pub fn new(model_type: ModelType, model: T, samples: usize, trained_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            model,
            trained_at,
            version: format!(
                "{}-{}-{}",
                model_type.as_str(),
                trained_at.format("%Y%m%d%H%M%S"),
                &suffix[..8]
            ),
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_names() {
        for t in ModelType::ALL {
            assert_eq!(ModelType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ModelType::IsolationForest.to_string(), "isolation_forest");
    }

    #[test]
    fn test_versions_are_distinct() {
        let now = Utc::now();
        let a = ModelState::new(ModelType::Temporal, (), 10, now);
        let b = ModelState::new(ModelType::Temporal, (), 10, now);
        assert!(a.version.starts_with("temporal-"));
        assert_ne!(a.version, b.version);
    }
}
