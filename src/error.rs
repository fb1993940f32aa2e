// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Error types for the safety pipeline

use thiserror::Error;

/// Errors surfaced by the scoring pipeline and its collaborators.
///
/// Only [`SafetyError::NotFound`], [`SafetyError::InvalidInput`] and
/// [`SafetyError::Store`] are expected to reach a caller of the engine;
/// computation faults are recovered inside the sub-models.
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Computation fault: {0}")]
    Computation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SafetyError {
    /// Store faults are the only retryable failure class.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SafetyError::Store(_))
    }
}

impl From<rusqlite::Error> for SafetyError {
    fn from(e: rusqlite::Error) -> Self {
        SafetyError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for SafetyError {
    fn from(e: serde_json::Error) -> Self {
        SafetyError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for SafetyError {
    fn from(e: bincode::Error) -> Self {
        SafetyError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SafetyError>;
