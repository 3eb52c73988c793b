//! Failure conditions surfaced by one poll cycle.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::StreamKey;

// ---

/// Upstream telemetry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Weather,
    Energy,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Weather => f.write_str("weather gateway"),
            Source::Energy => f.write_str("energy API"),
        }
    }
}

/// Everything that can go wrong between fetching a batch and notifying
/// downstream. None of these terminate the process; the cycle collects them.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestError {
    /// Transport failure, timeout, or non-2xx answer from a source.
    #[error("fetch from {origin} failed: {reason}")]
    FetchFailure { origin: Source, reason: String },

    /// A record matched no known reading shape, or lacked a required field.
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// State store read or write failed; nothing was written for the key.
    #[error("state store unavailable for {key}: {reason}")]
    StorageUnavailable { key: StreamKey, reason: String },

    /// Wind direction index that is not one of the 16 compass points,
    /// including fractional values. Kept as sent, never truncated.
    #[error("wind direction index {index} is not an integer in 0..=15")]
    InvalidDirectionIndex { index: f64 },

    /// Notifier failed after the record was persisted.
    #[error("publish to '{topic}' failed: {reason}")]
    PublishError { topic: String, reason: String },
}

impl IngestError {
    // ---
    pub fn malformed(reason: impl Into<String>) -> Self {
        IngestError::MalformedRecord {
            reason: reason.into(),
        }
    }

    pub fn storage(key: StreamKey, err: impl fmt::Display) -> Self {
        IngestError::StorageUnavailable {
            key,
            reason: err.to_string(),
        }
    }
}

/// Result alias used across the ingestion core.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
