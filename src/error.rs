//! Error taxonomy for the ingestion pipeline.
//!
//! Per-item failures (`MissingSourceUrl`, `MalformedPrice`) never abort a
//! batch. Store failures are surfaced to the caller through
//! [`crate::pipeline::BatchReport`]; `DuplicateKey` and `NotFound` are
//! recoverable and are reconciled by the pipeline itself.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the pipeline stages and the store.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("raw item has no source_url")]
    MissingSourceUrl,

    #[error("malformed price: {raw:?}")]
    MalformedPrice { raw: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("entity already exists for key {0:?}")]
    DuplicateKey(String),

    #[error("no entity for key {0:?}")]
    NotFound(String),

    #[error("timed out after {waited:?} waiting for store lock ({attempts} attempts) for key {key:?}")]
    StoreTimeout {
        key: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether this failure belongs to the store rather than the item.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::StoreUnavailable(_) | PipelineError::StoreTimeout { .. }
        )
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable(e.to_string())
    }
}
