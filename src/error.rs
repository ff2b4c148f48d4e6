//! Engine error types.
//!
//! Missing inputs are fatal to the requested computation and surface here.
//! Sparse data (no rate, no row, no volume) is never an error; see
//! [`crate::domain::selection::SkipReason`].

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::util::persistence::CacheError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pricing template not found: {0}")]
    MissingTemplate(PathBuf),

    #[error("pricing template has no sheet named '{0}'")]
    MissingSheet(String),

    #[error("malformed pricing template: {0}")]
    InvalidTemplate(String),

    #[error("shipment dataset not found: {0}")]
    MissingDataset(PathBuf),

    #[error("dataset error at line {line}: {reason}")]
    Dataset { line: u64, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown carrier: {0}")]
    UnknownCarrier(String),

    #[error("no source loaded; call load_source first")]
    NoSource,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
