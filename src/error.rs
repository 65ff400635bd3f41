// src/error.rs

use thiserror::Error;
use warp::http::StatusCode;

use crate::{sink::SinkError, store::StoreError};

/// Every way a single request through the pipeline can fail.
///
/// Validation failures are raised before any collaborator is touched. Upstream
/// failures carry the collaborator's error so the caller sees the cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing {0}")]
    MissingParameter(&'static str),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Invalid columns in the CSV file: {0}")]
    InvalidSchema(String),

    #[error("Object store download failed: {0}")]
    UpstreamFetchFailure(#[source] StoreError),

    #[error("Object store upload failed: {0}")]
    UpstreamStoreFailure(#[source] StoreError),

    #[error("Writing metrics failed: {0}")]
    Persistence(#[source] SinkError),

    #[error("Bucket already exists: {0}")]
    AlreadyExists(String),
}

impl PipelineError {
    /// HTTP status reported to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::MissingParameter(_)
            | PipelineError::InvalidFileFormat(_)
            | PipelineError::InvalidSchema(_)
            | PipelineError::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            PipelineError::UpstreamFetchFailure(_)
            | PipelineError::UpstreamStoreFailure(_)
            | PipelineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
