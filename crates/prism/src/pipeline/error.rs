use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{ExtractError, QueueError, StorageError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Report {0} not found")]
    ReportNotFound(String),

    #[error("Source file is gone: {0}")]
    SourceMissing(PathBuf),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Could not enqueue follow-up work: {0}")]
    Queue(#[from] QueueError),

    #[error("Archival failed: {0}")]
    Archive(#[source] StorageError),
}

impl PipelineError {
    /// Whether another attempt could succeed. Permanent errors dead-letter
    /// the job right away.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::ReportNotFound(_) | PipelineError::SourceMissing(_) => false,
            PipelineError::Extract(e) => matches!(e, ExtractError::ReadDocument { .. }),
            PipelineError::Database(_) | PipelineError::Queue(_) | PipelineError::Archive(_) => {
                true
            }
        }
    }
}
