use common::DirectiveError;
use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

/// Failures while assembling the engine at startup. Job failures are
/// reported per message instead.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid directive defaults: {0}")]
    Directive(#[from] DirectiveError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
