use common::DirectiveError;
use common::mq::MqError;
use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Directive error: {0}")]
    Directive(#[from] DirectiveError),

    #[error("Unknown derivative '{0}'")]
    UnknownDerivative(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(Uuid),

    #[error(
        "Derivative '{key}' of asset {asset_id} still conflicted after {attempts} attempts"
    )]
    Conflict {
        asset_id: Uuid,
        key: String,
        attempts: u8,
    },

    #[error("Derivative generator '{key}' failed: {source}")]
    Generation {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Around hook '{0}' returned without invoking its continuation")]
    ContinuationSkipped(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] MqError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl EngineError {
    /// Errors caused by bad input or setup rather than a transient failure.
    /// Retrying the same operation can't fix these.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Directive(_) | Self::UnknownDerivative(_) | Self::ContinuationSkipped(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
