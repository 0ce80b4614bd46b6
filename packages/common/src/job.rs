use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directive::{DirectiveError, Directives};
use crate::mq::{Message, MqError};
use crate::storage::StoredFile;

/// Which derivative generators a run should invoke.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keys", rename_all = "snake_case")]
pub enum DerivativeSelection {
    /// Every generator marked as default, in registration order.
    #[default]
    Default,
    /// Exactly these generators, in the given order. May name non-default ones.
    Only(Vec<String>),
    /// The default set minus these.
    Except(Vec<String>),
}

impl DerivativeSelection {
    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(keys.into_iter().map(Into::into).collect())
    }

    pub fn except<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Except(keys.into_iter().map(Into::into).collect())
    }
}

/// The unit of work a job carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum JobOperation {
    /// Move the asset's cached file to permanent storage.
    Promote,
    /// Run derivative generators against the asset's current file.
    CreateDerivatives { selection: DerivativeSelection },
    /// Delete files that are no longer referenced by any row.
    DeleteFiles { files: Vec<StoredFile> },
}

impl JobOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::CreateDerivatives { .. } => "create_derivatives",
            Self::DeleteFiles { .. } => "delete_files",
        }
    }
}

/// A job message sent to the asset job queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetJob {
    /// Job identifier (UUID)
    pub job_id: String,
    pub operation: JobOperation,
    pub asset_id: Uuid,
    /// Directive context in primitive form; see [`Directives::to_serialized`].
    pub directives: BTreeMap<String, serde_json::Value>,
}

impl AssetJob {
    /// Create a new job with a generated UUID.
    pub fn new(operation: JobOperation, asset_id: Uuid, directives: &Directives) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            operation,
            asset_id,
            directives: directives.to_serialized(),
        }
    }

    /// Restore the directive context this job was enqueued with.
    pub fn directives(&self) -> Result<Directives, DirectiveError> {
        Directives::from_serialized(&self.directives)
    }
}

impl Message for AssetJob {
    fn message_type() -> &'static str {
        "asset_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}

/// Job queue collaborator.
///
/// Delivery is at-least-once and unordered with respect to other jobs for
/// the same asset; consumers must tolerate duplicates and reordering.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: AssetJob) -> Result<(), MqError>;
}
