use std::sync::Arc;

use chrono::Utc;
use common::storage::{BlobLocation, BlobStore, Fingerprint};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, SqlErr, TransactionTrait, Unchanged,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entity::derivative;
use crate::error::{EngineError, Result};
use crate::guard;
use crate::outcome::AbortReason;

/// Upper bound on insert/update attempts for one derivative.
pub const MAX_ATTEMPTS: u8 = 3;

/// Optional metadata persisted next to a derivative.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivativeMetadata {
    pub content_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// Bytes produced by a generator, ready to be attached.
#[derive(Clone, Debug)]
pub struct NewDerivative {
    pub key: String,
    pub data: Vec<u8>,
    /// File extension for the blob location, without the dot.
    pub extension: Option<String>,
    pub metadata: DerivativeMetadata,
}

#[derive(Debug)]
pub enum AttachOutcome {
    Attached(derivative::Model),
    Aborted(AbortReason),
}

impl AttachOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached(_))
    }
}

enum Persisted {
    Written {
        model: derivative::Model,
        replaced: Option<BlobLocation>,
    },
    Stale(AbortReason),
}

enum Step {
    Inserted(derivative::Model),
    Updated {
        model: derivative::Model,
        previous: String,
    },
    /// Insert hit the unique index; carries the row that won, if visible.
    Conflict(Option<derivative::Model>),
    /// The row we meant to update was deleted in the meantime.
    Vanished,
}

/// Race-safe insert-or-update of the derivative row for `(asset, key)`.
#[derive(Clone)]
pub struct DerivativeStore {
    db: DatabaseConnection,
    store: Arc<dyn BlobStore>,
}

impl DerivativeStore {
    pub fn new(db: DatabaseConnection, store: Arc<dyn BlobStore>) -> Self {
        Self { db, store }
    }

    /// Write the blob, then persist the row under the fingerprint guard.
    ///
    /// `expected` must be the fingerprint captured before the derivative was
    /// generated. On every path that doesn't end with a row referencing the
    /// new blob, the new blob is deleted; when a row is updated, the blob it
    /// used to reference is deleted instead.
    #[instrument(skip(self, expected, new), fields(key = %new.key, size = new.data.len()))]
    pub async fn attach(
        &self,
        asset_id: Uuid,
        expected: &Fingerprint,
        new: NewDerivative,
    ) -> Result<AttachOutcome> {
        let location = BlobLocation::for_derivative(asset_id, &new.key, new.extension.as_deref());
        self.store.put(&location, &new.data).await?;

        match self.persist(asset_id, expected, &new, &location).await {
            Ok(Persisted::Written { model, replaced }) => {
                if let Some(previous) = replaced {
                    self.discard(&previous).await;
                }
                info!(
                    %asset_id,
                    key = %model.key,
                    derivative_id = %model.id,
                    "Derivative attached"
                );
                Ok(AttachOutcome::Attached(model))
            }
            Ok(Persisted::Stale(reason)) => {
                self.discard(&location).await;
                info!(%asset_id, key = %new.key, %reason, "Derivative attach aborted");
                Ok(AttachOutcome::Aborted(reason))
            }
            Err(e) => {
                self.discard(&location).await;
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        asset_id: Uuid,
        expected: &Fingerprint,
        new: &NewDerivative,
        location: &BlobLocation,
    ) -> Result<Persisted> {
        let mut attempt: u8 = 0;
        let mut conflicting: Option<derivative::Model> = None;

        loop {
            attempt += 1;
            if attempt > MAX_ATTEMPTS {
                return Err(EngineError::Conflict {
                    asset_id,
                    key: new.key.clone(),
                    attempts: MAX_ATTEMPTS,
                });
            }

            let txn = self.db.begin().await?;

            if let Some(reason) = guard::verify(&txn, asset_id, expected)
                .await?
                .abort_reason()
            {
                txn.rollback().await?;
                return Ok(Persisted::Stale(reason));
            }

            let step = match conflicting.take() {
                Some(existing) => update_row(&txn, existing, new, location).await?,
                None => insert_row(&txn, asset_id, new, location).await?,
            };

            match step {
                Step::Inserted(model) => {
                    txn.commit().await?;
                    return Ok(Persisted::Written {
                        model,
                        replaced: None,
                    });
                }
                Step::Updated { model, previous } => {
                    txn.commit().await?;
                    let replaced = BlobLocation::parse(previous)
                        .inspect_err(|e| {
                            warn!(error = %e, "Replaced derivative had an invalid location")
                        })
                        .ok()
                        .filter(|previous| previous != location);
                    return Ok(Persisted::Written { model, replaced });
                }
                Step::Conflict(existing) => {
                    txn.rollback().await?;
                    warn!(
                        %asset_id,
                        key = %new.key,
                        attempt,
                        "Derivative insert conflicted, retrying as update"
                    );
                    conflicting = existing;
                }
                Step::Vanished => {
                    txn.rollback().await?;
                    warn!(
                        %asset_id,
                        key = %new.key,
                        attempt,
                        "Conflicting derivative disappeared, retrying insert"
                    );
                }
            }
        }
    }

    async fn discard(&self, location: &BlobLocation) {
        match self.store.delete(location).await {
            Ok(_) => debug!(%location, "Discarded derivative blob"),
            Err(e) => warn!(%location, error = %e, "Failed to delete derivative blob"),
        }
    }
}

/// Insert inside a savepoint so a unique violation leaves `txn` usable.
async fn insert_row(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
    new: &NewDerivative,
    location: &BlobLocation,
) -> Result<Step> {
    let now = Utc::now();
    let model = derivative::ActiveModel {
        id: Set(Uuid::now_v7()),
        asset_id: Set(asset_id),
        key: Set(new.key.clone()),
        location: Set(location.to_string()),
        size: Set(new.data.len() as i64),
        content_type: Set(new.metadata.content_type.clone()),
        width: Set(new.metadata.width),
        height: Set(new.metadata.height),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let savepoint = txn.begin().await?;
    match model.insert(&savepoint).await {
        Ok(inserted) => {
            savepoint.commit().await?;
            Ok(Step::Inserted(inserted))
        }
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            savepoint.rollback().await?;
            let existing = derivative::Entity::find()
                .filter(derivative::Column::AssetId.eq(asset_id))
                .filter(derivative::Column::Key.eq(new.key.as_str()))
                .one(txn)
                .await?;
            Ok(Step::Conflict(existing))
        }
        Err(e) => Err(e.into()),
    }
}

/// Point the existing row at the new blob. The row is re-read under the
/// asset lock so the location handed back for cleanup is the one actually
/// being replaced.
async fn update_row(
    txn: &DatabaseTransaction,
    conflicting: derivative::Model,
    new: &NewDerivative,
    location: &BlobLocation,
) -> Result<Step> {
    let Some(existing) = derivative::Entity::find_by_id(conflicting.id)
        .one(txn)
        .await?
    else {
        return Ok(Step::Vanished);
    };

    let model = derivative::ActiveModel {
        id: Unchanged(existing.id),
        location: Set(location.to_string()),
        size: Set(new.data.len() as i64),
        content_type: Set(new.metadata.content_type.clone()),
        width: Set(new.metadata.width),
        height: Set(new.metadata.height),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };

    match model.update(txn).await {
        Ok(model) => Ok(Step::Updated {
            model,
            previous: existing.location,
        }),
        Err(DbErr::RecordNotUpdated) => Ok(Step::Vanished),
        Err(e) => Err(e.into()),
    }
}
