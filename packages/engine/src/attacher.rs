use std::path::Path;

use chrono::Utc;
use common::storage::{BlobLocation, Fingerprint, StorageName, StoredFile};
use common::{DerivativeSelection, Directives, ExecutionMode, JobOperation};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait, Unchanged,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::derivatives::DerivativeRun;
use crate::entity::{asset, derivative};
use crate::error::{EngineError, Result};
use crate::guard;
use crate::promotion::PromotionOutcome;
use crate::state::Engine;

/// An uploaded file.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl NewFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    fn content_type(&self) -> Option<String> {
        mime_guess::from_path(&self.filename)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }

    fn extension(&self) -> Option<&str> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
    }
}

#[derive(Debug)]
pub struct Attachment {
    pub asset: asset::Model,
    pub promotion: PromotionOutcome,
}

/// What happened to files an operation stopped referencing, per `delete`.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposal {
    Deleted(Vec<StoredFile>),
    Enqueued(Vec<StoredFile>),
    Retained(Vec<StoredFile>),
}

/// Entry point for callers: attach, replace and destroy asset files.
///
/// Every method takes instance-level directives and layers them over the
/// engine's process-wide defaults before doing anything else.
pub struct Attacher<'a> {
    engine: &'a Engine,
}

impl<'a> Attacher<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Store `file` in the cache as a new asset, then request promotion.
    #[instrument(skip_all, fields(filename = %file.filename, size = file.data.len()))]
    pub async fn attach(&self, file: NewFile, directives: &Directives) -> Result<Attachment> {
        let directives = self.engine.defaults.resolve(directives);

        let id = Uuid::now_v7();
        let location = BlobLocation::for_asset(id, file.extension());
        self.engine.cache.put(&location, &file.data).await?;

        let now = Utc::now();
        let model = asset::ActiveModel {
            id: Set(id),
            filename: Set(file.filename.clone()),
            content_type: Set(file.content_type()),
            size: Set(file.data.len() as i64),
            storage: Set(StorageName::Cache.to_string()),
            location: Set(location.to_string()),
            fingerprint: Set(Fingerprint::compute(&file.data).to_hex()),
            stored: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let asset = match model.insert(&self.engine.db).await {
            Ok(asset) => asset,
            Err(e) => {
                self.discard(StorageName::Cache, &location).await;
                return Err(e.into());
            }
        };
        info!(asset_id = %asset.id, "Asset attached");

        let promotion = self
            .engine
            .promotion()
            .request_promotion(&asset, &directives)
            .await?;
        Ok(Attachment { asset, promotion })
    }

    /// Swap the asset's file for `file`.
    ///
    /// The row is rewritten under the asset lock with the new fingerprint,
    /// so in-flight promotions and derivative runs for the old file abort.
    /// Existing derivatives are removed with the old file.
    #[instrument(skip(self, file, directives), fields(filename = %file.filename))]
    pub async fn replace(
        &self,
        asset_id: Uuid,
        file: NewFile,
        directives: &Directives,
    ) -> Result<Attachment> {
        let directives = self.engine.defaults.resolve(directives);

        let location = BlobLocation::for_asset(asset_id, file.extension());
        self.engine.cache.put(&location, &file.data).await?;

        let swapped = self.swap(asset_id, &file, &location).await;
        let (asset, orphaned) = match swapped {
            Ok(Some(swapped)) => swapped,
            Ok(None) => {
                self.discard(StorageName::Cache, &location).await;
                return Err(EngineError::AssetNotFound(asset_id));
            }
            Err(e) => {
                self.discard(StorageName::Cache, &location).await;
                return Err(e);
            }
        };
        info!(replaced = orphaned.len(), "Asset file replaced");

        self.dispose(asset_id, orphaned, &directives).await?;

        let promotion = self
            .engine
            .promotion()
            .request_promotion(&asset, &directives)
            .await?;
        Ok(Attachment { asset, promotion })
    }

    async fn swap(
        &self,
        asset_id: Uuid,
        file: &NewFile,
        location: &BlobLocation,
    ) -> Result<Option<(asset::Model, Vec<StoredFile>)>> {
        let txn = self.engine.db.begin().await?;

        let Some(current) = guard::lock_asset(&txn, asset_id).await? else {
            txn.rollback().await?;
            return Ok(None);
        };

        let derivatives = derivative::Entity::find()
            .filter(derivative::Column::AssetId.eq(asset_id))
            .all(&txn)
            .await?;
        derivative::Entity::delete_many()
            .filter(derivative::Column::AssetId.eq(asset_id))
            .exec(&txn)
            .await?;

        let updated = asset::ActiveModel {
            id: Unchanged(current.id),
            filename: Set(file.filename.clone()),
            content_type: Set(file.content_type()),
            size: Set(file.data.len() as i64),
            storage: Set(StorageName::Cache.to_string()),
            location: Set(location.to_string()),
            fingerprint: Set(Fingerprint::compute(&file.data).to_hex()),
            stored: Set(false),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        txn.commit().await?;

        Ok(Some((updated, referenced_files(&current, &derivatives))))
    }

    /// Remove the asset and its derivatives, then dispose of their files.
    #[instrument(skip(self, directives))]
    pub async fn destroy(&self, asset_id: Uuid, directives: &Directives) -> Result<Disposal> {
        let directives = self.engine.defaults.resolve(directives);

        let txn = self.engine.db.begin().await?;
        let Some(current) = guard::lock_asset(&txn, asset_id).await? else {
            txn.rollback().await?;
            return Err(EngineError::AssetNotFound(asset_id));
        };
        let derivatives = derivative::Entity::find()
            .filter(derivative::Column::AssetId.eq(asset_id))
            .all(&txn)
            .await?;
        derivative::Entity::delete_many()
            .filter(derivative::Column::AssetId.eq(asset_id))
            .exec(&txn)
            .await?;
        asset::Entity::delete_by_id(asset_id).exec(&txn).await?;
        txn.commit().await?;
        info!(derivatives = derivatives.len(), "Asset destroyed");

        self.dispose(asset_id, referenced_files(&current, &derivatives), &directives)
            .await
    }

    /// Generate derivatives for an existing asset, honoring
    /// `create_derivatives`.
    pub async fn create_derivatives(
        &self,
        asset_id: Uuid,
        selection: &DerivativeSelection,
        directives: &Directives,
    ) -> Result<DerivativeRun> {
        let directives = self.engine.defaults.resolve(directives);
        self.engine
            .derivatives()
            .request(asset_id, selection, &directives)
            .await
    }

    async fn dispose(
        &self,
        asset_id: Uuid,
        files: Vec<StoredFile>,
        directives: &Directives,
    ) -> Result<Disposal> {
        match directives.delete() {
            ExecutionMode::Disabled => Ok(Disposal::Retained(files)),
            ExecutionMode::Inline => {
                self.engine.delete_files(&files).await?;
                Ok(Disposal::Deleted(files))
            }
            ExecutionMode::Background => {
                if !files.is_empty() {
                    let operation = JobOperation::DeleteFiles {
                        files: files.clone(),
                    };
                    self.engine.enqueue(operation, asset_id, directives).await?;
                }
                Ok(Disposal::Enqueued(files))
            }
        }
    }

    async fn discard(&self, storage: StorageName, location: &BlobLocation) {
        if let Err(e) = self.engine.storage(storage).delete(location).await {
            warn!(%storage, %location, error = %e, "Failed to delete unreferenced blob");
        }
    }
}

/// Files referenced by an asset row and its derivative rows. Rows with a
/// malformed location are logged and skipped.
fn referenced_files(asset: &asset::Model, derivatives: &[derivative::Model]) -> Vec<StoredFile> {
    std::iter::once(asset.file())
        .chain(derivatives.iter().map(derivative::Model::file))
        .filter_map(|file| {
            file.inspect_err(|e| warn!(error = %e, "Skipping file with invalid location"))
                .ok()
        })
        .collect()
}
