use common::storage::{BlobLocation, StorageError, StorageName, StoredFile};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A generated rendition of an asset. `(asset_id, key)` is unique.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "derivative")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique_key = "asset_derivative_key")]
    pub asset_id: Uuid,
    #[sea_orm(belongs_to, from = "asset_id", to = "id")]
    pub asset: HasOne<super::asset::Entity>,

    #[sea_orm(unique_key = "asset_derivative_key")]
    pub key: String,

    /// Blob location in permanent storage.
    pub location: String,

    pub size: i64,

    pub content_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn file(&self) -> Result<StoredFile, StorageError> {
        Ok(StoredFile::new(
            StorageName::Store,
            BlobLocation::parse(self.location.clone())?,
        ))
    }
}
