use common::storage::{BlobLocation, Fingerprint, StorageError, StorageName, StoredFile};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Original upload filename.
    pub filename: String,

    /// MIME content type guessed from the filename.
    pub content_type: Option<String>,

    pub size: i64,

    /// `cache` until promotion succeeds, `store` afterwards.
    pub storage: String,

    /// Blob location inside `storage`.
    pub location: String,

    /// Hex SHA-512 of the bytes at `location`.
    pub fingerprint: String,

    #[sea_orm(default_value = false)]
    pub stored: bool,

    #[sea_orm(has_many)]
    pub derivatives: HasMany<super::derivative::Entity>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn parsed_fingerprint(&self) -> Result<Fingerprint, StorageError> {
        Fingerprint::from_hex(&self.fingerprint)
    }

    pub fn file(&self) -> Result<StoredFile, StorageError> {
        Ok(StoredFile::new(
            self.storage.parse::<StorageName>()?,
            BlobLocation::parse(self.location.clone())?,
        ))
    }
}
