//! Reading an asset's current file outside any transaction.
//!
//! A promotion moves the file to permanent storage and then deletes the
//! cached copy, so a reader that loaded the row earlier can find its
//! location empty even though the content never changed. Before treating a
//! missing blob as a replaced file, the row is re-read and the file followed
//! to wherever it went.

use common::storage::{Fingerprint, StorageError};
use sea_orm::EntityTrait;
use tracing::debug;

use crate::entity::asset;
use crate::error::Result;
use crate::outcome::AbortReason;
use crate::state::Engine;

/// How many times a moved file is followed before giving up.
const MAX_FOLLOWS: usize = 2;

#[derive(Debug)]
pub enum SourceRead {
    /// Bytes matching the expected fingerprint, with the row they were
    /// read through. The row may be newer than the one passed in.
    Current { asset: asset::Model, data: Vec<u8> },
    Stale(AbortReason),
}

/// Read the file of `asset` and check it against `expected`.
///
/// Aborts only when the row is gone or its fingerprint changed. A blob that
/// is missing from a location the row still points at is a storage error.
pub async fn read_current(
    engine: &Engine,
    mut asset: asset::Model,
    expected: &Fingerprint,
) -> Result<SourceRead> {
    let mut follows = 0;
    loop {
        let file = asset.file()?;
        let err = match engine.storage(file.storage).get(&file.location).await {
            Ok(data) if expected.matches(&data) => {
                return Ok(SourceRead::Current { asset, data });
            }
            Ok(_) => {
                debug!(location = %file.location, "File does not match the fingerprint");
                return Ok(SourceRead::Stale(AbortReason::SourceChanged));
            }
            Err(StorageError::NotFound(location)) => StorageError::NotFound(location),
            Err(e) => return Err(e.into()),
        };

        let Some(current) = asset::Entity::find_by_id(asset.id)
            .one(&engine.db)
            .await?
        else {
            return Ok(SourceRead::Stale(AbortReason::AssetMissing));
        };
        if current.fingerprint != expected.to_hex() {
            return Ok(SourceRead::Stale(AbortReason::SourceChanged));
        }
        if follows == MAX_FOLLOWS
            || (current.storage == asset.storage && current.location == asset.location)
        {
            return Err(err.into());
        }

        debug!(
            from = %file.location,
            to = %current.location,
            storage = %current.storage,
            "File moved, following it"
        );
        follows += 1;
        asset = current;
    }
}
