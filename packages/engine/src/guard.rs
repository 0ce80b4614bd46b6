//! Fingerprint guard: lock the asset row and confirm its file is still the
//! one an operation started from.
//!
//! Everything here takes a [`DatabaseTransaction`], so it can only run inside
//! one. The row lock (`SELECT … FOR UPDATE`) is held until that transaction
//! commits or rolls back. Keep the window to the comparison plus the
//! dependent write: never generate derivatives or touch a blob store while
//! holding it.

use common::storage::Fingerprint;
use sea_orm::sea_query::LockType;
use sea_orm::{DatabaseTransaction, DbErr, EntityTrait, QuerySelect};
use tracing::debug;
use uuid::Uuid;

use crate::entity::asset;
use crate::outcome::AbortReason;

/// What the guard found under the lock.
#[derive(Debug)]
pub enum Verdict {
    /// The row exists and still carries the expected fingerprint.
    Current(asset::Model),
    /// The row exists but its file was replaced.
    Changed,
    /// The row is gone.
    Missing,
}

impl Verdict {
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Current(_))
    }

    /// Why a dependent write has to be abandoned, if it does.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Current(_) => None,
            Self::Changed => Some(AbortReason::SourceChanged),
            Self::Missing => Some(AbortReason::AssetMissing),
        }
    }
}

/// Lock the asset row and compare its fingerprint against `expected`.
pub async fn verify(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
    expected: &Fingerprint,
) -> Result<Verdict, DbErr> {
    let Some(row) = lock_asset(txn, asset_id).await? else {
        debug!(%asset_id, "Fingerprint guard: asset no longer exists");
        return Ok(Verdict::Missing);
    };

    if row.fingerprint != expected.to_hex() {
        debug!(%asset_id, "Fingerprint guard: source file changed");
        return Ok(Verdict::Changed);
    }

    Ok(Verdict::Current(row))
}

/// `true` if the asset still exists with the expected fingerprint. The lock
/// is kept either way until `txn` ends.
pub async fn acquire_and_verify(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
    expected: &Fingerprint,
) -> Result<bool, DbErr> {
    Ok(verify(txn, asset_id, expected).await?.is_current())
}

/// Lock the asset row without checking the fingerprint. Used by writers that
/// are about to change the fingerprint themselves.
pub async fn lock_asset(
    txn: &DatabaseTransaction,
    asset_id: Uuid,
) -> Result<Option<asset::Model>, DbErr> {
    asset::Entity::find_by_id(asset_id)
        .lock(LockType::Update)
        .one(txn)
        .await
}
