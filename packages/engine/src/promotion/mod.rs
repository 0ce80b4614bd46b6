//! Promotion state machine: moves an asset's file from cache to store,
//! wrapped in before/around/after hooks.

mod hooks;
mod state;

pub use hooks::{
    AfterHook, AroundHook, BeforeHook, Continuation, HookContext, HookOutcome, LifecycleHooks,
    MoveFuture,
};
pub use state::{PromotionOutcome, PromotionState, Transition};

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use common::storage::{BlobLocation, Fingerprint, StorageName};
use common::{DerivativeSelection, Directives, ExecutionMode, JobOperation};
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait, Unchanged};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entity::asset;
use crate::error::Result;
use crate::guard::{self, Verdict};
use crate::outcome::AbortReason;
use crate::source::{self, SourceRead};
use crate::state::Engine;

enum Committed {
    Moved(asset::Model),
    /// Another run promoted the same file first.
    AlreadyStored(asset::Model),
    Stale(AbortReason),
}

pub struct PromotionMachine<'a> {
    engine: &'a Engine,
}

impl<'a> PromotionMachine<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Promote now, in the background, or not at all, per `promote`.
    ///
    /// `directives` are the effective ones: in background mode they travel
    /// with the job verbatim.
    #[instrument(skip_all, fields(asset_id = %asset.id))]
    pub async fn request_promotion(
        &self,
        asset: &asset::Model,
        directives: &Directives,
    ) -> Result<PromotionOutcome> {
        if asset.stored {
            return Ok(PromotionOutcome::Stored(asset.clone()));
        }

        match directives.promote() {
            ExecutionMode::Disabled => {
                info!(state = %PromotionState::Pending, "Promotion disabled");
                Ok(PromotionOutcome::Pending)
            }
            ExecutionMode::Inline => self.promote(asset.id, directives).await,
            ExecutionMode::Background => {
                self.engine
                    .enqueue(JobOperation::Promote, asset.id, directives)
                    .await?;
                Ok(PromotionOutcome::Enqueued)
            }
        }
    }

    /// Run the transition in the calling context.
    ///
    /// Safe to repeat: an asset that is already stored is returned as is,
    /// and a missing asset is an abort.
    #[instrument(skip(self, directives))]
    pub async fn promote(
        &self,
        asset_id: Uuid,
        directives: &Directives,
    ) -> Result<PromotionOutcome> {
        let Some(asset) = asset::Entity::find_by_id(asset_id)
            .one(&self.engine.db)
            .await?
        else {
            info!(state = %PromotionState::Aborted, "Asset gone before promotion");
            return Ok(PromotionOutcome::Aborted(AbortReason::AssetMissing));
        };
        if asset.stored {
            debug!("Asset already stored");
            return Ok(PromotionOutcome::Stored(asset));
        }

        let expected = asset.parsed_fingerprint()?;
        let hooks = (!directives.skip_callbacks()).then_some(&*self.engine.hooks);
        let ctx = HookContext {
            engine: self.engine,
            asset: &asset,
            directives,
        };

        info!(
            state = %PromotionState::Promoting,
            callbacks = hooks.is_some(),
            "Promotion started"
        );

        if let Some(hooks) = hooks {
            if let Some(reason) = hooks.run_before(&ctx).await? {
                info!(state = %PromotionState::Aborted, %reason, "Promotion aborted");
                return Ok(PromotionOutcome::Aborted(reason));
            }
        }

        let core: MoveFuture<'_> = Box::pin(self.transfer(&asset, &expected));
        let transition = match hooks {
            Some(hooks) => hooks.run_around(&ctx, core).await?,
            None => core.await?,
        };

        let stored = match transition {
            Transition::Stored(stored) => stored,
            Transition::Stale(reason) => {
                info!(state = %PromotionState::Aborted, %reason, "Promotion aborted");
                return Ok(PromotionOutcome::Aborted(reason));
            }
        };
        info!(
            state = %PromotionState::Stored,
            location = %stored.location,
            "Asset promoted"
        );

        if let Some(hooks) = hooks {
            let ctx = HookContext {
                engine: self.engine,
                asset: &stored,
                directives,
            };
            hooks.run_after(&ctx).await?;
        }

        Ok(PromotionOutcome::Stored(stored))
    }

    /// Copy cached bytes to the store and flip the row under the guard.
    async fn transfer(&self, asset: &asset::Model, expected: &Fingerprint) -> Result<Transition> {
        let read = source::read_current(self.engine, asset.clone(), expected).await?;
        let (current, data) = match read {
            SourceRead::Current { asset, data } => (asset, data),
            SourceRead::Stale(reason) => return Ok(Transition::Stale(reason)),
        };
        if current.stored {
            debug!("Promoted by a concurrent run");
            return Ok(Transition::Stored(current));
        }
        let source = current.file()?;

        let extension = Path::new(source.location.as_str())
            .extension()
            .and_then(|e| e.to_str());
        let target = BlobLocation::for_asset(asset.id, extension);
        self.engine.store.put(&target, &data).await?;

        match self.commit(asset.id, expected, &target).await {
            Ok(Committed::Moved(stored)) => {
                if source.storage == StorageName::Cache {
                    self.discard(source.storage, &source.location).await;
                }
                Ok(Transition::Stored(stored))
            }
            Ok(Committed::AlreadyStored(stored)) => {
                self.discard(StorageName::Store, &target).await;
                Ok(Transition::Stored(stored))
            }
            Ok(Committed::Stale(reason)) => {
                self.discard(StorageName::Store, &target).await;
                Ok(Transition::Stale(reason))
            }
            Err(e) => {
                self.discard(StorageName::Store, &target).await;
                Err(e)
            }
        }
    }

    async fn commit(
        &self,
        asset_id: Uuid,
        expected: &Fingerprint,
        target: &BlobLocation,
    ) -> Result<Committed> {
        let txn = self.engine.db.begin().await?;

        let row = match guard::verify(&txn, asset_id, expected).await? {
            Verdict::Current(row) => row,
            stale => {
                txn.rollback().await?;
                return Ok(Committed::Stale(
                    stale.abort_reason().unwrap_or(AbortReason::SourceChanged),
                ));
            }
        };
        if row.stored {
            txn.rollback().await?;
            return Ok(Committed::AlreadyStored(row));
        }

        let stored = asset::ActiveModel {
            id: Unchanged(row.id),
            storage: Set(StorageName::Store.to_string()),
            location: Set(target.to_string()),
            stored: Set(true),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        txn.commit().await?;
        Ok(Committed::Moved(stored))
    }

    async fn discard(&self, storage: StorageName, location: &BlobLocation) {
        if let Err(e) = self.engine.storage(storage).delete(location).await {
            warn!(%storage, %location, error = %e, "Failed to delete blob after promotion");
        }
    }
}

/// Default after hook: create the default derivatives, inline, in the
/// background or not at all according to `create_derivatives`.
pub struct DerivativesAfterHook;

#[async_trait]
impl AfterHook for DerivativesAfterHook {
    fn name(&self) -> &str {
        "create_derivatives"
    }

    async fn after_promote(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        ctx.engine
            .derivatives()
            .request(ctx.asset.id, &DerivativeSelection::Default, ctx.directives)
            .await?;
        Ok(())
    }
}
