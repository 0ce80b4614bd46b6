//! Lifecycle hooks around promotion.
//!
//! Hooks run in registration order. Before hooks may veto with
//! [`HookOutcome::Abort`]. Around hooks wrap the core move and must call
//! [`Continuation::proceed`] exactly once; the first registered hook is the
//! outermost. After hooks run only once the file is stored.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::Directives;
use futures::future::BoxFuture;
use tracing::{debug, info};

use super::state::Transition;
use crate::entity::asset;
use crate::error::{EngineError, Result};
use crate::outcome::AbortReason;
use crate::state::Engine;

/// What a hook sees.
pub struct HookContext<'a> {
    pub engine: &'a Engine,
    pub asset: &'a asset::Model,
    /// Effective directives of the running promotion.
    pub directives: &'a Directives,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookOutcome {
    Proceed,
    Abort(String),
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_promote(&self, ctx: &HookContext<'_>) -> anyhow::Result<HookOutcome>;
}

#[async_trait]
pub trait AroundHook: Send + Sync {
    fn name(&self) -> &str;

    async fn around_promote(
        &self,
        ctx: &HookContext<'_>,
        next: Continuation<'_>,
    ) -> anyhow::Result<Transition>;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_promote(&self, ctx: &HookContext<'_>) -> anyhow::Result<()>;
}

pub type MoveFuture<'a> = BoxFuture<'a, Result<Transition>>;

/// The rest of the promotion, handed to an around hook. Consumed by
/// [`Continuation::proceed`], so it can't run twice; not calling it at all is
/// reported as [`EngineError::ContinuationSkipped`].
pub struct Continuation<'a> {
    inner: MoveFuture<'a>,
    calls: Arc<AtomicUsize>,
}

impl Continuation<'_> {
    pub async fn proceed(self) -> Result<Transition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.await
    }
}

#[derive(Clone, Default)]
pub struct LifecycleHooks {
    before: Vec<Arc<dyn BeforeHook>>,
    around: Vec<Arc<dyn AroundHook>>,
    after: Vec<Arc<dyn AfterHook>>,
}

impl LifecycleHooks {
    /// Hooks with default derivative generation wired in as the first
    /// after hook.
    pub fn new() -> Self {
        Self::empty().with_after(super::DerivativesAfterHook)
    }

    /// No hooks at all, not even derivative generation.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, hook: impl BeforeHook + 'static) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn with_around(mut self, hook: impl AroundHook + 'static) -> Self {
        self.around.push(Arc::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl AfterHook + 'static) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    /// Returns the veto, if any hook raised one. Later hooks don't run.
    pub async fn run_before(&self, ctx: &HookContext<'_>) -> Result<Option<AbortReason>> {
        for hook in &self.before {
            let outcome = hook
                .before_promote(ctx)
                .await
                .map_err(|e| hook_error(hook.name(), e))?;
            if let HookOutcome::Abort(reason) = outcome {
                info!(hook = hook.name(), %reason, "Promotion vetoed");
                return Ok(Some(AbortReason::Vetoed {
                    hook: hook.name().to_string(),
                    reason,
                }));
            }
        }
        Ok(None)
    }

    pub async fn run_around<'a>(
        &'a self,
        ctx: &'a HookContext<'a>,
        core: MoveFuture<'a>,
    ) -> Result<Transition> {
        wrap(&self.around, ctx, core).await
    }

    pub async fn run_after(&self, ctx: &HookContext<'_>) -> Result<()> {
        for hook in &self.after {
            debug!(hook = hook.name(), "Running after-promotion hook");
            hook.after_promote(ctx)
                .await
                .map_err(|e| hook_error(hook.name(), e))?;
        }
        Ok(())
    }
}

fn wrap<'a>(
    hooks: &'a [Arc<dyn AroundHook>],
    ctx: &'a HookContext<'a>,
    core: MoveFuture<'a>,
) -> MoveFuture<'a> {
    let Some((hook, rest)) = hooks.split_first() else {
        return core;
    };
    let inner = wrap(rest, ctx, core);

    Box::pin(async move {
        let calls = Arc::new(AtomicUsize::new(0));
        let next = Continuation {
            inner,
            calls: Arc::clone(&calls),
        };
        let result = hook.around_promote(ctx, next).await;
        if calls.load(Ordering::SeqCst) != 1 {
            return Err(EngineError::ContinuationSkipped(hook.name().to_string()));
        }
        result.map_err(|e| hook_error(hook.name(), e))
    })
}

/// Engine errors raised inside a hook (e.g. by a continuation or by inline
/// derivative generation) keep their type; anything else is a hook failure.
fn hook_error(hook: &str, err: anyhow::Error) -> EngineError {
    match err.downcast::<EngineError>() {
        Ok(engine) => engine,
        Err(source) => EngineError::Hook {
            hook: hook.to_string(),
            source,
        },
    }
}
