//! Derivative generation: declared generators, the race-safe store that
//! persists their output, and the pipeline tying the two to an asset.

mod builtin;
mod generator;
mod store;

pub use builtin::{Excerpt, Gzip, builtin_registry};
pub use generator::{
    DerivativeGenerator, GeneratedFile, GeneratorRegistry, SourceFile, content_type_matches,
};
pub use store::{
    AttachOutcome, DerivativeMetadata, DerivativeStore, MAX_ATTEMPTS, NewDerivative,
};

use common::{DerivativeSelection, Directives, ExecutionMode, JobOperation};
use sea_orm::EntityTrait;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::entity::{asset, derivative};
use crate::error::{EngineError, Result};
use crate::outcome::AbortReason;
use crate::source::{self, SourceRead};
use crate::state::Engine;

/// What one pipeline run did.
#[derive(Debug, Default)]
pub struct DerivativeReport {
    /// Rows created or updated, in generation order.
    pub attached: Vec<derivative::Model>,
    /// Generators that didn't apply to the file or produced nothing.
    pub skipped: Vec<String>,
    /// Set when the run stopped because the source changed or vanished.
    pub aborted: Option<AbortReason>,
}

impl DerivativeReport {
    pub fn attached_keys(&self) -> Vec<&str> {
        self.attached.iter().map(|d| d.key.as_str()).collect()
    }

    fn aborted(reason: AbortReason) -> Self {
        Self {
            aborted: Some(reason),
            ..Default::default()
        }
    }
}

/// How a derivatives request was carried out.
#[derive(Debug)]
pub enum DerivativeRun {
    /// `create_derivatives` is `false`.
    Disabled,
    /// Handed to the job queue.
    Enqueued,
    Completed(DerivativeReport),
}

pub struct DerivativePipeline<'a> {
    engine: &'a Engine,
}

impl<'a> DerivativePipeline<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run, enqueue or skip generation according to `create_derivatives`.
    ///
    /// The selection is resolved first, so unknown keys fail here rather
    /// than inside a background job.
    pub async fn request(
        &self,
        asset_id: Uuid,
        selection: &DerivativeSelection,
        directives: &Directives,
    ) -> Result<DerivativeRun> {
        self.engine.generators.select(selection)?;

        match directives.create_derivatives() {
            ExecutionMode::Disabled => {
                debug!(%asset_id, "Derivative creation disabled");
                Ok(DerivativeRun::Disabled)
            }
            ExecutionMode::Inline => Ok(DerivativeRun::Completed(
                self.run(asset_id, selection).await?,
            )),
            ExecutionMode::Background => {
                let operation = JobOperation::CreateDerivatives {
                    selection: selection.clone(),
                };
                self.engine.enqueue(operation, asset_id, directives).await?;
                Ok(DerivativeRun::Enqueued)
            }
        }
    }

    /// Generate and attach the selected derivatives now.
    ///
    /// The fingerprint is captured before any generator runs and every
    /// attach is checked against it. The first abort ends the run, since
    /// the remaining generators would be working from the same stale bytes.
    #[instrument(skip(self, selection))]
    pub async fn run(
        &self,
        asset_id: Uuid,
        selection: &DerivativeSelection,
    ) -> Result<DerivativeReport> {
        let generators = self.engine.generators.select(selection)?;

        let Some(asset) = asset::Entity::find_by_id(asset_id)
            .one(&self.engine.db)
            .await?
        else {
            info!("Asset gone, nothing to generate");
            return Ok(DerivativeReport::aborted(AbortReason::AssetMissing));
        };

        let expected = asset.parsed_fingerprint()?;
        let (asset, data) = match source::read_current(self.engine, asset, &expected).await? {
            SourceRead::Current { asset, data } => (asset, data),
            SourceRead::Stale(reason) => {
                info!(%reason, "Source changed before generation");
                return Ok(DerivativeReport::aborted(reason));
            }
        };

        let source = SourceFile::new(&asset, &data);
        let store = self.engine.derivative_store();
        let mut report = DerivativeReport::default();

        for generator in generators {
            let key = generator.key();
            if !generator.applies_to(source.content_type) {
                debug!(key, content_type = ?source.content_type, "Generator does not apply");
                report.skipped.push(key.to_string());
                continue;
            }

            let generated = generator
                .generate(&source)
                .await
                .map_err(|err| EngineError::Generation {
                    key: key.to_string(),
                    source: err,
                })?;
            let Some(generated) = generated else {
                debug!(key, "Generator produced nothing");
                report.skipped.push(key.to_string());
                continue;
            };

            let new = NewDerivative {
                key: key.to_string(),
                data: generated.data,
                extension: generated.extension,
                metadata: generated.metadata,
            };
            match store.attach(asset.id, &expected, new).await? {
                AttachOutcome::Attached(model) => report.attached.push(model),
                AttachOutcome::Aborted(reason) => {
                    report.aborted = Some(reason);
                    break;
                }
            }
        }

        info!(
            attached = report.attached.len(),
            skipped = report.skipped.len(),
            aborted = report.aborted.is_some(),
            "Derivative run finished"
        );
        Ok(report)
    }
}
