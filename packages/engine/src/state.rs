use std::sync::Arc;

use common::storage::{BlobStore, StorageName, StoredFile};
use common::{AssetJob, DirectiveDefaults, Directives, JobOperation, JobQueue};
use sea_orm::DatabaseConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::attacher::Attacher;
use crate::derivatives::{DerivativePipeline, DerivativeStore, GeneratorRegistry};
use crate::error::Result;
use crate::jobs::JobRunner;
use crate::promotion::{LifecycleHooks, PromotionMachine};

/// Shared handles to everything the engine talks to. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub db: DatabaseConnection,
    /// Temporary storage for files that haven't been promoted.
    pub cache: Arc<dyn BlobStore>,
    /// Permanent storage for promoted files and derivatives.
    pub store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub defaults: DirectiveDefaults,
    pub generators: Arc<GeneratorRegistry>,
    pub hooks: Arc<LifecycleHooks>,
}

impl Engine {
    pub fn new(
        db: DatabaseConnection,
        cache: Arc<dyn BlobStore>,
        store: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            db,
            cache,
            store,
            queue,
            defaults: DirectiveDefaults::default(),
            generators: Arc::new(GeneratorRegistry::new()),
            hooks: Arc::new(LifecycleHooks::new()),
        }
    }

    pub fn with_defaults(mut self, defaults: DirectiveDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_generators(mut self, generators: GeneratorRegistry) -> Self {
        self.generators = Arc::new(generators);
        self
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn storage(&self, name: StorageName) -> &Arc<dyn BlobStore> {
        match name {
            StorageName::Cache => &self.cache,
            StorageName::Store => &self.store,
        }
    }

    pub fn attacher(&self) -> Attacher<'_> {
        Attacher::new(self)
    }

    pub fn promotion(&self) -> PromotionMachine<'_> {
        PromotionMachine::new(self)
    }

    pub fn derivatives(&self) -> DerivativePipeline<'_> {
        DerivativePipeline::new(self)
    }

    pub fn derivative_store(&self) -> DerivativeStore {
        DerivativeStore::new(self.db.clone(), Arc::clone(&self.store))
    }

    pub fn jobs(&self) -> JobRunner<'_> {
        JobRunner::new(self)
    }

    /// Hand an operation to the job queue together with the directives it
    /// must resume with.
    pub async fn enqueue(
        &self,
        operation: JobOperation,
        asset_id: Uuid,
        directives: &Directives,
    ) -> Result<()> {
        let job = AssetJob::new(operation, asset_id, directives);
        info!(
            job_id = %job.job_id,
            operation = job.operation.name(),
            %asset_id,
            "Enqueueing asset job"
        );
        self.queue.enqueue(job).await?;
        Ok(())
    }

    /// Delete files from whichever store they live in. Missing files are
    /// not an error, so a repeated run is harmless. Returns how many existed.
    pub async fn delete_files(&self, files: &[StoredFile]) -> Result<usize> {
        let mut deleted = 0;
        for file in files {
            if self.storage(file.storage).delete(&file.location).await? {
                deleted += 1;
            } else {
                debug!(storage = %file.storage, location = %file.location, "File already gone");
            }
        }
        Ok(deleted)
    }
}
