use std::sync::Arc;

use async_trait::async_trait;
use common::DerivativeSelection;
use tracing::warn;
use uuid::Uuid;

use crate::entity::asset;
use crate::error::{EngineError, Result};

use super::store::DerivativeMetadata;

/// The asset file a generator works from.
#[derive(Clone, Copy, Debug)]
pub struct SourceFile<'a> {
    pub asset_id: Uuid,
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> SourceFile<'a> {
    pub fn new(asset: &'a asset::Model, data: &'a [u8]) -> Self {
        Self {
            asset_id: asset.id,
            filename: &asset.filename,
            content_type: asset.content_type.as_deref(),
            data,
        }
    }
}

/// Output of one generator run.
#[derive(Clone, Debug, Default)]
pub struct GeneratedFile {
    pub data: Vec<u8>,
    pub extension: Option<String>,
    pub metadata: DerivativeMetadata,
}

impl GeneratedFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = Some(content_type.into());
        self
    }

    pub fn with_dimensions(mut self, width: i32, height: i32) -> Self {
        self.metadata.width = Some(width);
        self.metadata.height = Some(height);
        self
    }
}

/// A declared derivative.
///
/// `generate` runs outside any transaction and may be slow. Returning
/// `Ok(None)` means "nothing to produce for this file": no row is created or
/// updated, and an existing derivative for the key is left as it is.
#[async_trait]
pub trait DerivativeGenerator: Send + Sync {
    /// Unique key of the derivative within an asset.
    fn key(&self) -> &str;

    /// Whether the generator runs when no explicit selection is given.
    fn is_default(&self) -> bool {
        true
    }

    /// Content types this generator accepts: exact types (`image/png`) or
    /// broad categories (`image`). Empty accepts everything.
    fn content_types(&self) -> &[&str] {
        &[]
    }

    /// Whether the generator should run for a file of `content_type`.
    fn applies_to(&self, content_type: Option<&str>) -> bool {
        content_type_matches(self.content_types(), content_type)
    }

    async fn generate(&self, source: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>>;
}

/// Match a content type against exact-type or category conditions.
pub fn content_type_matches(conditions: &[&str], content_type: Option<&str>) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let Some(content_type) = content_type else {
        return false;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let category = essence.split('/').next().unwrap_or_default();

    conditions.iter().any(|condition| {
        let condition = condition.trim().to_ascii_lowercase();
        if condition.contains('/') {
            condition == essence
        } else {
            condition == category
        }
    })
}

/// Declared generators in registration order.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: Vec<Arc<dyn DerivativeGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator. A generator with the same key is replaced in
    /// place, keeping its position.
    pub fn register(&mut self, generator: Arc<dyn DerivativeGenerator>) -> &mut Self {
        match self
            .generators
            .iter_mut()
            .find(|g| g.key() == generator.key())
        {
            Some(slot) => {
                warn!(key = generator.key(), "Replacing derivative generator");
                *slot = generator;
            }
            None => self.generators.push(generator),
        }
        self
    }

    pub fn with(mut self, generator: impl DerivativeGenerator + 'static) -> Self {
        self.register(Arc::new(generator));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn DerivativeGenerator>> {
        self.generators.iter().find(|g| g.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.generators.iter().map(|g| g.key())
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Resolve a selection to generators, in run order.
    ///
    /// `Only` keeps the caller's order and may name non-default generators.
    /// `Except` filters the default set. Unknown keys are an error either way.
    pub fn select(
        &self,
        selection: &DerivativeSelection,
    ) -> Result<Vec<Arc<dyn DerivativeGenerator>>> {
        match selection {
            DerivativeSelection::Default => Ok(self.defaults().collect()),
            DerivativeSelection::Only(keys) => {
                let mut selected: Vec<Arc<dyn DerivativeGenerator>> = Vec::new();
                for key in keys {
                    let generator = self
                        .get(key)
                        .ok_or_else(|| EngineError::UnknownDerivative(key.clone()))?;
                    if !selected.iter().any(|g| g.key() == key) {
                        selected.push(Arc::clone(generator));
                    }
                }
                Ok(selected)
            }
            DerivativeSelection::Except(keys) => {
                if let Some(unknown) = keys.iter().find(|k| self.get(k).is_none()) {
                    return Err(EngineError::UnknownDerivative(unknown.clone()));
                }
                Ok(self
                    .defaults()
                    .filter(|g| !keys.iter().any(|k| k == g.key()))
                    .collect())
            }
        }
    }

    fn defaults(&self) -> impl Iterator<Item = Arc<dyn DerivativeGenerator>> + '_ {
        self.generators
            .iter()
            .filter(|g| g.is_default())
            .map(Arc::clone)
    }
}
