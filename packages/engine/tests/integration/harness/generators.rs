use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use async_trait::async_trait;

use engine::{DerivativeGenerator, GeneratedFile, SourceFile};

/// Emits `{key}:{source}` for every file.
pub struct Fixed {
    pub key: &'static str,
    pub default: bool,
}

impl Fixed {
    pub fn new(key: &'static str) -> Self {
        Self { key, default: true }
    }

    pub fn non_default(key: &'static str) -> Self {
        Self {
            key,
            default: false,
        }
    }
}

#[async_trait]
impl DerivativeGenerator for Fixed {
    fn key(&self) -> &str {
        self.key
    }

    fn is_default(&self) -> bool {
        self.default
    }

    async fn generate(&self, source: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>> {
        let mut data = format!("{}:", self.key).into_bytes();
        data.extend_from_slice(source.data);
        Ok(Some(GeneratedFile::new(data).with_extension("bin")))
    }
}

pub struct Failing;

#[async_trait]
impl DerivativeGenerator for Failing {
    fn key(&self) -> &str {
        "broken"
    }

    fn is_default(&self) -> bool {
        false
    }

    async fn generate(&self, _: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>> {
        bail!("decoder exploded")
    }
}

/// Produces output until `skip` is set, then returns nothing.
#[derive(Clone, Default)]
pub struct Toggle {
    pub skip: Arc<AtomicBool>,
}

#[async_trait]
impl DerivativeGenerator for Toggle {
    fn key(&self) -> &str {
        "toggle"
    }

    async fn generate(&self, source: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>> {
        if self.skip.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(GeneratedFile::new(source.data.to_vec())))
    }
}
