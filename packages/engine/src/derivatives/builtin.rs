use std::io::Write;

use anyhow::Context;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use super::generator::{DerivativeGenerator, GeneratedFile, GeneratorRegistry, SourceFile};

/// Plain-text preview of a text file: its first `max_chars` characters.
pub struct Excerpt {
    max_chars: usize,
}

impl Excerpt {
    pub const KEY: &'static str = "excerpt";

    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for Excerpt {
    fn default() -> Self {
        Self::new(280)
    }
}

#[async_trait]
impl DerivativeGenerator for Excerpt {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn content_types(&self) -> &[&str] {
        &["text"]
    }

    async fn generate(&self, source: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>> {
        let text = String::from_utf8_lossy(source.data);
        let excerpt: String = text.trim().chars().take(self.max_chars).collect();
        if excerpt.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            GeneratedFile::new(excerpt.into_bytes())
                .with_extension("txt")
                .with_content_type("text/plain"),
        ))
    }
}

/// Gzip-compressed copy of the source. Not generated unless asked for.
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub const KEY: &'static str = "gzip";

    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

#[async_trait]
impl DerivativeGenerator for Gzip {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn is_default(&self) -> bool {
        false
    }

    async fn generate(&self, source: &SourceFile<'_>) -> anyhow::Result<Option<GeneratedFile>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(source.data)
            .context("Failed to compress source")?;
        let compressed = encoder.finish().context("Failed to finish gzip stream")?;

        Ok(Some(
            GeneratedFile::new(compressed)
                .with_extension("gz")
                .with_content_type("application/gzip"),
        ))
    }
}

/// Registry holding the built-in generators.
pub fn builtin_registry() -> GeneratorRegistry {
    GeneratorRegistry::new()
        .with(Excerpt::default())
        .with(Gzip::default())
}
