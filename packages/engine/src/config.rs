use std::collections::BTreeMap;
use std::path::PathBuf;

use common::{DirectiveError, Directives};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Pool size. Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of temporary storage for unpromoted files. Default: "./data/cache".
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Root of permanent storage. Default: "./data/store".
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Largest blob either store accepts, in bytes. Default: 100 MiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
}

fn default_cache_dir() -> PathBuf {
    "./data/cache".into()
}
fn default_store_dir() -> PathBuf {
    "./data/store".into()
}
fn default_max_blob_size() -> u64 {
    100 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            store_dir: default_store_dir(),
            max_blob_size: default_max_blob_size(),
        }
    }
}

/// Process-wide directive defaults, e.g.
///
/// ```toml
/// [directives]
/// promote = "inline"
/// create_derivatives = "false"
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct DirectivesConfig(pub BTreeMap<String, String>);

impl DirectivesConfig {
    /// Validate every entry. A typo here fails startup instead of being
    /// ignored.
    pub fn to_directives(&self) -> Result<Directives, DirectiveError> {
        let mut directives = Directives::new();
        for (key, value) in &self.0 {
            directives.set_str(key, value)?;
        }
        Ok(directives)
    }
}
