use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StorageError;

/// A validated, relative key inside a blob store.
///
/// Segments are separated by `/`; empty segments, `.`/`..` and backslashes are
/// rejected so a location can never escape the store root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobLocation(String);

impl BlobLocation {
    pub fn parse(s: impl Into<String>) -> Result<Self, StorageError> {
        let s = s.into();
        if s.is_empty() {
            return Err(StorageError::InvalidLocation("empty location".into()));
        }
        if s.contains('\\') || s.contains('\0') {
            return Err(StorageError::InvalidLocation(format!(
                "'{s}' contains a forbidden character"
            )));
        }
        for segment in s.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidLocation(format!(
                    "'{s}' contains an invalid path segment"
                )));
            }
        }
        Ok(Self(s))
    }

    /// Fresh location for an asset's source file: `{asset_id}/{uuid}[.ext]`.
    pub fn for_asset(asset_id: Uuid, extension: Option<&str>) -> Self {
        Self(format!(
            "{asset_id}/{}{}",
            Uuid::now_v7().simple(),
            ext_suffix(extension)
        ))
    }

    /// Fresh location for a derivative blob:
    /// `{asset_id}/derivatives/{key}/{uuid}[.ext]`.
    ///
    /// Every write gets its own location, so two writers racing on the same
    /// key never overwrite each other's bytes; the loser's blob is deleted
    /// explicitly instead.
    pub fn for_derivative(asset_id: Uuid, key: &str, extension: Option<&str>) -> Self {
        let key: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self(format!(
            "{asset_id}/derivatives/{key}/{}{}",
            Uuid::now_v7().simple(),
            ext_suffix(extension)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn ext_suffix(extension: Option<&str>) -> String {
    match extension.map(|e| e.trim_start_matches('.')) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobLocation {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<BlobLocation> for String {
    fn from(value: BlobLocation) -> Self {
        value.0
    }
}

/// Which of the two stores a file lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageName {
    /// Temporary storage for files that have not been promoted yet.
    Cache,
    /// Permanent storage.
    Store,
}

impl StorageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "store" => Ok(Self::Store),
            other => Err(StorageError::InvalidLocation(format!(
                "unknown storage '{other}'"
            ))),
        }
    }
}

/// A blob together with the store it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub storage: StorageName,
    pub location: BlobLocation,
}

impl StoredFile {
    pub fn new(storage: StorageName, location: BlobLocation) -> Self {
        Self { storage, location }
    }
}
