use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use super::error::StorageError;

const DIGEST_LEN: usize = 64;

/// SHA-512 digest of a source file's bytes.
///
/// The fingerprint is the only thing consulted when deciding whether an
/// asset's file changed underneath an in-flight operation, so two fingerprints
/// compare equal exactly when the bytes they were computed from are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; DIGEST_LEN]);

impl Fingerprint {
    /// Compute the fingerprint of the given data.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha512::digest(data);
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Parse a hex-encoded fingerprint (128 characters).
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        if s.len() != DIGEST_LEN * 2 {
            return Err(StorageError::InvalidFingerprint(format!(
                "expected {} hex characters, got {}",
                DIGEST_LEN * 2,
                s.len()
            )));
        }

        let bytes = hex::decode(s)
            .map_err(|e| StorageError::InvalidFingerprint(format!("bad hex: {e}")))?;

        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidFingerprint("wrong digest length".into()))?;

        Ok(Self(arr))
    }

    /// Lowercase hex representation, as persisted in the asset table.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Whether `data` hashes to this fingerprint.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The full digest is noisy in logs; 16 hex chars is plenty to tell files apart.
        write!(f, "Fingerprint({}…)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
