mod error;
mod fingerprint;
mod location;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use fingerprint::Fingerprint;
pub use location::{BlobLocation, StorageName, StoredFile};
pub use traits::{BlobStore, BoxReader};
