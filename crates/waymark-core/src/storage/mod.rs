//! Persistence of the completed migration set.
//!
//! A [`StateStore`] only knows how to read and overwrite the list of
//! completed migration names. Merging and diffing live in the registry.

mod file;
mod sled_store;

pub use file::FileStateStore;
pub use sled_store::{OpenSledWard, SledStateStore};

use async_trait::async_trait;
use thiserror::Error;

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// State could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Embedded database error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Backend holding the names of completed migrations.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the completed names. A missing state means nothing is completed.
    async fn load(&self) -> Result<Vec<String>, StorageError>;

    /// Overwrite the completed names.
    async fn save(&self, names: &[String]) -> Result<(), StorageError>;
}
