//! Embedded sled state store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{StateStore, StorageError};
use crate::environment::Environment;
use crate::ward::{Next, Ward};

/// Stores the completed set in a sled tree, one key per migration name.
///
/// Values hold the completion time in milliseconds since the epoch.
#[derive(Clone)]
pub struct SledStateStore {
    tree: sled::Tree,
}

impl SledStateStore {
    /// Tree name for completed migrations.
    pub const TREE_NAME: &'static str = "waymark:completed";

    /// Open or create the store inside an existing database.
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn load(&self) -> Result<Vec<String>, StorageError> {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StorageError> {
            let mut names = Vec::new();
            for result in tree.iter() {
                let (key, _) = result?;
                let name = String::from_utf8(key.to_vec())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                names.push(name);
            }
            Ok(names)
        })
        .await
        .map_err(join_error)?
    }

    async fn save(&self, names: &[String]) -> Result<(), StorageError> {
        let store = self.clone();
        let names = names.to_vec();
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut batch = sled::Batch::default();
            for result in store.tree.iter().keys() {
                batch.remove(result?);
            }
            for name in &names {
                batch.insert(name.as_bytes(), &now.to_be_bytes()[..]);
            }
            store.tree.apply_batch(batch)?;
            store.flush()?;

            tracing::debug!(tree = SledStateStore::TREE_NAME, count = names.len(), "completed set stored");
            Ok(())
        })
        .await
        .map_err(join_error)?
    }
}

fn join_error(err: tokio::task::JoinError) -> StorageError {
    StorageError::Io(std::io::Error::other(err))
}

/// Ward that opens a sled database and installs it as the state store.
///
/// Opening happens on the blocking pool. The database handle is cached, so
/// later setups reuse it instead of reopening the locked directory.
pub struct OpenSledWard {
    path: PathBuf,
    db: OnceCell<sled::Db>,
}

impl OpenSledWard {
    /// Create a ward for the database directory at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            db: OnceCell::new(),
        })
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn database(&self) -> Result<&sled::Db, StorageError> {
        self.db
            .get_or_try_init(|| async {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || sled::open(path))
                    .await
                    .map_err(join_error)
                    .and_then(|opened| opened.map_err(StorageError::from))
            })
            .await
    }
}

#[async_trait]
impl Ward for OpenSledWard {
    fn name(&self) -> &str {
        "open-sled"
    }

    async fn call(&self, env: &mut Environment, next: Next) {
        match self.database().await.and_then(SledStateStore::open) {
            Ok(store) => {
                tracing::debug!(path = %self.path.display(), "sled state store ready");
                env.state_store = Some(Arc::new(store));
                next.signal();
            }
            Err(e) => {
                // Wards cannot fail setup; the continuation is withheld.
                tracing::error!(path = %self.path.display(), error = %e, "failed to open sled state store");
            }
        }
    }
}
