//! Synchronous environment middleware.
//!
//! Middleware runs at the start of every setup, in registration order, and
//! is never deduplicated: registering the same middleware twice runs it
//! twice, and every setup re-applies the whole list.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::environment::Environment;
use crate::error::Result;
use crate::loader::ScriptLoader;
use crate::storage::{FileStateStore, StateStore};
use crate::ward::{Next, Ward};

/// A one-shot environment configurator.
pub trait Middleware: Send + Sync {
    /// Configure the environment. May queue wards.
    fn apply(&self, env: &mut Environment) -> Result<()>;
}

impl<F> Middleware for F
where
    F: Fn(&mut Environment) -> Result<()> + Send + Sync,
{
    fn apply(&self, env: &mut Environment) -> Result<()> {
        self(env)
    }
}

/// Installs the script loader unless a loader is already configured.
pub fn migrations() -> Arc<dyn Middleware> {
    Arc::new(|env: &mut Environment| -> Result<()> {
        if env.loader.is_none() {
            tracing::debug!("installing script loader");
            env.loader = Some(Arc::new(ScriptLoader::new()));
        }
        Ok(())
    })
}

/// Installs the JSON file state store unless a store is already configured.
///
/// The file lives in the migration directory; its name comes from the
/// `storage.file` option. A store installed here is rebuilt whenever that
/// path changes, including changes made by middleware registered later:
/// the check runs again from a ward queued on first use, after every
/// middleware has been applied. Stores installed by anything else are
/// left alone.
pub fn file_storage() -> Arc<dyn Middleware> {
    let installer = Arc::new(FileStoreInstaller::default());
    Arc::new(FileStorage {
        ward: Arc::new(RefreshFileStore(Arc::clone(&installer))),
        installer,
    })
}

struct InstalledStore {
    path: PathBuf,
    store: Arc<dyn StateStore>,
}

#[derive(Default)]
struct FileStoreInstaller {
    installed: Mutex<Option<InstalledStore>>,
}

impl FileStoreInstaller {
    fn refresh(&self, env: &mut Environment) {
        let path = env.state_file();
        let mut installed = self.installed.lock();

        let stale = match (&env.state_store, installed.as_ref()) {
            (None, _) => true,
            (Some(current), Some(ours)) => {
                Arc::ptr_eq(current, &ours.store) && ours.path != path
            }
            (Some(_), None) => false,
        };
        if !stale {
            return;
        }

        tracing::debug!(path = %path.display(), "installing file state store");
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&path));
        env.state_store = Some(Arc::clone(&store));
        *installed = Some(InstalledStore { path, store });
    }
}

struct FileStorage {
    installer: Arc<FileStoreInstaller>,
    ward: Arc<dyn Ward>,
}

impl Middleware for FileStorage {
    fn apply(&self, env: &mut Environment) -> Result<()> {
        self.installer.refresh(env);

        let queued = env.wards.iter().any(|ward| Arc::ptr_eq(ward, &self.ward));
        if !queued {
            env.push_ward(Arc::clone(&self.ward));
        }
        Ok(())
    }
}

struct RefreshFileStore(Arc<FileStoreInstaller>);

#[async_trait]
impl Ward for RefreshFileStore {
    fn name(&self) -> &str {
        "refresh-file-storage"
    }

    async fn call(&self, env: &mut Environment, next: Next) {
        self.0.refresh(env);
        next.signal();
    }
}
