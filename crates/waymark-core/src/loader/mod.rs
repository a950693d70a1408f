//! Resolving migration names to executable actions.
//!
//! The orchestrator contains no module-resolution logic of its own; it asks
//! the environment's [`Loader`] which migrations exist and what they do.

mod fixed;
mod script;

pub use fixed::StaticLoader;
pub use script::{MigrationScript, ScriptAction, ScriptLoader, DEFAULT_TEMPLATE};

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::migration::MigrationActions;

/// Migration loading errors.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No migration with this name exists.
    #[error("migration not found: {name}")]
    NotFound {
        /// The requested migration name.
        name: String,
    },

    /// The migration source could not be parsed.
    #[error("invalid migration {name}: {message}")]
    Parse {
        /// The migration name.
        name: String,
        /// Parser message.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discovers and loads migrations.
pub trait Loader: Send + Sync {
    /// Names of every available migration in `dir`, ascending.
    fn discover(&self, dir: &Path) -> Result<Vec<String>, LoadError>;

    /// Resolve the forward and backward actions for `name`.
    fn load(&self, dir: &Path, name: &str) -> Result<MigrationActions, LoadError>;
}

/// Run a loader call on the blocking pool.
///
/// Loaders are synchronous and may touch the filesystem.
pub(crate) async fn spawn_load<T, F>(loader: &Arc<dyn Loader>, f: F) -> Result<T, LoadError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Loader) -> Result<T, LoadError> + Send + 'static,
{
    let loader = Arc::clone(loader);
    tokio::task::spawn_blocking(move || f(loader.as_ref()))
        .await
        .map_err(|e| LoadError::Io(std::io::Error::other(e)))?
}
