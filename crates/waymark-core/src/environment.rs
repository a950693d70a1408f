//! Shared run environment.
//!
//! The environment is mutated by middleware and wards during setup and is
//! read-only for migration actions afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::loader::Loader;
use crate::storage::StateStore;
use crate::ward::Ward;

/// Default migration directory.
pub const DEFAULT_MIGRATIONS_PATH: &str = "./migrations";

/// Option key naming the state file used by the file storage backend.
pub const STORAGE_FILE_OPTION: &str = "storage.file";

/// Default state file name, relative to the migration directory.
pub const DEFAULT_STATE_FILE: &str = ".waymark.json";

/// Configuration shared by middleware, wards, the registry and actions.
pub struct Environment {
    /// Directory containing migration scripts.
    pub path: PathBuf,

    /// Backend-specific options.
    pub options: BTreeMap<String, Value>,

    /// Loader used to discover and build migrations.
    pub loader: Option<Arc<dyn Loader>>,

    /// Backend persisting the completed migration set.
    pub state_store: Option<Arc<dyn StateStore>>,

    /// Setup wards, drained in order on every setup.
    pub wards: Vec<Arc<dyn Ward>>,
}

impl Environment {
    /// Create an environment for the given migration directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: BTreeMap::new(),
            loader: None,
            state_store: None,
            wards: Vec::new(),
        }
    }

    /// Set an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the migration loader.
    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the state store.
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Queue a ward.
    pub fn with_ward(mut self, ward: Arc<dyn Ward>) -> Self {
        self.wards.push(ward);
        self
    }

    /// Queue a ward in place. Used by middleware and by running wards.
    pub fn push_ward(&mut self, ward: Arc<dyn Ward>) {
        self.wards.push(ward);
    }

    /// Get an option as a string.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Path of the file storage state file.
    pub fn state_file(&self) -> PathBuf {
        let file = self
            .option_str(STORAGE_FILE_OPTION)
            .unwrap_or(DEFAULT_STATE_FILE);
        self.path.join(file)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(DEFAULT_MIGRATIONS_PATH)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("loader", &self.loader.is_some())
            .field("state_store", &self.state_store.is_some())
            .field("wards", &self.wards.len())
            .finish()
    }
}
