//! Loader for migrations compiled into the host program.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::{LoadError, Loader};
use crate::migration::{Action, MigrationActions};

/// In-memory migration table.
///
/// The migration directory is ignored; names are whatever the host
/// registers.
#[derive(Clone, Default)]
pub struct StaticLoader {
    migrations: BTreeMap<String, MigrationActions>,
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration.
    pub fn with_migration(
        mut self,
        name: impl Into<String>,
        up: Arc<dyn Action>,
        down: Arc<dyn Action>,
    ) -> Self {
        self.migrations
            .insert(name.into(), MigrationActions::new(up, down));
        self
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Check if no migrations are registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl Loader for StaticLoader {
    fn discover(&self, _dir: &Path) -> Result<Vec<String>, LoadError> {
        Ok(self.migrations.keys().cloned().collect())
    }

    fn load(&self, _dir: &Path, name: &str) -> Result<MigrationActions, LoadError> {
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                name: name.to_string(),
            })
    }
}
