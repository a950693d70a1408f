//! Registry of available and completed migrations.
//!
//! The registry joins the loader's view of which migrations exist with the
//! state store's view of which ones have run, and owns the set arithmetic
//! between the two.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::loader::{spawn_load, Loader, DEFAULT_TEMPLATE};
use crate::migration::Direction;
use crate::storage::StateStore;

/// Whether an available migration has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration name.
    pub name: String,
    /// Whether the migration is in the completed set.
    pub applied: bool,
}

/// View over available and completed migrations for one environment.
pub struct Registry {
    path: PathBuf,
    loader: Arc<dyn Loader>,
    store: Arc<dyn StateStore>,
}

impl Registry {
    /// Create a registry scoped to the environment's loader and state store.
    pub fn from_env(env: &Environment) -> Result<Self> {
        let loader = env
            .loader
            .clone()
            .ok_or_else(|| Error::Config("no migration loader configured".to_string()))?;
        let store = env
            .state_store
            .clone()
            .ok_or_else(|| Error::Config("no state store configured".to_string()))?;

        Ok(Self {
            path: env.path.clone(),
            loader,
            store,
        })
    }

    /// The migration directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every available migration name, ascending.
    pub async fn available(&self) -> Result<Vec<String>> {
        let path = self.path.clone();
        let mut names = spawn_load(&self.loader, move |loader| loader.discover(&path)).await?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// The persisted completed names.
    pub async fn completed(&self) -> Result<Vec<String>> {
        Ok(self.store.load().await?)
    }

    /// Migrations still to run in `direction`.
    ///
    /// Up: available minus completed, ascending. Down: completed, descending.
    pub async fn pending(&self, direction: Direction) -> Result<Vec<String>> {
        let available = self.available().await?;
        let completed: BTreeSet<String> = self.completed().await?.into_iter().collect();

        let known: BTreeSet<&String> = available.iter().collect();
        for name in completed.iter().filter(|name| !known.contains(name)) {
            tracing::warn!(name = %name, "completed migration is no longer available");
        }

        let pending = match direction {
            Direction::Up => available
                .into_iter()
                .filter(|name| !completed.contains(name))
                .collect(),
            Direction::Down => completed.into_iter().rev().collect(),
        };
        Ok(pending)
    }

    /// Overwrite the completed set.
    pub async fn put_completed(&self, names: &[String]) -> Result<()> {
        self.store.save(names).await?;
        tracing::debug!(count = names.len(), "completed set replaced");
        Ok(())
    }

    /// Merge a run's names into the completed set.
    ///
    /// Up adds the names, down removes them. The stored set stays ascending.
    pub async fn append_completed(&self, direction: Direction, names: &[String]) -> Result<()> {
        let mut completed: BTreeSet<String> = self.completed().await?.into_iter().collect();

        match direction {
            Direction::Up => completed.extend(names.iter().cloned()),
            Direction::Down => {
                for name in names {
                    completed.remove(name);
                }
            }
        }

        let merged: Vec<String> = completed.into_iter().collect();
        self.store.save(&merged).await?;
        tracing::debug!(%direction, changed = names.len(), total = merged.len(), "completed set updated");
        Ok(())
    }

    /// Status of every available migration, ascending.
    pub async fn statuses(&self) -> Result<Vec<MigrationStatus>> {
        let completed: BTreeSet<String> = self.completed().await?.into_iter().collect();
        Ok(self
            .available()
            .await?
            .into_iter()
            .map(|name| MigrationStatus {
                applied: completed.contains(&name),
                name,
            })
            .collect())
    }

    /// Materialize a new migration file from a template.
    ///
    /// Without a template the built-in empty script is written. Existing
    /// files are never overwritten.
    pub async fn create(&self, filename: &str, template: Option<&Path>) -> Result<PathBuf> {
        let content = match template {
            Some(template) => tokio::fs::read(template).await?,
            None => DEFAULT_TEMPLATE.as_bytes().to_vec(),
        };

        tokio::fs::create_dir_all(&self.path).await?;
        let target = self.path.join(filename);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(target));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&content).await?;
        file.flush().await?;

        tracing::debug!(path = %target.display(), "migration file created");
        Ok(target)
    }
}
