//! Shell-script migrations stored as JSON files.
//!
//! A migration file lists the shell commands for each direction:
//!
//! ```json
//! {
//!   "up": ["psql -f schema/users.sql"],
//!   "down": ["psql -c 'DROP TABLE users'"]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LoadError, Loader};
use crate::environment::Environment;
use crate::migration::{Action, ActionError, MigrationActions, MIGRATION_EXTENSION};

/// Template written by `create` when no template file is given.
pub const DEFAULT_TEMPLATE: &str = "{\n  \"up\": [],\n  \"down\": []\n}\n";

/// Prefix for environment options exported to commands.
const OPTION_ENV_PREFIX: &str = "WAYMARK_";

/// Parsed migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScript {
    /// Commands run when migrating up.
    #[serde(default)]
    pub up: Vec<String>,
    /// Commands run when migrating down.
    #[serde(default)]
    pub down: Vec<String>,
}

/// Runs a list of shell commands in order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    commands: Vec<String>,
    workdir: PathBuf,
}

impl ScriptAction {
    /// Create an action running `commands` from `workdir`.
    pub fn new(commands: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            workdir: workdir.into(),
        }
    }

    /// The commands this action runs.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

/// Environment variable name for an option key.
fn option_var(key: &str) -> String {
    let mut var = String::with_capacity(OPTION_ENV_PREFIX.len() + key.len());
    var.push_str(OPTION_ENV_PREFIX);
    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            var.push(c.to_ascii_uppercase());
        } else {
            var.push('_');
        }
    }
    var
}

#[async_trait]
impl Action for ScriptAction {
    async fn run(&self, env: &Environment) -> Result<(), ActionError> {
        let vars: Vec<(String, String)> = env
            .options
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|v| (option_var(key), v.to_string())))
            .collect();

        for command in &self.commands {
            tracing::debug!(command = %command, workdir = %self.workdir.display(), "running command");

            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.workdir)
                .envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .status()
                .await?;

            if !status.success() {
                return Err(ActionError::CommandFailed {
                    command: command.clone(),
                    status: status.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Loads JSON migration scripts from the migration directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptLoader;

impl ScriptLoader {
    /// Create a script loader.
    pub fn new() -> Self {
        Self
    }

    /// Check whether a file name looks like a migration: a decimal
    /// timestamp, a hyphen, a label and the migration extension.
    pub fn is_migration_file(file_name: &str) -> bool {
        let Some(stem) = file_name
            .strip_suffix(MIGRATION_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
        else {
            return false;
        };

        match stem.split_once('-') {
            Some((timestamp, label)) => {
                !timestamp.is_empty()
                    && timestamp.bytes().all(|b| b.is_ascii_digit())
                    && !label.is_empty()
            }
            None => false,
        }
    }

    /// Parse a migration file.
    pub fn parse(name: &str, source: &str) -> Result<MigrationScript, LoadError> {
        serde_json::from_str(source).map_err(|e| LoadError::Parse {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl Loader for ScriptLoader {
    fn discover(&self, dir: &Path) -> Result<Vec<String>, LoadError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "migration directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if Self::is_migration_file(name) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn load(&self, dir: &Path, name: &str) -> Result<MigrationActions, LoadError> {
        let path = dir.join(name);
        let source = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound {
                name: name.to_string(),
            },
            _ => LoadError::Io(e),
        })?;

        let script = Self::parse(name, &source)?;
        Ok(MigrationActions::new(
            Arc::new(ScriptAction::new(script.up, dir)),
            Arc::new(ScriptAction::new(script.down, dir)),
        ))
    }
}
