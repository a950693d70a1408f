//! Migration units and their forward/backward actions.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::Environment;

/// File extension for migration scripts.
pub const MIGRATION_EXTENSION: &str = "json";

/// Width of the zero-padded millisecond timestamp prefix.
///
/// Thirteen digits cover every epoch-millisecond value until the year 2286,
/// so lexicographic name order matches creation order.
pub const TIMESTAMP_WIDTH: usize = 13;

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply forward actions.
    Up,
    /// Apply backward actions.
    Down,
}

impl Direction {
    /// Verb used in progress messages.
    pub fn verb(&self) -> &'static str {
        match self {
            Direction::Up => "migrate",
            Direction::Down => "reverse",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{}', expected up or down", other)),
        }
    }
}

/// Failure of a single migration action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action reported a failure.
    #[error("{0}")]
    Failed(String),

    /// A command exited unsuccessfully.
    #[error("command `{command}` exited with {status}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Exit status description.
        status: String,
    },

    /// IO error while running the action.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed(message.into())
    }
}

/// A forward or backward step of a migration.
///
/// Actions receive the environment read-only; it is fully configured by the
/// time any action runs.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action against the target.
    async fn run(&self, env: &Environment) -> Result<(), ActionError>;
}

/// An [`Action`] backed by an async closure.
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ActionError>> + Send,
{
    async fn run(&self, _env: &Environment) -> Result<(), ActionError> {
        (self.f)().await
    }
}

/// Wrap an async closure as a shareable action.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    Arc::new(FnAction { f })
}

/// The pair of actions a loader resolves for a migration name.
#[derive(Clone)]
pub struct MigrationActions {
    /// Forward action.
    pub up: Arc<dyn Action>,
    /// Backward action.
    pub down: Arc<dyn Action>,
}

impl MigrationActions {
    /// Create a new action pair.
    pub fn new(up: Arc<dyn Action>, down: Arc<dyn Action>) -> Self {
        Self { up, down }
    }
}

impl fmt::Debug for MigrationActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationActions").finish_non_exhaustive()
    }
}

/// An immutable, named migration unit.
///
/// Units compare by name only.
#[derive(Clone)]
pub struct Migration {
    name: String,
    up: Arc<dyn Action>,
    down: Arc<dyn Action>,
}

impl Migration {
    /// Create a migration unit.
    pub fn new(name: impl Into<String>, up: Arc<dyn Action>, down: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            up,
            down,
        }
    }

    /// Build a unit from a resolved action pair.
    pub fn from_actions(name: impl Into<String>, actions: MigrationActions) -> Self {
        Self::new(name, actions.up, actions.down)
    }

    /// The migration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The action for the given direction.
    pub fn action(&self, direction: Direction) -> &Arc<dyn Action> {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish()
    }
}

impl PartialEq for Migration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Migration {}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Migration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Build the file name for a new migration created at `now`.
///
/// Format: `<zero-padded epoch millis>-<label>.json`.
pub fn migration_filename(label: &str, now: DateTime<Utc>) -> String {
    format!(
        "{:0width$}-{}.{}",
        now.timestamp_millis(),
        label,
        MIGRATION_EXTENSION,
        width = TIMESTAMP_WIDTH
    )
}
