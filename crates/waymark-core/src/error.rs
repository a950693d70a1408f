//! Core error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::loader::LoadError;
use crate::storage::StorageError;

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A migration could not be loaded.
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// The completed-state backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The environment is missing required wiring.
    #[error("configuration error: {0}")]
    Config(String),

    /// A middleware aborted setup.
    #[error("middleware error: {0}")]
    Middleware(String),

    /// A migration file already exists.
    #[error("migration already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The sequencing engine stopped without a terminal event.
    #[error("sequencer stopped unexpectedly: {0}")]
    Sequencer(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
