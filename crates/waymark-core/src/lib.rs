//! Waymark Core - ordered, reversible migration orchestration.
//!
//! This crate applies and reverses named migration units exactly once, in
//! name order, and persists which units have run. The [`Orchestrator`]
//! facade drives everything:
//!
//! - [`Middleware`] configures the [`Environment`] synchronously;
//! - [`Ward`]s run asynchronous setup steps strictly one after another;
//! - the [`Registry`] selects pending migrations from the [`Loader`] and
//!   [`StateStore`];
//! - the [`Sequencer`] executes the selected units and reports events.
//!
//! # Example
//!
//! ```ignore
//! use waymark_core::{Direction, Environment, Orchestrator, RunOptions};
//!
//! let mut orchestrator = Orchestrator::new(Environment::new("./migrations"));
//! let report = orchestrator.run(Direction::Up, RunOptions::default()).await?;
//! println!("{:?}", report.outcome);
//! ```

pub mod environment;
pub mod error;
pub mod loader;
pub mod middleware;
pub mod migration;
pub mod orchestrator;
pub mod registry;
pub mod sequencer;
pub mod storage;
pub mod ward;

pub use environment::Environment;
pub use error::{Error, Result};
pub use loader::{LoadError, Loader, ScriptLoader, StaticLoader};
pub use middleware::Middleware;
pub use migration::{
    action_fn, migration_filename, Action, ActionError, Direction, Migration, MigrationActions,
};
pub use orchestrator::{Orchestrator, Outcome, RunEvent, RunOptions, RunReport};
pub use registry::{MigrationStatus, Registry};
pub use sequencer::{EngineEvent, Sequencer};
pub use storage::{FileStateStore, OpenSledWard, SledStateStore, StateStore, StorageError};
pub use ward::{ward_fn, Next, Ward};
