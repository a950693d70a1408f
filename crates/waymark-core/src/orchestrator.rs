//! Orchestration facade.
//!
//! Ties middleware, wards, the registry, the loader and the sequencing
//! engine together:
//!
//! ```text
//! run(direction, options)
//!   -> apply middleware -> drain wards
//!   -> select names (pending, or everything when forced)
//!   -> load units -> sequencer -> re-emit events
//!   -> reconcile completed set (unless nosave)
//! ```
//!
//! Every public method takes `&mut self`, so the phases of one orchestrator
//! never interleave.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::middleware::{self, Middleware};
use crate::loader::spawn_load;
use crate::migration::{migration_filename, Direction, Migration};
use crate::registry::{MigrationStatus, Registry};
use crate::sequencer::{EngineEvent, Sequencer};
use crate::ward;

/// Capacity of the public event channel.
pub const EVENT_CAPACITY: usize = 256;

/// Options for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Operate on every available migration, ignoring completed state.
    pub force: bool,
    /// Do not persist the completed set afterwards.
    pub nosave: bool,
}

impl RunOptions {
    /// Set the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the nosave flag.
    pub fn with_nosave(mut self, nosave: bool) -> Self {
        self.nosave = nosave;
        self
    }
}

/// Public events re-emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Nothing to do in this direction.
    Nop {
        /// Requested direction.
        direction: Direction,
    },
    /// Execution started.
    Started {
        /// Requested direction.
        direction: Direction,
        /// Number of selected units.
        count: usize,
    },
    /// One unit finished.
    Migrated {
        /// Unit name.
        name: String,
        /// Direction it ran in.
        direction: Direction,
    },
    /// One unit failed.
    Failed {
        /// Unit name.
        name: String,
        /// Failure description.
        reason: Option<String>,
    },
    /// Every unit ran and the completed set was reconciled.
    Complete {
        /// Requested direction.
        direction: Direction,
        /// Executed unit names, in execution order.
        names: Vec<String>,
    },
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No units were selected.
    Nop,
    /// Every selected unit ran.
    Complete {
        /// Executed unit names, in execution order.
        names: Vec<String>,
    },
    /// A unit failed and the run stopped. Nothing was persisted.
    Halted {
        /// Units that ran before the failure.
        executed: Vec<String>,
        /// The failing unit.
        failed: String,
        /// Failure description.
        reason: Option<String>,
    },
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Requested direction.
    pub direction: Direction,
    /// How the run ended.
    pub outcome: Outcome,
}

impl RunReport {
    /// Check if the run stopped on a failing unit.
    pub fn is_halted(&self) -> bool {
        matches!(self.outcome, Outcome::Halted { .. })
    }
}

/// The migration orchestration facade.
pub struct Orchestrator {
    env: Environment,
    middleware: Vec<Arc<dyn Middleware>>,
    events: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    /// Create an orchestrator over `env`.
    ///
    /// The `migrations` and `file_storage` middleware are registered first,
    /// in that order, so caller middleware runs after the defaults.
    pub fn new(env: Environment) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut orchestrator = Self {
            env,
            middleware: Vec::new(),
            events,
        };
        orchestrator
            .use_middleware(middleware::migrations())
            .use_middleware(middleware::file_storage());
        orchestrator
    }

    /// Register a middleware. No deduplication.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Number of registered middleware, defaults included.
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// The environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The environment, mutably.
    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Subscribe to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RunEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Apply every middleware in registration order.
    pub fn apply_middleware(&mut self) -> Result<()> {
        for middleware in &self.middleware {
            middleware.apply(&mut self.env)?;
        }
        Ok(())
    }

    /// Apply middleware, then drain the ward queue.
    ///
    /// Returns the orchestrator once every ward has signalled. A ward that
    /// never signals makes this future pend forever.
    pub async fn setup(&mut self) -> Result<&mut Self> {
        self.apply_middleware()?;
        ward::drain(&mut self.env).await;
        Ok(self)
    }

    /// Create a registry for the current environment.
    pub fn registry(&self) -> Result<Registry> {
        Registry::from_env(&self.env)
    }

    /// Load the migration `name` into a unit.
    pub async fn build_migration(&self, name: &str) -> Result<Migration> {
        let loader = self
            .env
            .loader
            .as_ref()
            .ok_or_else(|| Error::Config("no migration loader configured".to_string()))?;

        let path = self.env.path.clone();
        let owned = name.to_string();
        let actions = spawn_load(loader, move |loader| loader.load(&path, &owned)).await?;
        Ok(Migration::from_actions(name, actions))
    }

    /// Run migrations in `direction`.
    ///
    /// Load failures are returned as errors. Unit failures are reported as
    /// [`RunEvent::Failed`] and [`Outcome::Halted`], not as errors.
    pub async fn run(&mut self, direction: Direction, options: RunOptions) -> Result<RunReport> {
        self.setup().await?;
        let registry = self.registry()?;

        let names = if options.force {
            let mut all = registry.available().await?;
            if direction == Direction::Down {
                all.reverse();
            }
            all
        } else {
            registry.pending(direction).await?
        };
        tracing::debug!(%direction, force = options.force, selected = names.len(), "migrations selected");

        let mut migrations = Vec::with_capacity(names.len());
        for name in &names {
            migrations.push(self.build_migration(name).await?);
        }

        let count = migrations.len();
        let mut engine = Sequencer::new(migrations);
        let engine_events = engine.subscribe();

        let (_, outcome) = tokio::join!(
            engine.migrate(direction, &self.env),
            self.relay(direction, options, count, &registry, engine_events)
        );

        Ok(RunReport {
            direction,
            outcome: outcome?,
        })
    }

    /// Re-emit engine events and reconcile on completion.
    async fn relay(
        &self,
        direction: Direction,
        options: RunOptions,
        count: usize,
        registry: &Registry,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<Outcome> {
        let mut executed = Vec::new();

        while let Some(event) = engine_events.recv().await {
            match event {
                EngineEvent::Nop(direction) => {
                    tracing::info!(%direction, "nothing to {}", direction.verb());
                    self.publish(RunEvent::Nop { direction });
                    return Ok(Outcome::Nop);
                }
                EngineEvent::Start(direction) => {
                    self.publish(RunEvent::Started {
                        direction,
                        count,
                    });
                }
                EngineEvent::Migrated { name, direction } => {
                    executed.push(name.clone());
                    self.publish(RunEvent::Migrated { name, direction });
                }
                EngineEvent::Failed { name, reason } => {
                    self.publish(RunEvent::Failed {
                        name: name.clone(),
                        reason: reason.clone(),
                    });
                    return Ok(Outcome::Halted {
                        executed,
                        failed: name,
                        reason,
                    });
                }
                EngineEvent::Complete(migrations) => {
                    let names: Vec<String> =
                        migrations.iter().map(|m| m.name().to_string()).collect();
                    self.reconcile(direction, options, registry, &names).await?;
                    self.publish(RunEvent::Complete {
                        direction,
                        names: names.clone(),
                    });
                    return Ok(Outcome::Complete { names });
                }
            }
        }

        Err(Error::Sequencer(format!(
            "{} run ended after {} unit(s) without completing",
            direction,
            executed.len()
        )))
    }

    /// Persist the completed set after a successful pass.
    async fn reconcile(
        &self,
        direction: Direction,
        options: RunOptions,
        registry: &Registry,
        names: &[String],
    ) -> Result<()> {
        if options.nosave {
            tracing::debug!(%direction, "skipping state persistence");
            return Ok(());
        }

        if options.force {
            // A forced rollback clears all history.
            let completed: &[String] = match direction {
                Direction::Up => names,
                Direction::Down => &[],
            };
            registry.put_completed(completed).await
        } else {
            registry.append_completed(direction, names).await
        }
    }

    /// Create a new migration file named `<timestamp>-<name>.json`.
    ///
    /// The name must be non-empty and must not contain path separators, so
    /// the file is discoverable by the script loader.
    pub async fn create(&mut self, name: &str, template: Option<&Path>) -> Result<PathBuf> {
        validate_label(name)?;
        let filename = migration_filename(name, Utc::now());
        self.setup().await?;

        let path = self.registry()?.create(&filename, template).await?;
        tracing::info!(path = %path.display(), "successfully created migration");
        Ok(path)
    }

    /// Applied state of every available migration.
    pub async fn status(&mut self) -> Result<Vec<MigrationStatus>> {
        self.setup().await?;
        self.registry()?.statuses().await
    }
}

/// Reject labels that would produce an undiscoverable migration file.
fn validate_label(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("migration name must not be empty".to_string()));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::Config(format!(
            "migration name '{}' must not contain path separators",
            name
        )));
    }
    Ok(())
}
