//! Sequencing engine.
//!
//! Runs an ordered list of migrations in one direction, strictly one at a
//! time, and reports progress as [`EngineEvent`]s. The order given is the
//! order executed; names are never re-sorted here.
//!
//! The engine halts on the first failing unit. Units already run before the
//! failure stay applied and no `Complete` event is sent.

use tokio::sync::mpsc;

use crate::environment::Environment;
use crate::migration::{Direction, Migration};

/// Lifecycle events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Nothing to run in this direction.
    Nop(Direction),
    /// Execution started.
    Start(Direction),
    /// One unit finished successfully.
    Migrated {
        /// Unit name.
        name: String,
        /// Direction it ran in.
        direction: Direction,
    },
    /// One unit failed; execution stops.
    Failed {
        /// Unit name.
        name: String,
        /// Failure description, when the action gave one.
        reason: Option<String>,
    },
    /// Every unit ran successfully, in execution order.
    Complete(Vec<Migration>),
}

/// Executes migration units in order.
pub struct Sequencer {
    migrations: Vec<Migration>,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
}

impl Sequencer {
    /// Create an engine over an ordered unit list.
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self {
            migrations,
            subscribers: Vec::new(),
        }
    }

    /// Units in execution order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Subscribe to lifecycle events. Subscribe before calling
    /// [`Sequencer::migrate`]; later subscribers cannot exist since
    /// `migrate` consumes the engine.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&self, event: EngineEvent) {
        for subscriber in &self.subscribers {
            let _ = subscriber.send(event.clone());
        }
    }

    /// Run every unit in `direction`.
    ///
    /// Event channels close when this returns.
    pub async fn migrate(self, direction: Direction, env: &Environment) {
        if self.migrations.is_empty() {
            tracing::debug!(%direction, "nothing to {}", direction.verb());
            self.emit(EngineEvent::Nop(direction));
            return;
        }

        tracing::debug!(%direction, count = self.migrations.len(), "migration started");
        self.emit(EngineEvent::Start(direction));

        for migration in &self.migrations {
            match migration.action(direction).run(env).await {
                Ok(()) => {
                    tracing::info!(name = migration.name(), %direction, "successfully {}d", direction.verb());
                    self.emit(EngineEvent::Migrated {
                        name: migration.name().to_string(),
                        direction,
                    });
                }
                Err(e) => {
                    tracing::error!(name = migration.name(), %direction, error = %e, "migration failed");
                    let reason = e.to_string();
                    self.emit(EngineEvent::Failed {
                        name: migration.name().to_string(),
                        reason: (!reason.is_empty()).then_some(reason),
                    });
                    return;
                }
            }
        }

        self.emit(EngineEvent::Complete(self.migrations.clone()));
    }
}
