//! Integration tests for the orchestration facade.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use waymark_core::{
    action_fn, ActionError, Direction, Environment, Error, FileStateStore, OpenSledWard,
    Orchestrator, Outcome, RunEvent, RunOptions, StateStore, StaticLoader, StorageError,
};
use waymark_core::environment::STORAGE_FILE_OPTION;

/// State store that records every save.
#[derive(Default)]
struct RecordingStore {
    completed: Mutex<Vec<String>>,
    saves: Mutex<Vec<Vec<String>>>,
}

impl RecordingStore {
    fn with_completed(names: &[&str]) -> Arc<Self> {
        let store = Self::default();
        *store.completed.lock() = names.iter().map(|s| s.to_string()).collect();
        Arc::new(store)
    }

    fn saves(&self) -> Vec<Vec<String>> {
        self.saves.lock().clone()
    }

    fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl StateStore for RecordingStore {
    async fn load(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.completed())
    }

    async fn save(&self, names: &[String]) -> Result<(), StorageError> {
        *self.completed.lock() = names.to_vec();
        self.saves.lock().push(names.to_vec());
        Ok(())
    }
}

struct TestContext {
    orchestrator: Orchestrator,
    store: Arc<RecordingStore>,
    log: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new(available: &[&'static str], completed: &[&str]) -> Self {
        Self::with_failing(available, completed, None)
    }

    fn with_failing(
        available: &[&'static str],
        completed: &[&str],
        failing: Option<&'static str>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore::with_completed(completed);

        let mut loader = StaticLoader::new();
        for &name in available {
            let up_log = Arc::clone(&log);
            let down_log = Arc::clone(&log);
            let fails = failing == Some(name);
            loader = loader.with_migration(
                name,
                action_fn(move || {
                    let log = Arc::clone(&up_log);
                    async move {
                        log.lock().push(format!("up:{}", name));
                        if fails {
                            Err(ActionError::failed("constraint violated"))
                        } else {
                            Ok(())
                        }
                    }
                }),
                action_fn(move || {
                    let log = Arc::clone(&down_log);
                    async move {
                        log.lock().push(format!("down:{}", name));
                        Ok(())
                    }
                }),
            );
        }

        let env = Environment::new(dir.path())
            .with_loader(Arc::new(loader))
            .with_state_store(store.clone());

        Self {
            orchestrator: Orchestrator::new(env),
            store,
            log,
            _dir: dir,
        }
    }

    fn executed(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

fn drain_events(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_empty_pending_set_is_nop() {
    let mut ctx = TestContext::new(&["1-a", "2-b"], &["1-a", "2-b"]);
    let mut rx = ctx.orchestrator.subscribe();

    let report = ctx
        .orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Nop);
    assert_eq!(
        drain_events(&mut rx),
        [RunEvent::Nop {
            direction: Direction::Up
        }]
    );
    assert!(ctx.store.saves().is_empty());
    assert!(ctx.executed().is_empty());
}

#[tokio::test]
async fn test_up_runs_pending_and_appends() {
    let mut ctx = TestContext::new(&["3-c", "1-a", "2-b"], &["1-a"]);
    let mut rx = ctx.orchestrator.subscribe();

    let report = ctx
        .orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Complete {
            names: names(&["2-b", "3-c"])
        }
    );
    assert_eq!(ctx.executed(), ["up:2-b", "up:3-c"]);
    assert_eq!(ctx.store.saves(), [names(&["1-a", "2-b", "3-c"])]);

    let events = drain_events(&mut rx);
    assert_eq!(
        events,
        [
            RunEvent::Started {
                direction: Direction::Up,
                count: 2
            },
            RunEvent::Migrated {
                name: "2-b".into(),
                direction: Direction::Up
            },
            RunEvent::Migrated {
                name: "3-c".into(),
                direction: Direction::Up
            },
            RunEvent::Complete {
                direction: Direction::Up,
                names: names(&["2-b", "3-c"])
            },
        ]
    );
}

#[tokio::test]
async fn test_down_reverses_completed_and_subtracts() {
    let mut ctx = TestContext::new(&["1-a", "2-b", "3-c"], &["1-a", "2-b"]);

    let report = ctx
        .orchestrator
        .run(Direction::Down, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Complete {
            names: names(&["2-b", "1-a"])
        }
    );
    assert_eq!(ctx.executed(), ["down:2-b", "down:1-a"]);
    assert!(ctx.store.completed().is_empty());
}

#[tokio::test]
async fn test_forced_up_selects_everything() {
    let mut ctx = TestContext::new(&["2-b", "1-a", "3-c"], &["2-b"]);

    let report = ctx
        .orchestrator
        .run(Direction::Up, RunOptions::default().with_force(true))
        .await
        .unwrap();

    assert_eq!(ctx.executed(), ["up:1-a", "up:2-b", "up:3-c"]);
    assert_eq!(
        report.outcome,
        Outcome::Complete {
            names: names(&["1-a", "2-b", "3-c"])
        }
    );
    assert_eq!(ctx.store.saves(), [names(&["1-a", "2-b", "3-c"])]);
}

#[tokio::test]
async fn test_forced_down_clears_history() {
    let mut ctx = TestContext::new(&["1-a", "2-b", "3-c"], &["1-a"]);

    ctx.orchestrator
        .run(Direction::Down, RunOptions::default().with_force(true))
        .await
        .unwrap();

    assert_eq!(ctx.executed(), ["down:3-c", "down:2-b", "down:1-a"]);
    assert_eq!(ctx.store.saves(), [Vec::<String>::new()]);
}

#[tokio::test]
async fn test_nosave_skips_persistence() {
    let mut ctx = TestContext::new(&["1-a", "2-b"], &[]);
    let mut rx = ctx.orchestrator.subscribe();

    let report = ctx
        .orchestrator
        .run(Direction::Up, RunOptions::default().with_nosave(true))
        .await
        .unwrap();

    assert_eq!(ctx.executed(), ["up:1-a", "up:2-b"]);
    assert!(matches!(report.outcome, Outcome::Complete { .. }));
    assert!(ctx.store.saves().is_empty());
    assert!(matches!(
        drain_events(&mut rx).last(),
        Some(RunEvent::Complete { .. })
    ));

    let forced = ctx
        .orchestrator
        .run(
            Direction::Down,
            RunOptions::default().with_force(true).with_nosave(true),
        )
        .await
        .unwrap();
    assert!(matches!(forced.outcome, Outcome::Complete { .. }));
    assert!(ctx.store.saves().is_empty());
}

#[tokio::test]
async fn test_failing_unit_halts_without_persistence() {
    let mut ctx = TestContext::with_failing(&["1-a", "2-b", "3-c"], &[], Some("2-b"));
    let mut rx = ctx.orchestrator.subscribe();

    let report = ctx
        .orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_halted());
    assert_eq!(
        report.outcome,
        Outcome::Halted {
            executed: names(&["1-a"]),
            failed: "2-b".into(),
            reason: Some("constraint violated".into()),
        }
    );
    assert_eq!(ctx.executed(), ["up:1-a", "up:2-b"]);
    assert!(ctx.store.saves().is_empty());
    assert!(drain_events(&mut rx).contains(&RunEvent::Failed {
        name: "2-b".into(),
        reason: Some("constraint violated".into()),
    }));
}

#[tokio::test]
async fn test_unloadable_migration_is_fatal() {
    let mut ctx = TestContext::new(&["1-a"], &["1-a", "0-gone"]);

    let err = ctx
        .orchestrator
        .run(Direction::Down, RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Load(_)));
    assert!(ctx.executed().is_empty());
    assert!(ctx.store.saves().is_empty());
}

#[tokio::test]
async fn test_create_names_file_with_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.json");
    std::fs::write(&template, r#"{"up": ["true"], "down": ["true"]}"#).unwrap();

    let migrations = dir.path().join("migrations");
    let mut orchestrator = Orchestrator::new(Environment::new(&migrations));
    let path = orchestrator
        .create("add-users", Some(template.as_path()))
        .await
        .unwrap();

    assert_eq!(path.parent(), Some(migrations.as_path()));
    let file_name = path.file_name().unwrap().to_str().unwrap();
    let (timestamp, rest) = file_name.split_once('-').unwrap();
    assert!(!timestamp.is_empty() && timestamp.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(rest, "add-users.json");
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        r#"{"up": ["true"], "down": ["true"]}"#
    );
}

#[tokio::test]
async fn test_script_migrations_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0000000000001-create.json"),
        r#"{"up": ["touch created"], "down": ["rm created"]}"#,
    )
    .unwrap();
    std::fs::write(
        migrations.join("0000000000002-seed.json"),
        r#"{"up": ["echo seed >> created"], "down": ["true"]}"#,
    )
    .unwrap();

    let mut orchestrator = Orchestrator::new(Environment::new(&migrations));
    let report = orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Complete {
            names: names(&["0000000000001-create.json", "0000000000002-seed.json"])
        }
    );
    assert!(migrations.join("created").exists());

    let state = FileStateStore::new(migrations.join(".waymark.json"));
    assert_eq!(
        state.load().await.unwrap(),
        names(&["0000000000001-create.json", "0000000000002-seed.json"])
    );

    let statuses = orchestrator.status().await.unwrap();
    assert!(statuses.iter().all(|s| s.applied));

    let again = orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(again.outcome, Outcome::Nop);

    orchestrator
        .run(Direction::Down, RunOptions::default())
        .await
        .unwrap();
    assert!(!migrations.join("created").exists());
    assert!(state.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sled_ward_replaces_file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0000000000001-noop.json"),
        r#"{"up": ["true"], "down": ["true"]}"#,
    )
    .unwrap();

    let env = Environment::new(&migrations).with_ward(OpenSledWard::new(dir.path().join("state")));
    let mut orchestrator = Orchestrator::new(env);

    orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert!(!migrations.join(".waymark.json").exists());
    let store = orchestrator.environment().state_store.clone().unwrap();
    assert_eq!(
        store.load().await.unwrap(),
        names(&["0000000000001-noop.json"])
    );
}

#[tokio::test]
async fn test_caller_middleware_sets_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("0000000000001-noop.json"),
        r#"{"up": ["true"], "down": ["true"]}"#,
    )
    .unwrap();

    let mut orchestrator = Orchestrator::new(Environment::new(&migrations));
    orchestrator.use_middleware(Arc::new(|env: &mut Environment| -> waymark_core::Result<()> {
        env.options
            .insert(STORAGE_FILE_OPTION.to_string(), "custom.json".into());
        Ok(())
    }));

    orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();

    assert!(migrations.join("custom.json").exists());
    assert!(!migrations.join(".waymark.json").exists());
    let state = FileStateStore::new(migrations.join("custom.json"));
    assert_eq!(
        state.load().await.unwrap(),
        names(&["0000000000001-noop.json"])
    );

    let again = orchestrator
        .run(Direction::Up, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(again.outcome, Outcome::Nop);
}

#[tokio::test]
async fn test_create_rejects_undiscoverable_names() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    let mut orchestrator = Orchestrator::new(Environment::new(&migrations));

    for name in ["", "nested/name"] {
        let err = orchestrator.create(name, None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
    assert!(!migrations.exists());

    let path = orchestrator.create("add-users", None).await.unwrap();
    let statuses = orchestrator.status().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(Some(statuses[0].name.as_str()), path.file_name().unwrap().to_str());
    assert!(!statuses[0].applied);
}
