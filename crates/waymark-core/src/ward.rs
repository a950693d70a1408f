//! Asynchronous setup wards.
//!
//! A ward is a setup step that may perform arbitrary asynchronous work
//! (opening a connection, waiting for a lock) before migrations run. Each
//! ward receives a single-use [`Next`] continuation and the following ward
//! does not start until it is signalled.
//!
//! There is no failure channel: a ward that wants to abort setup has no
//! way to report it, and a ward that never signals stalls setup forever.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::environment::Environment;

/// Single-use continuation handed to a ward.
///
/// Calling [`Next::signal`] lets the driver advance to the next ward. It may
/// be moved into a spawned task and signalled after the ward returns.
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<()>,
}

impl Next {
    fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Request advancement to the next ward.
    pub fn signal(self) {
        let _ = self.tx.send(());
    }
}

/// An asynchronous setup step.
#[async_trait]
pub trait Ward: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "ward"
    }

    /// Run the ward. `next` must be signalled exactly once.
    ///
    /// The ward holds the environment mutably until its future returns, so
    /// the next ward starts only once this future has returned and `next`
    /// has been signalled. Signalling early and continuing to work still
    /// delays the next ward; move such work into a spawned task that owns
    /// `next` instead.
    async fn call(&self, env: &mut Environment, next: Next);
}

/// A [`Ward`] backed by a synchronous closure.
pub struct FnWard<F> {
    f: F,
}

#[async_trait]
impl<F> Ward for FnWard<F>
where
    F: Fn(&mut Environment, Next) + Send + Sync,
{
    async fn call(&self, env: &mut Environment, next: Next) {
        (self.f)(env, next)
    }
}

/// Wrap a closure as a ward.
pub fn ward_fn<F>(f: F) -> Arc<dyn Ward>
where
    F: Fn(&mut Environment, Next) + Send + Sync + 'static,
{
    Arc::new(FnWard { f })
}

/// Drain the environment's ward queue.
///
/// The queue is snapshotted on entry. Wards a running ward adds to the
/// environment join the end of the snapshot, so they run in the same pass.
/// Wards removed from the environment mid-drain still run.
pub(crate) async fn drain(env: &mut Environment) {
    let mut pending: VecDeque<Arc<dyn Ward>> = env.wards.iter().cloned().collect();
    let mut position = 0usize;

    while let Some(ward) = pending.pop_front() {
        let before = env.wards.clone();
        let (next, signalled) = Next::channel();

        tracing::debug!(position, ward = ward.name(), "running ward");
        ward.call(env, next).await;

        if signalled.await.is_err() {
            tracing::warn!(
                position,
                ward = ward.name(),
                "ward dropped its continuation without signalling, setup cannot proceed"
            );
            std::future::pending::<()>().await;
        }

        pending.extend(added(&before, &env.wards));
        position += 1;
    }

    tracing::debug!(wards = position, "wards drained");
}

/// Entries of `after` with no counterpart in `before`, in queue order.
///
/// Matching is by identity and counts duplicates, so removals and
/// reorderings do not hide or invent additions.
fn added(before: &[Arc<dyn Ward>], after: &[Arc<dyn Ward>]) -> Vec<Arc<dyn Ward>> {
    let mut unmatched: Vec<&Arc<dyn Ward>> = before.iter().collect();
    after
        .iter()
        .filter(|ward| {
            match unmatched.iter().position(|known| Arc::ptr_eq(known, ward)) {
                Some(index) => {
                    unmatched.swap_remove(index);
                    false
                }
                None => true,
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_empty_queue_completes() {
        let mut env = Environment::default();
        drain(&mut env).await;
        assert!(env.wards.is_empty());
    }

    #[tokio::test]
    async fn test_wards_run_in_order_with_env() {
        let events = log();
        let mut env = Environment::new("first");

        for label in ["a", "b", "c"] {
            let events = Arc::clone(&events);
            env.push_ward(ward_fn(move |env, next| {
                events
                    .lock()
                    .push(format!("{}@{}", label, env.path.display()));
                next.signal();
            }));
        }

        drain(&mut env).await;
        assert_eq!(*events.lock(), ["a@first", "b@first", "c@first"]);
    }

    #[tokio::test]
    async fn test_deferred_signal_keeps_wards_sequential() {
        let events = log();
        let mut env = Environment::default();

        let slow = Arc::clone(&events);
        env.push_ward(ward_fn(move |_, next| {
            slow.lock().push("slow:start".to_string());
            let slow = Arc::clone(&slow);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                slow.lock().push("slow:finish".to_string());
                next.signal();
            });
        }));

        let fast = Arc::clone(&events);
        env.push_ward(ward_fn(move |_, next| {
            fast.lock().push("fast:start".to_string());
            fast.lock().push("fast:finish".to_string());
            next.signal();
        }));

        drain(&mut env).await;
        assert_eq!(
            *events.lock(),
            ["slow:start", "slow:finish", "fast:start", "fast:finish"]
        );
    }

    #[tokio::test]
    async fn test_ward_pushed_during_drain_runs_same_pass() {
        let events = log();
        let mut env = Environment::default();

        let outer = Arc::clone(&events);
        env.push_ward(ward_fn(move |env, next| {
            outer.lock().push("outer".to_string());
            let inner = Arc::clone(&outer);
            env.push_ward(ward_fn(move |_, next| {
                inner.lock().push("inner".to_string());
                next.signal();
            }));
            next.signal();
        }));

        drain(&mut env).await;
        assert_eq!(*events.lock(), ["outer", "inner"]);
        assert_eq!(env.wards.len(), 2);
    }

    #[tokio::test]
    async fn test_ward_replacing_queue_still_adds() {
        let events = log();
        let mut env = Environment::default();

        let first = Arc::clone(&events);
        env.push_ward(ward_fn(move |env, next| {
            first.lock().push("first".to_string());
            let replacement = Arc::clone(&first);
            env.wards.clear();
            env.push_ward(ward_fn(move |_, next| {
                replacement.lock().push("replacement".to_string());
                next.signal();
            }));
            next.signal();
        }));

        let second = Arc::clone(&events);
        env.push_ward(ward_fn(move |_, next| {
            second.lock().push("second".to_string());
            next.signal();
        }));

        drain(&mut env).await;
        assert_eq!(*events.lock(), ["first", "second", "replacement"]);
        assert_eq!(env.wards.len(), 1);
    }

    #[test]
    fn test_added_counts_duplicates() {
        let a = ward_fn(|_, next| next.signal());
        let b = ward_fn(|_, next| next.signal());

        let before = vec![Arc::clone(&a), Arc::clone(&b)];
        let after = vec![Arc::clone(&b), Arc::clone(&a), Arc::clone(&a)];
        let new = added(&before, &after);

        assert_eq!(new.len(), 1);
        assert!(Arc::ptr_eq(&new[0], &a));
        assert!(added(&after, &before).is_empty());
    }

    #[tokio::test]
    async fn test_unsignalled_ward_stalls() {
        let mut env = Environment::default().with_ward(ward_fn(|_, next| drop(next)));

        let stalled = tokio::time::timeout(Duration::from_millis(50), drain(&mut env)).await;
        assert!(stalled.is_err());
    }
}
