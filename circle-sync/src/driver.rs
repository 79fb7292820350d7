//! The task that keeps one view in step with its load and its stream.
//!
//! One driver per view. It waits on whichever comes first, the in-flight
//! snapshot load or the next stream event, and hands the result to the
//! view under its lock:
//!
//! - snapshot → seed + replay (overflow → load again)
//! - transient load failure → Stale, retry after a delay
//! - access error → AccessDenied, unsubscribe, stop
//! - `Resync` → back to Loading, load again (stale items stay visible)
//!
//! Teardown never waits for the driver: [`Teardown::dispose`] flips the
//! view to Disposed under the lock, so anything the driver finishes later
//! is ignored by the view.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use circle_core::Result;

use crate::protocol::StreamEvent;
use crate::snapshot::Loader;
use crate::stream::SubscriptionHandle;
use crate::view::{Applied, Materialize, Phase, SyncedView, ViewStatus};

/// A view shared between its driver and its readers.
pub struct SharedView<V, T> {
    view: RwLock<SyncedView<V, T>>,
    revision: watch::Sender<u64>,
    label: String,
}

impl<V: Materialize<T>, T: Send + Sync + 'static> SharedView<V, T> {
    pub fn new(state: V, replay_capacity: usize, label: impl Into<String>) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            view: RwLock::new(SyncedView::new(state, replay_capacity)),
            revision,
            label: label.into(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&SyncedView<V, T>) -> R) -> R {
        let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
        f(&view)
    }

    /// Mutate under the write lock and publish the revision if it moved.
    pub fn update<R>(&self, f: impl FnOnce(&mut SyncedView<V, T>) -> R) -> R {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        let before = view.revision();
        let result = f(&mut view);
        let after = view.revision();
        drop(view);

        if after != before {
            self.revision.send_replace(after);
        }
        result
    }

    pub fn status(&self) -> ViewStatus {
        self.read(|v| v.status().clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.read(|v| v.phase() == Phase::Disposed)
    }

    /// Fires whenever the view changes observably.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// Something that can be stopped synchronously.
pub trait Dispose: Send + Sync {
    /// Returns `false` if it was already disposed.
    fn dispose(&self) -> bool;
}

impl<V: Materialize<T>, T: Send + Sync + 'static> Dispose for SharedView<V, T> {
    fn dispose(&self) -> bool {
        self.update(|v| v.dispose())
    }
}

/// Synchronous stop for one sync instance. Clones stop the same instance.
#[derive(Clone)]
pub struct Teardown {
    inner: Arc<TeardownInner>,
}

struct TeardownInner {
    view: Arc<dyn Dispose>,
    subscription: SubscriptionHandle,
    driver: AbortHandle,
    label: String,
}

impl Teardown {
    pub fn new(
        view: Arc<dyn Dispose>,
        subscription: SubscriptionHandle,
        driver: AbortHandle,
        label: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TeardownInner {
                view,
                subscription,
                driver,
                label: label.into(),
            }),
        }
    }

    /// Stop applying events now. In-flight work that completes later is
    /// discarded. Safe to call any number of times.
    pub fn dispose(&self) {
        let first = self.inner.view.dispose();
        self.inner.subscription.unsubscribe();
        self.inner.driver.abort();
        if first {
            log::info!("{} disposed", self.inner.label);
        }
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.subscription.is_active()
    }
}

enum Step<T> {
    Loaded(Result<Vec<T>>),
    Event(StreamEvent<T>),
    StreamEnded,
}

/// Spawn the driver. The first load is issued immediately.
pub fn spawn_driver<V, T>(
    view: Arc<SharedView<V, T>>,
    loader: Loader<T>,
    events: mpsc::Receiver<StreamEvent<T>>,
    subscription: SubscriptionHandle,
    reload_retry: Duration,
) -> AbortHandle
where
    V: Materialize<T>,
    T: Send + Sync + 'static,
{
    let task = tokio::spawn(drive(view, loader, events, subscription, reload_retry));
    task.abort_handle()
}

async fn drive<V, T>(
    view: Arc<SharedView<V, T>>,
    loader: Loader<T>,
    mut events: mpsc::Receiver<StreamEvent<T>>,
    subscription: SubscriptionHandle,
    reload_retry: Duration,
) where
    V: Materialize<T>,
    T: Send + Sync + 'static,
{
    let mut load = Some(loader());

    loop {
        let step = tokio::select! {
            result = next_load(&mut load) => Step::Loaded(result),
            event = events.recv() => match event {
                Some(event) => Step::Event(event),
                None => Step::StreamEnded,
            },
        };

        match step {
            Step::Loaded(Ok(snapshot)) => {
                let count = snapshot.len();
                let outcome = view.update(|v| v.seed(snapshot));
                log::info!(
                    "{} ready with {count} items ({} replayed)",
                    view.label(),
                    outcome.replayed
                );
                if outcome.overflowed {
                    log::warn!("{} replay overflowed, loading again", view.label());
                    view.update(|v| v.begin_reload());
                    load = Some(loader());
                }
            }
            Step::Loaded(Err(err)) if err.is_access_error() => {
                log::error!("{} stopped: {err}", view.label());
                view.update(|v| v.deny(err));
                subscription.unsubscribe();
                break;
            }
            Step::Loaded(Err(err)) => {
                log::warn!(
                    "{} load failed, retrying in {reload_retry:?}: {err}",
                    view.label()
                );
                view.update(|v| v.mark_stale());
                load = Some(delayed(loader.clone(), reload_retry));
            }
            Step::Event(StreamEvent::Change(change)) => {
                if view.update(|v| v.apply(change)) == Applied::Overflowed {
                    log::warn!("{} buffer full while loading", view.label());
                }
            }
            Step::Event(StreamEvent::Resync) => {
                log::info!("{} resyncing", view.label());
                view.update(|v| v.begin_reload());
                load = Some(loader());
            }
            Step::StreamEnded => {
                if !view.is_disposed() {
                    log::warn!("{} stream ended", view.label());
                    view.update(|v| v.mark_stale());
                }
                break;
            }
        }

        if view.is_disposed() {
            break;
        }
    }
}

/// Resolve the in-flight load, or never if there is none.
async fn next_load<T>(load: &mut Option<BoxFuture<'static, Result<Vec<T>>>>) -> Result<Vec<T>> {
    match load.as_mut() {
        Some(pending) => {
            let result = pending.await;
            *load = None;
            result
        }
        None => std::future::pending().await,
    }
}

fn delayed<T: Send + 'static>(loader: Loader<T>, delay: Duration) -> BoxFuture<'static, Result<Vec<T>>> {
    async move {
        tokio::time::sleep(delay).await;
        loader().await
    }
    .boxed()
}
