//! Live change subscription for one collection + scope.
//!
//! A background task turns the store's partial notices into fully fetched
//! events and forwards them, in arrival order, to the subscriber:
//!
//! ```text
//! store notice ──► pump task ──► T::fetch(id) ──► mpsc ──► subscriber
//!                     │              │
//!                     │              └─ gone? drop silently (stale reference)
//!                     └─ lagged / closed ──► Resync (+ reconnect with backoff)
//! ```
//!
//! Each notice is fetched to completion before the next one is read, so
//! delivery order matches store commit order for the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::AbortHandle;

use circle_core::{CircleId, Collection, Result};

use crate::config::SyncConfig;
use crate::protocol::{Change, ChangeKind, ChangeNotification, ConnectionState, StreamEvent};
use crate::remote::{Fetchable, RemoteStore};

/// Opens subscriptions against one store.
#[derive(Clone)]
pub struct ChangeStream {
    store: Arc<dyn RemoteStore>,
    buffer: usize,
    backoff: Duration,
    max_backoff: Duration,
}

impl ChangeStream {
    pub fn new(store: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            buffer: config.stream_buffer.max(1),
            backoff: config.reconnect_backoff,
            max_backoff: config.max_reconnect_backoff,
        }
    }

    /// Start delivering events for `collection`, narrowed to `scope_id`
    /// when set.
    ///
    /// Fails only if the initial listen fails; later transport drops are
    /// handled by reconnecting.
    pub async fn subscribe<T: Fetchable>(
        &self,
        collection: Collection,
        scope_id: Option<CircleId>,
    ) -> Result<(SubscriptionHandle, mpsc::Receiver<StreamEvent<T>>)> {
        let notices = self.store.listen(collection, scope_id).await?;

        let (event_tx, event_rx) = mpsc::channel(self.buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let closed = Arc::new(AtomicBool::new(false));

        let pump = Pump {
            store: self.store.clone(),
            collection,
            scope_id,
            events: event_tx,
            state: state_tx,
            closed: closed.clone(),
            backoff: self.backoff,
            max_backoff: self.max_backoff,
        };
        let task = tokio::spawn(pump.run(notices));

        log::info!(
            "Subscribed to {collection} ({})",
            scope_id.map(|s| s.to_string()).unwrap_or_else(|| "all circles".into())
        );

        let handle = SubscriptionHandle {
            inner: Arc::new(HandleInner {
                closed,
                task: task.abort_handle(),
                state: state_rx,
                collection,
            }),
        };
        Ok((handle, event_rx))
    }
}

struct HandleInner {
    closed: Arc<AtomicBool>,
    task: AbortHandle,
    state: watch::Receiver<ConnectionState>,
    collection: Collection,
}

/// Controls one subscription. Clones share the same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    /// Stop delivery and release the channel. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.task.abort();
        log::info!("Unsubscribed from {}", self.inner.collection);
    }

    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        if !self.is_active() {
            return ConnectionState::Disconnected;
        }
        *self.inner.state.borrow()
    }

    /// Watch transport state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }
}

/// Background half of a subscription.
struct Pump<T> {
    store: Arc<dyn RemoteStore>,
    collection: Collection,
    scope_id: Option<CircleId>,
    events: mpsc::Sender<StreamEvent<T>>,
    state: watch::Sender<ConnectionState>,
    closed: Arc<AtomicBool>,
    backoff: Duration,
    max_backoff: Duration,
}

impl<T: Fetchable> Pump<T> {
    async fn run(self, mut notices: broadcast::Receiver<ChangeNotification>) {
        loop {
            let notice = match notices.recv().await {
                Ok(notice) => notice,
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("{} stream lagged, {missed} notices missed", self.collection);
                    if !self.emit(StreamEvent::Resync).await {
                        break;
                    }
                    continue;
                }
                Err(RecvError::Closed) => match self.reconnect().await {
                    Some(fresh) => {
                        notices = fresh;
                        if !self.emit(StreamEvent::Resync).await {
                            break;
                        }
                        continue;
                    }
                    None => break,
                },
            };

            let event = match notice.kind {
                ChangeKind::Delete => StreamEvent::Change(Change::Delete(notice.id)),
                kind => match T::fetch(self.store.as_ref(), self.collection, notice.id).await {
                    Ok(Some(item)) if kind == ChangeKind::Insert => StreamEvent::Change(Change::Insert(item)),
                    Ok(Some(item)) => StreamEvent::Change(Change::Update(item)),
                    Ok(None) => {
                        log::debug!("Dropping notice for {}: record already gone", notice.id);
                        continue;
                    }
                    Err(err) => {
                        log::warn!("Re-fetch of {} failed: {err}", notice.id);
                        StreamEvent::Resync
                    }
                },
            };

            if !self.emit(event).await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Forward one event unless the subscription was torn down meanwhile.
    async fn emit(&self, event: StreamEvent<T>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.events.send(event).await.is_ok()
    }

    /// Re-listen with exponential backoff until it works, the failure is
    /// not transient, or the subscription is closed.
    async fn reconnect(&self) -> Option<broadcast::Receiver<ChangeNotification>> {
        self.state.send_replace(ConnectionState::Reconnecting);
        let mut delay = self.backoff;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            tokio::time::sleep(delay).await;

            match self.store.listen(self.collection, self.scope_id).await {
                Ok(notices) => {
                    log::info!("{} stream reconnected", self.collection);
                    self.state.send_replace(ConnectionState::Connected);
                    return Some(notices);
                }
                Err(err) if err.is_transient() => {
                    log::warn!("{} reconnect failed: {err}", self.collection);
                    delay = (delay * 2).min(self.max_backoff);
                }
                Err(err) => {
                    log::error!("{} stream gave up: {err}", self.collection);
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use circle_core::{Circle, Keyed, NewRecord, Payload, Profile, Record, RecordId};
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    async fn setup() -> (Arc<InMemoryStore>, Circle, Profile) {
        let store = Arc::new(InMemoryStore::default());
        let alice = store.sign_up("alice").await.unwrap();
        let circle = store.create_circle("friends", alice.id).await.unwrap();
        (store, circle, alice)
    }

    async fn post(store: &InMemoryStore, circle: &Circle, author: &Profile, text: &str) -> RecordId {
        store
            .insert(NewRecord {
                scope_id: circle.id,
                author_id: author.id,
                payload: Payload::thought(text).unwrap(),
            })
            .await
            .unwrap()
    }

    async fn next<T>(rx: &mut mpsc::Receiver<StreamEvent<T>>) -> StreamEvent<T> {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for stream event")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn test_insert_arrives_fully_fetched() {
        let (store, circle, alice) = setup().await;
        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let (_handle, mut rx) = stream
            .subscribe::<Record>(Collection::Thoughts, Some(circle.id))
            .await
            .unwrap();

        let id = post(&store, &circle, &alice, "hello").await;
        match next(&mut rx).await {
            StreamEvent::Change(Change::Insert(record)) => {
                assert_eq!(record.id, id);
                assert_eq!(record.author.unwrap().name, "alice");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_carries_only_id() {
        let (store, circle, alice) = setup().await;
        let id = post(&store, &circle, &alice, "bye").await;

        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let (_handle, mut rx) = stream
            .subscribe::<Record>(Collection::Thoughts, Some(circle.id))
            .await
            .unwrap();

        store.delete(Collection::Thoughts, id).await.unwrap();
        assert_eq!(next(&mut rx).await, StreamEvent::Change(Change::Delete(id)));
    }

    /// A row that is always gone by the time it is fetched.
    #[derive(Debug, Clone, PartialEq)]
    struct Vanishing(Uuid);

    impl Keyed for Vanishing {
        fn key(&self) -> Uuid {
            self.0
        }
    }

    #[async_trait]
    impl Fetchable for Vanishing {
        async fn fetch(_: &dyn RemoteStore, _: Collection, _: Uuid) -> Result<Option<Self>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_stale_reference_is_swallowed() {
        let (store, circle, alice) = setup().await;
        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let (handle, mut rx) = stream
            .subscribe::<Vanishing>(Collection::Thoughts, Some(circle.id))
            .await
            .unwrap();

        let gone = post(&store, &circle, &alice, "short lived").await;
        post(&store, &circle, &alice, "also unseen").await;
        store.delete(Collection::Thoughts, gone).await.unwrap();

        // Both inserts re-fetch to nothing and are dropped without a resync.
        assert_eq!(next(&mut rx).await, StreamEvent::Change(Change::Delete(gone)));
        assert!(rx.try_recv().is_err());
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (store, circle, alice) = setup().await;
        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let (handle, mut rx) = stream
            .subscribe::<Record>(Collection::Thoughts, Some(circle.id))
            .await
            .unwrap();

        assert!(handle.is_active());
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);

        post(&store, &circle, &alice, "after").await;
        let ended = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(ended.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_emits_resync() {
        let (store, circle, _alice) = setup().await;
        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let (handle, mut rx) = stream
            .subscribe::<Record>(Collection::Thoughts, Some(circle.id))
            .await
            .unwrap();

        store.close_connections().await;
        assert_eq!(next(&mut rx).await, StreamEvent::Resync);
        assert_eq!(handle.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_unknown_scope_fails_subscribe() {
        let (store, _circle, _alice) = setup().await;
        let stream = ChangeStream::new(store.clone(), &SyncConfig::for_testing());
        let missing = uuid::Uuid::new_v4();

        let err = stream
            .subscribe::<Record>(Collection::Thoughts, Some(missing))
            .await
            .err()
            .unwrap();
        assert!(err.is_access_error());
    }
}
