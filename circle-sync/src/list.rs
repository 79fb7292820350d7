//! Ordered, deduplicated view of one collection in one circle.
//!
//! `open` subscribes before the first snapshot is requested, so every
//! change committed after the snapshot lands in the replay queue.

use std::sync::Arc;

use tokio::sync::watch;

use circle_core::{
    Collection, Keyed, NewRecord, Payload, Record, RecordId, Result, SortOrder, SyncError,
};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::driver::{spawn_driver, SharedView, Teardown};
use crate::protocol::Change;
use crate::remote::RemoteStore;
use crate::session::SessionScope;
use crate::snapshot::SnapshotLoader;
use crate::stream::ChangeStream;
use crate::view::{Materialize, ViewStatus};

/// Sequence with unique keys. New keys enter at the head (descending) or
/// the tail (ascending); known keys are replaced where they stand.
#[derive(Debug, Clone)]
pub struct OrderedList<T> {
    items: Vec<T>,
    order: SortOrder,
}

impl<T: Keyed + Clone + PartialEq> OrderedList<T> {
    pub fn new(order: SortOrder) -> Self {
        Self {
            items: Vec::new(),
            order,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn position(&self, key: Uuid) -> Option<usize> {
        self.items.iter().position(|item| item.key() == key)
    }

    pub fn get(&self, key: Uuid) -> Option<&T> {
        self.position(key).map(|i| &self.items[i])
    }

    fn upsert(&mut self, item: T) -> bool {
        match self.position(item.key()) {
            Some(i) if self.items[i] == item => false,
            Some(i) => {
                self.items[i] = item;
                true
            }
            None => {
                match self.order {
                    SortOrder::Ascending => self.items.push(item),
                    SortOrder::Descending => self.items.insert(0, item),
                }
                true
            }
        }
    }

    fn remove(&mut self, key: Uuid) -> bool {
        match self.position(key) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }
}

impl<T> Materialize<T> for OrderedList<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    fn reset(&mut self, snapshot: Vec<T>) {
        self.items.clear();
        for item in snapshot {
            if self.position(item.key()).is_none() {
                self.items.push(item);
            }
        }
    }

    fn apply(&mut self, change: Change<T>) -> bool {
        match change {
            // Insert of a known key is an update and vice versa.
            Change::Insert(item) | Change::Update(item) => self.upsert(item),
            Change::Delete(key) => self.remove(key),
        }
    }
}

type RecordView = SharedView<OrderedList<Record>, Record>;

/// Live list of one collection in the session's circle.
///
/// Writes never touch the list directly: a record shows up once its
/// insert comes back through the change stream.
pub struct ReconciledList {
    view: Arc<RecordView>,
    teardown: Teardown,
    store: Arc<dyn RemoteStore>,
    session: SessionScope,
    collection: Collection,
}

impl ReconciledList {
    /// Subscribe, then start loading the first page. Fails if the
    /// subscription cannot be opened; load failures show up in
    /// [`status`](Self::status).
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        session: SessionScope,
        collection: Collection,
        order: SortOrder,
        config: &SyncConfig,
    ) -> Result<Self> {
        if collection == Collection::Presence {
            return Err(SyncError::InvalidInput("presence is tracked by PresenceTracker".into()));
        }

        let label = format!("{collection} list in {}", session.scope_id);
        let stream = ChangeStream::new(store.clone(), config);
        let (subscription, events) = stream
            .subscribe::<Record>(collection, Some(session.scope_id))
            .await?;

        let loader = SnapshotLoader::new(store.clone(), session.actor_id).records(
            collection,
            session.scope_id,
            order,
            config.snapshot_limit,
        );
        let view = SharedView::new(OrderedList::new(order), config.replay_capacity, label.clone());
        let driver = spawn_driver(
            view.clone(),
            loader,
            events,
            subscription.clone(),
            config.reload_retry,
        );

        Ok(Self {
            teardown: Teardown::new(view.clone(), subscription, driver, label),
            view,
            store,
            session,
            collection,
        })
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn session(&self) -> SessionScope {
        self.session
    }

    /// Current items in view order.
    pub fn items(&self) -> Vec<Record> {
        self.view.read(|v| v.state().items().to_vec())
    }

    pub fn len(&self) -> usize {
        self.view.read(|v| v.state().items().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.view.read(|v| v.state().get(id).cloned())
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.view.read(|v| v.state().items().iter().map(|r| r.id).collect())
    }

    pub fn status(&self) -> ViewStatus {
        self.view.status()
    }

    pub fn revision(&self) -> u64 {
        self.view.read(|v| v.revision())
    }

    /// Fires on every observable change, including status changes.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.view.watch()
    }

    /// Submit a new record authored by the session actor. Returns once the
    /// store accepted it, which says nothing about the list yet.
    pub async fn append(&self, payload: Payload) -> Result<RecordId> {
        if self.teardown.is_disposed() {
            return Err(SyncError::Disposed);
        }
        if payload.collection() != self.collection {
            return Err(SyncError::InvalidInput(format!(
                "{} payload does not belong in {}",
                payload.collection(),
                self.collection
            )));
        }
        self.store
            .insert(NewRecord {
                scope_id: self.session.scope_id,
                author_id: self.session.actor_id,
                payload,
            })
            .await
    }

    pub fn teardown(&self) -> Teardown {
        self.teardown.clone()
    }

    pub fn dispose(&self) {
        self.teardown.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.is_disposed()
    }
}

impl Drop for ReconciledList {
    fn drop(&mut self) {
        self.teardown.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{Applied, SyncedView};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: Uuid,
        text: &'static str,
    }

    impl Keyed for Item {
        fn key(&self) -> Uuid {
            self.id
        }
    }

    fn item(id: u128, text: &'static str) -> Item {
        Item {
            id: Uuid::from_u128(id),
            text,
        }
    }

    fn ids(list: &OrderedList<Item>) -> Vec<u128> {
        list.items().iter().map(|i| i.id.as_u128()).collect()
    }

    #[test]
    fn test_descending_insert_then_delete() {
        let mut list = OrderedList::new(SortOrder::Descending);
        list.reset(vec![item(1, "a"), item(2, "b")]);

        assert!(list.apply(Change::Insert(item(3, "c"))));
        assert_eq!(ids(&list), vec![3, 1, 2]);

        assert!(list.apply(Change::Delete(Uuid::from_u128(1))));
        assert_eq!(ids(&list), vec![3, 2]);
    }

    #[test]
    fn test_ascending_appends_at_tail() {
        let mut list = OrderedList::new(SortOrder::Ascending);
        list.reset(vec![item(1, "a")]);
        list.apply(Change::Insert(item(2, "b")));
        assert_eq!(ids(&list), vec![1, 2]);
    }

    #[test]
    fn test_update_keeps_position() {
        let mut list = OrderedList::new(SortOrder::Descending);
        list.reset(vec![item(1, "a"), item(2, "b"), item(3, "c")]);

        assert!(list.apply(Change::Update(item(2, "edited"))));
        assert_eq!(ids(&list), vec![1, 2, 3]);
        assert_eq!(list.get(Uuid::from_u128(2)).unwrap().text, "edited");
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut list = OrderedList::new(SortOrder::Descending);
        list.reset(vec![item(1, "a")]);

        assert!(list.apply(Change::Update(item(1, "b"))));
        let once = list.items().to_vec();
        assert!(!list.apply(Change::Update(item(1, "b"))));
        assert_eq!(list.items(), once.as_slice());
    }

    #[test]
    fn test_cross_kind_fallbacks() {
        let mut list = OrderedList::new(SortOrder::Ascending);

        // Update of an unknown key inserts, insert of a known key updates.
        list.apply(Change::Update(item(1, "a")));
        list.apply(Change::Insert(item(1, "b")));
        assert_eq!(list.items(), &[item(1, "b")]);

        // Deleting something absent is a no-op.
        assert!(!list.apply(Change::Delete(Uuid::from_u128(9))));
    }

    #[test]
    fn test_snapshot_is_deduplicated() {
        let mut list = OrderedList::new(SortOrder::Ascending);
        list.reset(vec![item(1, "a"), item(2, "b"), item(1, "a")]);
        assert_eq!(ids(&list), vec![1, 2]);
    }

    #[test]
    fn test_one_entry_per_surviving_id() {
        let mut list = OrderedList::new(SortOrder::Descending);
        let events = vec![
            Change::Insert(item(1, "a")),
            Change::Insert(item(2, "b")),
            Change::Update(item(1, "a2")),
            Change::Insert(item(3, "c")),
            Change::Delete(Uuid::from_u128(2)),
            Change::Insert(item(2, "b2")),
            Change::Delete(Uuid::from_u128(3)),
        ];
        for event in events {
            list.apply(event);
        }

        let mut seen = ids(&list);
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(list.get(Uuid::from_u128(1)).unwrap().text, "a2");
        assert_eq!(list.get(Uuid::from_u128(2)).unwrap().text, "b2");
    }

    #[test]
    fn test_buffered_replay_matches_live() {
        let snapshot = vec![item(1, "a"), item(2, "b")];
        let events = vec![
            Change::Insert(item(3, "c")),
            Change::Update(item(1, "a2")),
            Change::Delete(Uuid::from_u128(2)),
        ];

        let mut buffered = SyncedView::new(OrderedList::new(SortOrder::Descending), 16);
        for event in events.clone() {
            assert_eq!(buffered.apply(event), Applied::Buffered);
        }
        buffered.seed(snapshot.clone());

        let mut live = SyncedView::new(OrderedList::new(SortOrder::Descending), 16);
        live.seed(snapshot);
        for event in events {
            live.apply(event);
        }

        assert_eq!(buffered.state().items(), live.state().items());
    }

    #[test]
    fn test_disposed_view_keeps_final_snapshot() {
        let mut view = SyncedView::new(OrderedList::new(SortOrder::Descending), 16);
        view.seed(vec![item(1, "a")]);
        view.dispose();

        let before = view.state().items().to_vec();
        assert_eq!(view.apply(Change::Insert(item(2, "late"))), Applied::Ignored);
        assert_eq!(view.state().items(), before.as_slice());
    }
}
