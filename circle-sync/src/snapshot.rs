//! Bounded snapshot reads for one actor.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use circle_core::{CircleId, Collection, MemberId, PresenceRecord, Record, Result, SortOrder};

use crate::remote::{RemoteStore, SnapshotQuery};

/// Re-issuable load used by a view driver.
pub type Loader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>>> + Send + Sync>;

#[derive(Clone)]
pub struct SnapshotLoader {
    store: Arc<dyn RemoteStore>,
    actor_id: MemberId,
}

impl SnapshotLoader {
    pub fn new(store: Arc<dyn RemoteStore>, actor_id: MemberId) -> Self {
        Self { store, actor_id }
    }

    /// One ordered page, at most `limit` records, authors joined. Never
    /// complete for scopes larger than the page.
    pub async fn load(
        &self,
        collection: Collection,
        scope_id: CircleId,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let records = self
            .store
            .select(SnapshotQuery {
                collection,
                scope_id,
                actor_id: self.actor_id,
                order,
                limit,
            })
            .await?;
        log::debug!("Loaded {} {collection} records for {scope_id}", records.len());
        Ok(records)
    }

    pub async fn load_presence(&self, scope_id: CircleId) -> Result<Vec<PresenceRecord>> {
        self.store.select_presence(scope_id, self.actor_id).await
    }

    /// A loader that re-runs the same page query each time it is called.
    pub fn records(
        &self,
        collection: Collection,
        scope_id: CircleId,
        order: SortOrder,
        limit: usize,
    ) -> Loader<Record> {
        let this = self.clone();
        Arc::new(move || {
            let this = this.clone();
            async move { this.load(collection, scope_id, order, limit).await }.boxed()
        })
    }

    pub fn presence(&self, scope_id: CircleId) -> Loader<PresenceRecord> {
        let this = self.clone();
        Arc::new(move || {
            let this = this.clone();
            async move { this.load_presence(scope_id).await }.boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use circle_core::{NewRecord, Payload, SyncError};

    #[tokio::test]
    async fn test_loader_reissues_query() {
        let store = Arc::new(InMemoryStore::default());
        let alice = store.sign_up("alice").await.unwrap();
        let circle = store.create_circle("home", alice.id).await.unwrap();

        let snapshots = SnapshotLoader::new(store.clone(), alice.id);
        let loader = snapshots.records(Collection::Messages, circle.id, SortOrder::Ascending, 50);
        assert!(loader().await.unwrap().is_empty());

        store
            .insert(NewRecord {
                scope_id: circle.id,
                author_id: alice.id,
                payload: Payload::message("hi").unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(loader().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outsider_is_rejected() {
        let store = Arc::new(InMemoryStore::default());
        let alice = store.sign_up("alice").await.unwrap();
        let mallory = store.sign_up("mallory").await.unwrap();
        let circle = store.create_circle("home", alice.id).await.unwrap();

        let snapshots = SnapshotLoader::new(store.clone(), mallory.id);
        let err = snapshots
            .load(Collection::Thoughts, circle.id, SortOrder::Descending, 50)
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::ScopeInvalid(circle.id));
    }
}
