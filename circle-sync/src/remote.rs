//! The remote store seam.
//!
//! Everything the sync layer needs from the backend: paged reads with the
//! author join, single-record re-fetch, writes, the two domain RPCs, and
//! change notifications. The remote side is the only arbiter of write
//! conflicts; nothing behind this trait is resolved locally.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use circle_core::{
    Circle, CircleId, Collection, Keyed, MemberId, NewRecord, PresenceRecord, Profile, Record,
    RecordId, Result, SortOrder,
};

use crate::protocol::ChangeNotification;

/// One bounded page request. Results past `limit` are not reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub collection: Collection,
    pub scope_id: CircleId,
    /// Caller; must be a member of `scope_id`.
    pub actor_id: MemberId,
    pub order: SortOrder,
    pub limit: usize,
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Ordered page of records joined with author summaries.
    async fn select(&self, query: SnapshotQuery) -> Result<Vec<Record>>;

    /// Full record with author summary; `None` once deleted.
    async fn fetch_record(&self, collection: Collection, id: RecordId) -> Result<Option<Record>>;

    /// Presence entries of one circle.
    async fn select_presence(&self, scope_id: CircleId, actor_id: MemberId) -> Result<Vec<PresenceRecord>>;

    async fn fetch_presence(&self, id: Uuid) -> Result<Option<PresenceRecord>>;

    /// Create a record authored by `record.author_id`. The new record only
    /// becomes visible to views through the change stream.
    async fn insert(&self, record: NewRecord) -> Result<RecordId>;

    async fn delete(&self, collection: Collection, id: RecordId) -> Result<bool>;

    /// Flip the actor's awake flag and return the authoritative record.
    async fn toggle_awake(&self, scope_id: CircleId, actor_id: MemberId) -> Result<PresenceRecord>;

    /// Atomically claim an open request; `AlreadyClaimed` if it is not open.
    async fn claim(&self, request_id: RecordId, actor_id: MemberId) -> Result<Record>;

    /// Change notices for a collection, narrowed to one circle when
    /// `scope_id` is set.
    async fn listen(
        &self,
        collection: Collection,
        scope_id: Option<CircleId>,
    ) -> Result<broadcast::Receiver<ChangeNotification>>;

    /// Circles the actor belongs to, in join order.
    async fn circles_for(&self, actor_id: MemberId) -> Result<Vec<Circle>>;

    async fn members(&self, scope_id: CircleId) -> Result<Vec<Profile>>;

    async fn create_circle(&self, name: &str, actor_id: MemberId) -> Result<Circle>;

    async fn join_circle(&self, invite_code: &str, actor_id: MemberId) -> Result<Circle>;
}

/// Something a change stream can re-fetch in full after a notice.
#[async_trait]
pub trait Fetchable: Keyed + Clone + Send + Sync + 'static {
    async fn fetch(store: &dyn RemoteStore, collection: Collection, id: Uuid) -> Result<Option<Self>>;
}

#[async_trait]
impl Fetchable for Record {
    async fn fetch(store: &dyn RemoteStore, collection: Collection, id: Uuid) -> Result<Option<Self>> {
        store.fetch_record(collection, id).await
    }
}

#[async_trait]
impl Fetchable for PresenceRecord {
    async fn fetch(store: &dyn RemoteStore, _collection: Collection, id: Uuid) -> Result<Option<Self>> {
        store.fetch_presence(id).await
    }
}
