//! In-process authoritative store.
//!
//! Plays the backend's role for the binary and the tests: it checks
//! membership, pages like `ORDER BY created_at … LIMIT n`, joins author
//! summaries on read, serialises every write behind one table lock and
//! publishes a change notice for each committed mutation.
//!
//! ```text
//! insert / claim / toggle_awake
//!        │  (table lock held)
//!        ▼
//!   Tables ── commit ──► ChangeFeed::publish ──► broadcast receivers
//! ```
//!
//! Failure injection: [`InMemoryStore::set_available`] turns every call
//! into `RemoteUnavailable`, [`InMemoryStore::close_connections`] drops
//! every change channel as a transport loss would.
//! [`MemoryStoreConfig::snapshot_latency`] slows snapshot reads alone, so
//! a view stays in Loading while writes and the stream run at full speed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use circle_core::{
    Circle, CircleId, Collection, MemberId, NewRecord, Payload, PresenceRecord, Profile, Record,
    RecordId, RequestState, Result, SortOrder, SyncError,
};

use crate::broadcast::{ChangeFeed, ChannelKey, FeedStats};
use crate::protocol::ChangeNotification;
use crate::remote::{RemoteStore, SnapshotQuery};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Notices a listener may fall behind before it lags
    pub feed_capacity: usize,
    /// Hard cap on any page, whatever the caller asks for
    pub max_page: usize,
    /// Simulated round-trip applied to every call
    pub latency: Option<Duration>,
    /// Extra delay on snapshot reads only
    pub snapshot_latency: Option<Duration>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            feed_capacity: 256,
            max_page: 50,
            latency: None,
            snapshot_latency: None,
        }
    }
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<MemberId, Profile>,
    circles: HashMap<CircleId, Circle>,
    /// (circle, member) in join order
    memberships: Vec<(CircleId, MemberId)>,
    /// Rows per collection in commit order, authors not joined
    records: HashMap<Collection, Vec<Record>>,
    presence: HashMap<Uuid, PresenceRecord>,
    seq: u64,
    last_commit: Option<DateTime<Utc>>,
}

impl Tables {
    /// Strictly increasing commit timestamp.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_commit {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_commit = Some(next);
        next
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn is_member(&self, scope_id: CircleId, member_id: MemberId) -> bool {
        self.memberships
            .iter()
            .any(|(c, m)| *c == scope_id && *m == member_id)
    }

    fn require_member(&self, scope_id: CircleId, member_id: MemberId) -> Result<()> {
        if !self.circles.contains_key(&scope_id) || !self.is_member(scope_id, member_id) {
            return Err(SyncError::ScopeInvalid(scope_id));
        }
        Ok(())
    }

    fn joined(&self, record: &Record) -> Record {
        let mut record = record.clone();
        record.author = self.profiles.get(&record.author_id).map(Profile::summary);
        record
    }

    fn find_record(&self, collection: Collection, id: RecordId) -> Option<&Record> {
        self.records.get(&collection)?.iter().find(|r| r.id == id)
    }

    fn find_record_mut(&mut self, collection: Collection, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(&collection)?.iter_mut().find(|r| r.id == id)
    }
}

/// Authoritative in-memory backend.
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    feed: ChangeFeed,
    available: AtomicBool,
    config: MemoryStoreConfig,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl InMemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            feed: ChangeFeed::new(config.feed_capacity),
            available: AtomicBool::new(true),
            config,
        }
    }

    /// Register a member. Stands in for the identity provider.
    pub async fn sign_up(&self, name: &str) -> Result<Profile> {
        if name.trim().is_empty() {
            return Err(SyncError::InvalidInput("name must not be empty".into()));
        }
        let profile = Profile::new(name);
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.id, profile.clone());
        log::debug!("Signed up {} ({})", profile.name, profile.id);
        Ok(profile)
    }

    /// Toggle availability; while unavailable every call fails transiently.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every change channel. Listeners see their stream close.
    pub async fn close_connections(&self) -> usize {
        let closed = self.feed.close_all().await;
        log::info!("Closed {closed} change channels");
        closed
    }

    pub async fn listener_count(&self, key: &ChannelKey) -> usize {
        self.feed.listener_count(key).await
    }

    pub async fn feed_stats(&self) -> FeedStats {
        self.feed.stats().await
    }

    async fn round_trip(&self) -> Result<()> {
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteUnavailable("store offline".into()));
        }
        Ok(())
    }

    async fn snapshot_trip(&self) -> Result<()> {
        if let Some(latency) = self.config.snapshot_latency {
            tokio::time::sleep(latency).await;
        }
        self.round_trip().await
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn select(&self, query: SnapshotQuery) -> Result<Vec<Record>> {
        self.snapshot_trip().await?;
        if query.collection == Collection::Presence {
            return Err(SyncError::InvalidInput("presence is read with select_presence".into()));
        }

        let tables = self.tables.lock().await;
        tables.require_member(query.scope_id, query.actor_id)?;

        let mut rows: Vec<&Record> = tables
            .records
            .get(&query.collection)
            .map(|rows| rows.iter().filter(|r| r.scope_id == query.scope_id).collect())
            .unwrap_or_default();

        rows.sort_by_key(|r| r.created_at);
        if query.order == SortOrder::Descending {
            rows.reverse();
        }

        Ok(rows
            .into_iter()
            .take(query.limit.min(self.config.max_page))
            .map(|r| tables.joined(r))
            .collect())
    }

    async fn fetch_record(&self, collection: Collection, id: RecordId) -> Result<Option<Record>> {
        self.round_trip().await?;
        let tables = self.tables.lock().await;
        Ok(tables.find_record(collection, id).map(|r| tables.joined(r)))
    }

    async fn select_presence(&self, scope_id: CircleId, actor_id: MemberId) -> Result<Vec<PresenceRecord>> {
        self.snapshot_trip().await?;
        let tables = self.tables.lock().await;
        tables.require_member(scope_id, actor_id)?;
        Ok(tables
            .presence
            .values()
            .filter(|p| p.scope_id == scope_id)
            .cloned()
            .collect())
    }

    async fn fetch_presence(&self, id: Uuid) -> Result<Option<PresenceRecord>> {
        self.round_trip().await?;
        Ok(self.tables.lock().await.presence.get(&id).cloned())
    }

    async fn insert(&self, record: NewRecord) -> Result<RecordId> {
        self.round_trip().await?;
        if let Payload::Request { state, .. } = &record.payload {
            if !state.is_open() {
                return Err(SyncError::InvalidInput("new requests must be open".into()));
            }
        }

        let mut tables = self.tables.lock().await;
        if !tables.circles.contains_key(&record.scope_id) {
            return Err(SyncError::ScopeInvalid(record.scope_id));
        }
        if !tables.is_member(record.scope_id, record.author_id) {
            return Err(SyncError::Unauthorized);
        }

        let collection = record.payload.collection();
        let row = Record {
            id: Uuid::new_v4(),
            scope_id: record.scope_id,
            author_id: record.author_id,
            created_at: tables.now(),
            payload: record.payload,
            author: None,
        };
        let id = row.id;
        let seq = tables.next_seq();
        tables.records.entry(collection).or_default().push(row);

        self.feed
            .publish(ChangeNotification::insert(collection, id, record.scope_id, seq))
            .await;
        log::debug!("Committed insert {id} into {collection} (seq {seq})");
        Ok(id)
    }

    async fn delete(&self, collection: Collection, id: RecordId) -> Result<bool> {
        self.round_trip().await?;
        let mut tables = self.tables.lock().await;
        let Some(rows) = tables.records.get_mut(&collection) else {
            return Ok(false);
        };
        let Some(index) = rows.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = rows.remove(index);
        let seq = tables.next_seq();

        self.feed
            .publish(ChangeNotification::delete(collection, id, removed.scope_id, seq))
            .await;
        Ok(true)
    }

    async fn toggle_awake(&self, scope_id: CircleId, actor_id: MemberId) -> Result<PresenceRecord> {
        self.round_trip().await?;
        let mut tables = self.tables.lock().await;
        tables.require_member(scope_id, actor_id)?;

        let now = tables.now();
        let existing = tables
            .presence
            .values()
            .find(|p| p.scope_id == scope_id && p.member_id == actor_id)
            .cloned();

        let (record, created) = match existing {
            Some(current) => (current.toggled(now), false),
            None => (PresenceRecord::asleep(scope_id, actor_id, now).toggled(now), true),
        };
        tables.presence.insert(record.id, record.clone());
        let seq = tables.next_seq();

        let notice = if created {
            ChangeNotification::insert(Collection::Presence, record.id, scope_id, seq)
        } else {
            ChangeNotification::update(Collection::Presence, record.id, scope_id, seq)
        };
        self.feed.publish(notice).await;
        log::debug!(
            "Member {actor_id} is now {}",
            if record.is_awake { "awake" } else { "asleep" }
        );
        Ok(record)
    }

    async fn claim(&self, request_id: RecordId, actor_id: MemberId) -> Result<Record> {
        self.round_trip().await?;
        let mut tables = self.tables.lock().await;

        let scope_id = tables
            .find_record(Collection::Requests, request_id)
            .map(|r| r.scope_id)
            .ok_or(SyncError::NotFound(request_id))?;
        if !tables.is_member(scope_id, actor_id) {
            return Err(SyncError::Unauthorized);
        }

        let row = tables
            .find_record_mut(Collection::Requests, request_id)
            .ok_or(SyncError::NotFound(request_id))?;
        match &mut row.payload {
            Payload::Request { state: RequestState::Claimed { by }, .. } => {
                return Err(SyncError::AlreadyClaimed {
                    request_id,
                    claimed_by: *by,
                });
            }
            Payload::Request { state, .. } => *state = RequestState::Claimed { by: actor_id },
            _ => return Err(SyncError::InvalidInput("not a request".into())),
        }

        let claimed = row.clone();
        let seq = tables.next_seq();
        self.feed
            .publish(ChangeNotification::update(Collection::Requests, request_id, scope_id, seq))
            .await;
        log::info!("Request {request_id} claimed by {actor_id}");
        Ok(tables.joined(&claimed))
    }

    async fn listen(
        &self,
        collection: Collection,
        scope_id: Option<CircleId>,
    ) -> Result<broadcast::Receiver<ChangeNotification>> {
        self.round_trip().await?;
        let key = match scope_id {
            Some(scope) => {
                if !self.tables.lock().await.circles.contains_key(&scope) {
                    return Err(SyncError::ScopeInvalid(scope));
                }
                ChannelKey::scoped(collection, scope)
            }
            None => ChannelKey::unscoped(collection),
        };
        Ok(self.feed.listen(key).await)
    }

    async fn circles_for(&self, actor_id: MemberId) -> Result<Vec<Circle>> {
        self.round_trip().await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|(_, m)| *m == actor_id)
            .filter_map(|(c, _)| tables.circles.get(c).cloned())
            .collect())
    }

    async fn members(&self, scope_id: CircleId) -> Result<Vec<Profile>> {
        self.round_trip().await?;
        let tables = self.tables.lock().await;
        if !tables.circles.contains_key(&scope_id) {
            return Err(SyncError::ScopeInvalid(scope_id));
        }
        Ok(tables
            .memberships
            .iter()
            .filter(|(c, _)| *c == scope_id)
            .filter_map(|(_, m)| tables.profiles.get(m).cloned())
            .collect())
    }

    async fn create_circle(&self, name: &str, actor_id: MemberId) -> Result<Circle> {
        self.round_trip().await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput("circle name must not be empty".into()));
        }

        let mut tables = self.tables.lock().await;
        if !tables.profiles.contains_key(&actor_id) {
            return Err(SyncError::Unauthorized);
        }
        let circle = Circle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            invite_code: invite_code(),
            created_by: actor_id,
            created_at: tables.now(),
        };
        tables.circles.insert(circle.id, circle.clone());
        tables.memberships.push((circle.id, actor_id));
        log::info!("Created circle {} ({})", circle.name, circle.id);
        Ok(circle)
    }

    async fn join_circle(&self, invite_code: &str, actor_id: MemberId) -> Result<Circle> {
        self.round_trip().await?;
        let mut tables = self.tables.lock().await;
        if !tables.profiles.contains_key(&actor_id) {
            return Err(SyncError::Unauthorized);
        }

        let code = invite_code.trim();
        let circle = tables
            .circles
            .values()
            .find(|c| c.invite_code.eq_ignore_ascii_case(code))
            .cloned()
            .ok_or_else(|| SyncError::InvalidInput(format!("unknown invite code {code}")))?;

        if !tables.is_member(circle.id, actor_id) {
            tables.memberships.push((circle.id, actor_id));
            log::info!("Member {actor_id} joined circle {}", circle.id);
        }
        Ok(circle)
    }
}

fn invite_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}
