//! Who in the circle is awake.
//!
//! One record per member, keyed by member id. Each key has one writer
//! (the member), so the map is last-writer-wins with the store's
//! `last_seen` as the version: anything older than what is held is
//! dropped, whether it comes from a snapshot, a duplicated stream event
//! or a toggle response that raced its own event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use circle_core::{CircleId, Collection, MemberId, PresenceRecord, Result, SyncError};

use crate::config::{PresenceFeed, SyncConfig};
use crate::driver::{spawn_driver, SharedView, Teardown};
use crate::protocol::Change;
use crate::remote::RemoteStore;
use crate::session::SessionScope;
use crate::snapshot::SnapshotLoader;
use crate::stream::ChangeStream;
use crate::view::{Materialize, ViewStatus};

#[derive(Debug, Clone)]
pub struct PresenceMap {
    scope_id: CircleId,
    /// Local membership filter for collection-wide feeds.
    members: Option<HashSet<MemberId>>,
    entries: HashMap<MemberId, PresenceRecord>,
}

impl PresenceMap {
    pub fn new(scope_id: CircleId) -> Self {
        Self {
            scope_id,
            members: None,
            entries: HashMap::new(),
        }
    }

    /// Only accept records of these members.
    pub fn with_members(mut self, members: impl IntoIterator<Item = MemberId>) -> Self {
        self.members = Some(members.into_iter().collect());
        self
    }

    pub fn get(&self, member_id: MemberId) -> Option<&PresenceRecord> {
        self.entries.get(&member_id)
    }

    pub fn entries(&self) -> &HashMap<MemberId, PresenceRecord> {
        &self.entries
    }

    fn accepts(&self, record: &PresenceRecord) -> bool {
        record.scope_id == self.scope_id
            && self
                .members
                .as_ref()
                .map_or(true, |members| members.contains(&record.member_id))
    }

    fn upsert(&mut self, record: PresenceRecord) -> bool {
        if !self.accepts(&record) {
            return false;
        }
        match self.entries.get(&record.member_id) {
            Some(held) if !record.supersedes(held) => false,
            _ => {
                self.entries.insert(record.member_id, record);
                true
            }
        }
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.id != id);
        before != self.entries.len()
    }
}

impl Materialize<PresenceRecord> for PresenceMap {
    fn reset(&mut self, snapshot: Vec<PresenceRecord>) {
        let held = std::mem::take(&mut self.entries);
        for record in snapshot {
            self.upsert(record);
        }
        // A toggle response newer than the snapshot survives it.
        for (member_id, record) in held {
            match self.entries.get(&member_id) {
                Some(current) if !record.supersedes(current) => {}
                _ => {
                    self.entries.insert(member_id, record);
                }
            }
        }
    }

    fn apply(&mut self, change: Change<PresenceRecord>) -> bool {
        match change {
            Change::Insert(record) | Change::Update(record) => self.upsert(record),
            Change::Delete(id) => self.remove(id),
        }
    }
}

type PresenceView = SharedView<PresenceMap, PresenceRecord>;

/// Presence of every member of the session's circle.
pub struct PresenceTracker {
    view: Arc<PresenceView>,
    teardown: Teardown,
    store: Arc<dyn RemoteStore>,
    session: SessionScope,
}

impl PresenceTracker {
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        session: SessionScope,
        config: &SyncConfig,
    ) -> Result<Self> {
        let scope_id = session.scope_id;
        let stream = ChangeStream::new(store.clone(), config);

        let (map, (subscription, events)) = match config.presence_feed {
            PresenceFeed::Scoped => (
                PresenceMap::new(scope_id),
                stream
                    .subscribe::<PresenceRecord>(Collection::Presence, Some(scope_id))
                    .await?,
            ),
            PresenceFeed::Unscoped => {
                // Membership is read once; members who join later stay
                // invisible until the tracker is reopened.
                let members = store.members(scope_id).await?;
                log::warn!("Presence for {scope_id} filtered locally over an unscoped feed");
                (
                    PresenceMap::new(scope_id).with_members(members.iter().map(|p| p.id)),
                    stream
                        .subscribe::<PresenceRecord>(Collection::Presence, None)
                        .await?,
                )
            }
        };

        let label = format!("presence in {scope_id}");
        let view = SharedView::new(map, config.replay_capacity, label.clone());
        let loader = SnapshotLoader::new(store.clone(), session.actor_id).presence(scope_id);
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
        })
    }

    /// Flip the actor's awake flag. The authoritative record is applied
    /// locally right away, even before the first snapshot lands; its
    /// stream echo is then a no-op.
    pub async fn toggle_awake(&self) -> Result<PresenceRecord> {
        if self.teardown.is_disposed() {
            return Err(SyncError::Disposed);
        }
        let record = self
            .store
            .toggle_awake(self.session.scope_id, self.session.actor_id)
            .await?;
        self.view.update(|v| v.apply_confirmed(Change::Update(record.clone())));
        Ok(record)
    }

    pub fn get(&self, member_id: MemberId) -> Option<PresenceRecord> {
        self.view.read(|v| v.state().get(member_id).cloned())
    }

    pub fn my_presence(&self) -> Option<PresenceRecord> {
        self.get(self.session.actor_id)
    }

    pub fn entries(&self) -> HashMap<MemberId, PresenceRecord> {
        self.view.read(|v| v.state().entries().clone())
    }

    /// Awake members, longest awake first.
    pub fn awake(&self) -> Vec<PresenceRecord> {
        let mut awake: Vec<_> = self.partition(true);
        awake.sort_by_key(|p| p.awake_since);
        awake
    }

    /// Asleep members, most recently seen first.
    pub fn asleep(&self) -> Vec<PresenceRecord> {
        let mut asleep: Vec<_> = self.partition(false);
        asleep.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        asleep
    }

    fn partition(&self, is_awake: bool) -> Vec<PresenceRecord> {
        self.view.read(|v| {
            v.state()
                .entries()
                .values()
                .filter(|p| p.is_awake == is_awake)
                .cloned()
                .collect()
        })
    }

    pub fn status(&self) -> ViewStatus {
        self.view.status()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.view.watch()
    }

    pub fn teardown(&self) -> Teardown {
        self.teardown.clone()
    }

    pub fn dispose(&self) {
        self.teardown.dispose();
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.teardown.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_last_writer_wins_by_last_seen() {
        let scope = Uuid::new_v4();
        let member = Uuid::new_v4();
        let t0 = Utc::now();

        let asleep = PresenceRecord::asleep(scope, member, t0);
        let awake = asleep.toggled(t0 + Duration::seconds(1));

        let mut map = PresenceMap::new(scope);
        assert!(map.apply(Change::Insert(awake.clone())));
        // Older record arriving late does not roll back.
        assert!(!map.apply(Change::Update(asleep)));
        // Duplicate is a no-op.
        assert!(!map.apply(Change::Update(awake.clone())));
        assert_eq!(map.get(member), Some(&awake));
    }

    #[test]
    fn test_other_scopes_and_strangers_are_filtered() {
        let scope = Uuid::new_v4();
        let (friend, stranger) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let mut map = PresenceMap::new(scope).with_members([friend]);
        assert!(!map.apply(Change::Insert(PresenceRecord::asleep(Uuid::new_v4(), friend, now))));
        assert!(!map.apply(Change::Insert(PresenceRecord::asleep(scope, stranger, now))));
        assert!(map.apply(Change::Insert(PresenceRecord::asleep(scope, friend, now))));
        assert_eq!(map.entries().len(), 1);
    }

    #[test]
    fn test_stale_snapshot_keeps_newer_toggle() {
        let scope = Uuid::new_v4();
        let member = Uuid::new_v4();
        let t0 = Utc::now();

        let old = PresenceRecord::asleep(scope, member, t0);
        let newer = old.toggled(t0 + Duration::seconds(5));

        let mut map = PresenceMap::new(scope);
        map.apply(Change::Update(newer.clone()));
        map.reset(vec![old]);
        assert_eq!(map.get(member), Some(&newer));
    }
}
