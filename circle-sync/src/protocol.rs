//! Change notifications and the events derived from them.
//!
//! The remote store emits partial notices (collection, kind, id). The
//! change stream turns each notice into a fully fetched [`Change`]
//! before any view sees it:
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────┬──────────┐
//! │ collection   │ kind     │ id       │ scope_id │ seq      │
//! └──────────────┴──────────┴──────────┴──────────┴──────────┘
//!        │ re-fetch with author join
//!        ▼
//! StreamEvent::Change(Change::Insert(Record { … }))
//! ```

use circle_core::{CircleId, Collection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of change the store committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Partial change notice as delivered by the store. Carries no row data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub id: Uuid,
    pub scope_id: CircleId,
    /// Store commit sequence number.
    pub seq: u64,
}

impl ChangeNotification {
    pub fn insert(collection: Collection, id: Uuid, scope_id: CircleId, seq: u64) -> Self {
        Self { collection, kind: ChangeKind::Insert, id, scope_id, seq }
    }

    pub fn update(collection: Collection, id: Uuid, scope_id: CircleId, seq: u64) -> Self {
        Self { collection, kind: ChangeKind::Update, id, scope_id, seq }
    }

    pub fn delete(collection: Collection, id: Uuid, scope_id: CircleId, seq: u64) -> Self {
        Self { collection, kind: ChangeKind::Delete, id, scope_id, seq }
    }
}

/// A fully fetched change, ready to apply to a view.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete(Uuid),
}

/// What a subscriber receives from a change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Change(Change<T>),
    /// Events may have been missed (lag, failed re-fetch, reconnection).
    /// The consumer should reload a snapshot.
    Resync,
}

/// Stream transport state, observable by consumers that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}
