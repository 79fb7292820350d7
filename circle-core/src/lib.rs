//! # circle-core: shared data model for the circle sync layer
//!
//! Records, presence entries, circles and the error taxonomy used by
//! `circle-sync` and its consumers. Nothing in here performs I/O.

pub mod error;
pub mod model;

pub use error::{Result, SyncError};
pub use model::{
    AuthorSummary, Circle, CircleId, Collection, Keyed, MemberId, NewRecord, Payload,
    PresenceRecord, Profile, Record, RecordId, RequestState, ShareKind, SortOrder,
    source_host,
};
