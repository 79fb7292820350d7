//! # circle-sync: realtime synchronization layer for circles
//!
//! Keeps in-memory views of a circle's collections consistent with a
//! shared remote store: load a bounded snapshot, follow the change
//! stream, merge both without duplicates or lost updates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  partial notices   ┌──────────────┐
//! │ RemoteStore  │ ─────────────────► │ ChangeStream │  re-fetch full
//! │ (authority)  │                    │ (pump task)  │  record + author
//! └──────┬───────┘                    └──────┬───────┘
//!        │ select / limit                    │ StreamEvent<T>
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌──────────────┐
//! │SnapshotLoader│ ─────────────────► │ view driver  │ ── ReplayQueue
//! └──────────────┘      snapshot      └──────┬───────┘    while loading
//!                                            │
//!                         ┌──────────────────┼──────────────────┐
//!                         ▼                  ▼                  ▼
//!                  ReconciledList     PresenceTracker    ClaimCoordinator
//!                  (feeds)            (LWW map)          (requests)
//! ```
//!
//! Writes go the other way: a mutation call reaches the store and only
//! becomes visible once its change comes back through the stream.
//!
//! ## Modules
//!
//! - [`protocol`]: change notices and fetched events
//! - [`broadcast`]: per-channel notice fan-out
//! - [`remote`]: the store seam; [`memory`] is the in-process store
//! - [`stream`] / [`snapshot`]: the two inputs of every view
//! - [`replay`], [`view`], [`driver`]: buffer-then-replay reconciliation
//! - [`list`], [`presence`], [`claims`], [`feeds`]: the views
//! - [`session`], [`circle`]: session scoping and circle membership

pub mod protocol;
pub mod broadcast;
pub mod config;
pub mod remote;
pub mod memory;
pub mod stream;
pub mod snapshot;
pub mod replay;
pub mod view;
pub mod driver;
pub mod list;
pub mod presence;
pub mod claims;
pub mod feeds;
pub mod session;
pub mod circle;

// Re-exports for convenience
pub use protocol::{Change, ChangeKind, ChangeNotification, ConnectionState, StreamEvent};
pub use broadcast::{ChangeFeed, ChannelKey, FeedStats};
pub use config::{PresenceFeed, SyncConfig};
pub use remote::{Fetchable, RemoteStore, SnapshotQuery};
pub use memory::{InMemoryStore, MemoryStoreConfig};
pub use stream::{ChangeStream, SubscriptionHandle};
pub use snapshot::{Loader, SnapshotLoader};
pub use replay::{Replay, ReplayQueue};
pub use view::{Applied, Materialize, Phase, SeedOutcome, SyncedView, ViewStatus};
pub use driver::{spawn_driver, Dispose, SharedView, Teardown};
pub use list::{OrderedList, ReconciledList};
pub use presence::{PresenceMap, PresenceTracker};
pub use claims::{ClaimCoordinator, ClaimOutcome};
pub use feeds::{Messages, SharedContent, Thoughts};
pub use session::{CircleSync, Session, SessionContext, SessionScope};
pub use circle::{CircleDirectory, CircleInfo};
