//! Snapshot-plus-stream view state shared by every list and map.
//!
//! ```text
//!            seed(snapshot) + replay
//!   Loading ─────────────────────────► Ready
//!      ▲  │ events buffered               │ events applied
//!      │  │                               │
//!      └──┼────── begin_reload ◄──────────┘  (resync / overflow)
//!         │
//!         └────────► Disposed ◄── dispose / deny (terminal)
//! ```
//!
//! The view itself is synchronous; the driver task owns the asynchronous
//! half and only calls into it while holding the view lock, so every
//! handler runs to completion before the next event is looked at.

use circle_core::SyncError;

use crate::protocol::Change;
use crate::replay::ReplayQueue;

/// Local state a view maintains from a snapshot and a change sequence.
pub trait Materialize<T>: Send + Sync + 'static {
    /// Replace everything with a freshly loaded snapshot.
    fn reset(&mut self, snapshot: Vec<T>);

    /// Apply one change. Returns whether anything observable changed.
    fn apply(&mut self, change: Change<T>) -> bool;
}

/// Internal lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
    Disposed,
}

/// What consumers see about a view's freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    /// No snapshot yet.
    Loading,
    Ready,
    /// Items are shown but a reload is pending or failed transiently.
    Stale,
    /// Fatal; the instance stopped and will not recover on its own.
    AccessDenied(SyncError),
    Disposed,
}

impl ViewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ViewStatus::AccessDenied(_) | ViewStatus::Disposed)
    }
}

/// Result of handing an event to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// Queued until the snapshot arrives.
    Buffered,
    /// Queue full while loading; the view needs another snapshot.
    Overflowed,
    /// View already disposed.
    Ignored,
}

/// Outcome of seeding from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    pub replayed: usize,
    /// Buffered events were dropped; load again.
    pub overflowed: bool,
}

pub struct SyncedView<V, T> {
    state: V,
    phase: Phase,
    status: ViewStatus,
    pending: ReplayQueue<Change<T>>,
    replay_capacity: usize,
    revision: u64,
}

impl<V: Materialize<T>, T> SyncedView<V, T> {
    pub fn new(state: V, replay_capacity: usize) -> Self {
        Self {
            state,
            phase: Phase::Loading,
            status: ViewStatus::Loading,
            pending: ReplayQueue::new(replay_capacity),
            replay_capacity,
            revision: 0,
        }
    }

    pub fn state(&self) -> &V {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    /// Bumped on every observable change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn apply(&mut self, change: Change<T>) -> Applied {
        match self.phase {
            Phase::Disposed => Applied::Ignored,
            Phase::Loading => {
                if self.pending.enqueue(change) {
                    Applied::Buffered
                } else {
                    Applied::Overflowed
                }
            }
            Phase::Ready => {
                if self.state.apply(change) {
                    self.bump();
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
        }
    }

    /// Apply a store-confirmed change now, whatever the phase. While
    /// loading it is also queued so the replay ends in the same state.
    pub fn apply_confirmed(&mut self, change: Change<T>) -> bool
    where
        T: Clone,
    {
        match self.phase {
            Phase::Disposed => return false,
            Phase::Loading => {
                self.pending.enqueue(change.clone());
            }
            Phase::Ready => {}
        }
        let changed = self.state.apply(change);
        if changed {
            self.bump();
        }
        changed
    }

    /// Seed with a snapshot and replay what was buffered, in arrival order.
    pub fn seed(&mut self, snapshot: Vec<T>) -> SeedOutcome {
        if self.phase == Phase::Disposed {
            return SeedOutcome::default();
        }

        self.state.reset(snapshot);
        let replay = self.pending.flush();
        let replayed = replay.events.len();
        for change in replay.events {
            self.state.apply(change);
        }

        self.phase = Phase::Ready;
        self.status = if replay.overflowed {
            ViewStatus::Stale
        } else {
            ViewStatus::Ready
        };
        self.bump();

        SeedOutcome {
            replayed,
            overflowed: replay.overflowed,
        }
    }

    /// Go back to Loading with an empty queue. Items stay visible.
    pub fn begin_reload(&mut self) -> bool {
        if self.phase == Phase::Disposed {
            return false;
        }
        self.phase = Phase::Loading;
        self.pending = ReplayQueue::new(self.replay_capacity);
        if self.status == ViewStatus::Ready {
            self.status = ViewStatus::Stale;
            self.bump();
        }
        true
    }

    pub fn mark_stale(&mut self) {
        if self.phase == Phase::Disposed || self.status == ViewStatus::Stale {
            return;
        }
        self.status = ViewStatus::Stale;
        self.bump();
    }

    /// Stop for good after an access error.
    pub fn deny(&mut self, error: SyncError) {
        if self.phase == Phase::Disposed {
            return;
        }
        self.phase = Phase::Disposed;
        self.status = ViewStatus::AccessDenied(error);
        self.pending = ReplayQueue::new(0);
        self.bump();
    }

    /// Returns `false` if the view was already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.phase == Phase::Disposed {
            return false;
        }
        self.phase = Phase::Disposed;
        self.status = ViewStatus::Disposed;
        self.pending = ReplayQueue::new(0);
        self.bump();
        true
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}
