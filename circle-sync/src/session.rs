//! Who is signed in, which circle they are in, and the bundle of sync
//! instances that belongs to exactly that pair.
//!
//! Sync instances take their session explicitly when constructed and
//! never look it up again. A session change is therefore a
//! reconstruction: a [`CircleSync`] registers its teardowns with the
//! context, and the call that changes the session disposes every bundle
//! opened for another session before it returns.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use circle_core::{CircleId, MemberId, Result, SyncError};

use crate::claims::ClaimCoordinator;
use crate::config::SyncConfig;
use crate::driver::Teardown;
use crate::feeds::{Messages, SharedContent, Thoughts};
use crate::presence::PresenceTracker;
use crate::remote::RemoteStore;

/// Current actor and circle, either possibly absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    pub actor_id: Option<MemberId>,
    pub scope_id: Option<CircleId>,
}

impl Session {
    pub fn current_actor_id(&self) -> Option<MemberId> {
        self.actor_id
    }

    pub fn current_scope_id(&self) -> Option<CircleId> {
        self.scope_id
    }

    /// Both parts, or the reason a sync instance cannot be built.
    pub fn require(&self) -> Result<SessionScope> {
        let actor_id = self.actor_id.ok_or(SyncError::NoActor)?;
        let scope_id = self
            .scope_id
            .ok_or_else(|| SyncError::InvalidInput("no circle selected".into()))?;
        Ok(SessionScope { actor_id, scope_id })
    }
}

/// A complete session: what every sync instance is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionScope {
    pub actor_id: MemberId,
    pub scope_id: CircleId,
}

/// Teardowns bound to the session they were opened for.
#[derive(Default)]
struct Bindings {
    next_id: u64,
    entries: Vec<(u64, SessionScope, Vec<Teardown>)>,
}

/// Publishes session changes.
#[derive(Clone)]
pub struct SessionContext {
    current: Arc<watch::Sender<Session>>,
    bindings: Arc<Mutex<Bindings>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (current, _) = watch::channel(Session::default());
        Self {
            current: Arc::new(current),
            bindings: Arc::new(Mutex::new(Bindings::default())),
        }
    }

    pub fn current(&self) -> Session {
        *self.current.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.current.subscribe()
    }

    /// Switching to another actor leaves no circle selected.
    pub fn sign_in(&self, actor_id: MemberId) {
        self.set(|s| {
            if s.actor_id != Some(actor_id) {
                s.scope_id = None;
            }
            s.actor_id = Some(actor_id);
        });
    }

    pub fn sign_out(&self) {
        self.set(|s| *s = Session::default());
    }

    pub fn enter_circle(&self, scope_id: CircleId) -> Result<()> {
        if self.current().actor_id.is_none() {
            return Err(SyncError::NoActor);
        }
        self.set(|s| s.scope_id = Some(scope_id));
        Ok(())
    }

    /// Bind teardowns to `session`. Returns `None`, binding nothing, when
    /// `session` is no longer current.
    pub fn bind(&self, session: SessionScope, teardowns: Vec<Teardown>) -> Option<u64> {
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        if self.current.borrow().require().ok() != Some(session) {
            return None;
        }
        let id = bindings.next_id;
        bindings.next_id += 1;
        bindings.entries.push((id, session, teardowns));
        Some(id)
    }

    pub fn unbind(&self, id: u64) {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .retain(|(bound, _, _)| *bound != id);
    }

    /// Number of live bindings.
    pub fn bound(&self) -> usize {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Apply `f` and, if the session changed, dispose every binding that
    /// no longer matches it. Disposal is done when this returns.
    fn set(&self, f: impl FnOnce(&mut Session)) {
        let ended = {
            let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = self.current.send_if_modified(|session| {
                let before = *session;
                f(session);
                if *session == before {
                    return false;
                }
                log::info!(
                    "Session changed: actor {:?}, circle {:?}",
                    session.actor_id,
                    session.scope_id
                );
                true
            });
            if !changed {
                return;
            }
            let current = self.current.borrow().require().ok();
            let (ended, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut bindings.entries)
                .into_iter()
                .partition(|(_, session, _)| Some(*session) != current);
            bindings.entries = kept;
            ended
        };

        for (_, session, teardowns) in ended {
            log::info!("Session for {} in {} ended", session.actor_id, session.scope_id);
            for teardown in &teardowns {
                teardown.dispose();
            }
        }
    }
}

/// Every sync instance of one session.
pub struct CircleSync {
    pub thoughts: Thoughts,
    pub messages: Messages,
    pub shared: SharedContent,
    pub requests: ClaimCoordinator,
    pub presence: PresenceTracker,
    session: SessionScope,
    context: SessionContext,
    teardowns: Vec<Teardown>,
    binding: Option<u64>,
}

impl CircleSync {
    /// Open all instances concurrently for the context's current session.
    /// Fails with `NoActor` when nobody is signed in. If the session moves
    /// on while opening, the bundle comes back already disposed.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        context: &SessionContext,
        config: &SyncConfig,
    ) -> Result<Self> {
        let session = context.current().require()?;

        let (thoughts, messages, shared, requests, presence) = tokio::try_join!(
            Thoughts::open(store.clone(), session, config),
            Messages::open(store.clone(), session, config),
            SharedContent::open(store.clone(), session, config),
            ClaimCoordinator::open(store.clone(), session, config),
            PresenceTracker::open(store.clone(), session, config),
        )?;

        let teardowns = vec![
            thoughts.teardown(),
            messages.teardown(),
            shared.teardown(),
            requests.requests().teardown(),
            presence.teardown(),
        ];
        let binding = context.bind(session, teardowns.clone());
        if binding.is_some() {
            log::info!(
                "Circle sync open for {} in {}",
                session.actor_id,
                session.scope_id
            );
        } else {
            log::info!("Session for {} ended while opening", session.actor_id);
        }

        let sync = Self {
            thoughts,
            messages,
            shared,
            requests,
            presence,
            session,
            context: context.clone(),
            teardowns,
            binding,
        };
        if sync.binding.is_none() {
            sync.dispose();
        }
        Ok(sync)
    }

    pub fn session(&self) -> SessionScope {
        self.session
    }

    pub fn dispose(&self) {
        for teardown in &self.teardowns {
            teardown.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardowns.iter().all(Teardown::is_disposed)
    }
}

impl Drop for CircleSync {
    fn drop(&mut self) {
        self.dispose();
        if let Some(id) = self.binding.take() {
            self.context.unbind(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_require_reports_what_is_missing() {
        let mut session = Session::default();
        assert_eq!(session.require(), Err(SyncError::NoActor));

        session.actor_id = Some(Uuid::new_v4());
        assert!(matches!(session.require(), Err(SyncError::InvalidInput(_))));

        session.scope_id = Some(Uuid::new_v4());
        assert!(session.require().is_ok());
    }

    #[test]
    fn test_enter_circle_needs_an_actor() {
        let context = SessionContext::new();
        assert_eq!(context.enter_circle(Uuid::new_v4()), Err(SyncError::NoActor));
    }

    #[test]
    fn test_switching_actor_clears_circle() {
        let context = SessionContext::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let circle = Uuid::new_v4();

        context.sign_in(alice);
        context.enter_circle(circle).unwrap();
        context.sign_in(alice);
        assert_eq!(context.current().scope_id, Some(circle));

        context.sign_in(bob);
        assert_eq!(context.current().actor_id, Some(bob));
        assert_eq!(context.current().scope_id, None);
    }

    #[tokio::test]
    async fn test_unchanged_session_does_not_notify() {
        let context = SessionContext::new();
        let mut changes = context.subscribe();
        let alice = Uuid::new_v4();

        context.sign_in(alice);
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        context.sign_in(alice);
        assert!(!changes.has_changed().unwrap());
    }

    #[test]
    fn test_bindings_follow_the_session() {
        let context = SessionContext::new();
        let (alice, home, work) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let at_home = SessionScope { actor_id: alice, scope_id: home };

        assert_eq!(context.bind(at_home, Vec::new()), None);

        context.sign_in(alice);
        context.enter_circle(home).unwrap();
        let first = context.bind(at_home, Vec::new()).unwrap();
        let second = context.bind(at_home, Vec::new()).unwrap();
        assert_ne!(first, second);
        assert_eq!(context.bound(), 2);

        context.unbind(first);
        assert_eq!(context.bound(), 1);

        // Same circle again is not a change.
        context.enter_circle(home).unwrap();
        assert_eq!(context.bound(), 1);

        context.enter_circle(work).unwrap();
        assert_eq!(context.bound(), 0);
        assert_eq!(context.bind(at_home, Vec::new()), None);
    }
}
