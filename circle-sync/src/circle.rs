//! Finding, creating and joining circles.
//!
//! A member is in one active circle at a time. Every successful call here
//! moves the session to the circle it returns, which disposes any sync
//! bundle opened for the previous one.

use std::sync::Arc;

use circle_core::{Circle, CircleId, MemberId, Profile, Result, SyncError};

use crate::remote::RemoteStore;
use crate::session::SessionContext;

/// A circle together with its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleInfo {
    pub circle: Circle,
    pub members: Vec<Profile>,
}

pub struct CircleDirectory {
    store: Arc<dyn RemoteStore>,
    context: SessionContext,
}

impl CircleDirectory {
    pub fn new(store: Arc<dyn RemoteStore>, context: SessionContext) -> Self {
        Self { store, context }
    }

    /// The signed-in actor's circle, if they have one.
    pub async fn load(&self) -> Result<Option<CircleInfo>> {
        let actor_id = self.actor()?;
        let Some(circle) = self.store.circles_for(actor_id).await?.into_iter().next() else {
            log::debug!("Member {actor_id} is not in any circle yet");
            return Ok(None);
        };
        let members = self.store.members(circle.id).await?;
        self.context.enter_circle(circle.id)?;
        Ok(Some(CircleInfo { circle, members }))
    }

    pub async fn create(&self, name: &str) -> Result<Circle> {
        let circle = self.store.create_circle(name, self.actor()?).await?;
        self.context.enter_circle(circle.id)?;
        Ok(circle)
    }

    /// Invite codes are matched case-insensitively. Joining a circle twice
    /// is harmless.
    pub async fn join(&self, invite_code: &str) -> Result<Circle> {
        let circle = self.store.join_circle(invite_code, self.actor()?).await?;
        self.context.enter_circle(circle.id)?;
        Ok(circle)
    }

    pub async fn members(&self, scope_id: CircleId) -> Result<Vec<Profile>> {
        self.store.members(scope_id).await
    }

    fn actor(&self) -> Result<MemberId> {
        self.context.current().actor_id.ok_or(SyncError::NoActor)
    }
}
