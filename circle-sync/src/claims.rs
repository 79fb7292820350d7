//! Help requests and the single-winner claim.
//!
//! The store decides who wins. Nothing is claimed locally: the request
//! list flips to claimed when the store's update comes back through the
//! stream, so the initiator learns the winner the same way everyone
//! else does.

use std::sync::Arc;

use circle_core::{
    Collection, MemberId, Payload, Record, RecordId, RequestState, Result, SortOrder, SyncError,
};

use crate::config::SyncConfig;
use crate::list::ReconciledList;
use crate::remote::RemoteStore;
use crate::session::SessionScope;

/// How a claim attempt ended. Losing the race is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Won(Record),
    AlreadyClaimed { claimed_by: MemberId },
}

impl ClaimOutcome {
    pub fn is_won(&self) -> bool {
        matches!(self, ClaimOutcome::Won(_))
    }
}

pub struct ClaimCoordinator {
    requests: ReconciledList,
    store: Arc<dyn RemoteStore>,
    session: SessionScope,
}

impl ClaimCoordinator {
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        session: SessionScope,
        config: &SyncConfig,
    ) -> Result<Self> {
        let requests = ReconciledList::open(
            store.clone(),
            session,
            Collection::Requests,
            SortOrder::Descending,
            config,
        )
        .await?;
        Ok(Self {
            requests,
            store,
            session,
        })
    }

    pub async fn claim(&self, request_id: RecordId) -> Result<ClaimOutcome> {
        if self.requests.is_disposed() {
            return Err(SyncError::Disposed);
        }
        match self.store.claim(request_id, self.session.actor_id).await {
            Ok(record) => Ok(ClaimOutcome::Won(record)),
            Err(SyncError::AlreadyClaimed { claimed_by, .. }) => {
                log::info!("Request {request_id} was already claimed by {claimed_by}");
                Ok(ClaimOutcome::AlreadyClaimed { claimed_by })
            }
            Err(err) => Err(err),
        }
    }

    /// Post a new open request.
    pub async fn create_request(&self, text: &str) -> Result<RecordId> {
        self.requests.append(Payload::request(text)?).await
    }

    /// Whether the actor may offer help: open and not their own request.
    pub fn can_claim(&self, record: &Record) -> bool {
        record.request_state().is_some_and(|s| s.is_open()) && record.author_id != self.session.actor_id
    }

    pub fn requests(&self) -> &ReconciledList {
        &self.requests
    }

    pub fn open_requests(&self) -> Vec<Record> {
        self.requests
            .items()
            .into_iter()
            .filter(|r| r.request_state() == Some(RequestState::Open))
            .collect()
    }

    pub fn dispose(&self) {
        self.requests.dispose();
    }
}
