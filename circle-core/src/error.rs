use thiserror::Error;

use crate::model::{CircleId, MemberId, RecordId};

/// Every failure the sync layer can report.
///
/// Classification matters more than the message: transient failures are
/// retried, access errors stop the instance, and a lost claim race is an
/// expected outcome rather than a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("circle {0} does not exist or caller is not a member")]
    ScopeInvalid(CircleId),
    #[error("caller is not allowed to perform this operation")]
    Unauthorized,
    #[error("request {request_id} already claimed by {claimed_by}")]
    AlreadyClaimed {
        request_id: RecordId,
        claimed_by: MemberId,
    },
    #[error("record {0} no longer exists")]
    StaleReference(RecordId),
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no signed-in actor")]
    NoActor,
    #[error("sync instance already disposed")]
    Disposed,
}

impl SyncError {
    /// Transport-level failure worth re-issuing.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable(_))
    }

    /// Fatal to the instance that hit it; surfaced to the UI, never retried.
    pub fn is_access_error(&self) -> bool {
        matches!(self, SyncError::ScopeInvalid(_) | SyncError::Unauthorized)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
