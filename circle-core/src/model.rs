//! Records, payloads and presence entries shared by every layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SyncError};

pub type MemberId = Uuid;
pub type CircleId = Uuid;
pub type RecordId = Uuid;

/// Anything held in a synced view is addressed by a stable key.
pub trait Keyed {
    fn key(&self) -> Uuid;
}

// ───────────────────────────────────────────────────────────────────
// Collections
// ───────────────────────────────────────────────────────────────────

/// Named remote collections the sync layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Thoughts,
    Messages,
    SharedContent,
    Requests,
    Presence,
}

impl Collection {
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Thoughts => "thoughts",
            Collection::Messages => "messages",
            Collection::SharedContent => "shared_content",
            Collection::Requests => "requests",
            Collection::Presence => "presence",
        }
    }

    /// Chat reads oldest-first, every other feed newest-first.
    pub fn default_order(&self) -> SortOrder {
        match self {
            Collection::Messages => SortOrder::Ascending,
            _ => SortOrder::Descending,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Creation-time ordering of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

// ───────────────────────────────────────────────────────────────────
// People and circles
// ───────────────────────────────────────────────────────────────────

/// Read-only display projection of an author, joined onto records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub name: String,
    pub initial: String,
}

impl AuthorSummary {
    pub fn for_name(name: &str) -> Self {
        let initial = name
            .trim()
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect::<String>())
            .unwrap_or_default();
        Self {
            name: name.trim().to_string(),
            initial,
        }
    }
}

/// A member's profile as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: MemberId,
    pub name: String,
    pub initial: String,
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit id (for testing)
    pub fn with_id(id: MemberId, name: &str) -> Self {
        let summary = AuthorSummary::for_name(name);
        Self {
            id,
            name: summary.name,
            initial: summary.initial,
        }
    }

    pub fn summary(&self) -> AuthorSummary {
        AuthorSummary {
            name: self.name.clone(),
            initial: self.initial.clone(),
        }
    }
}

/// A circle is the scope every record and presence entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub id: CircleId,
    pub name: String,
    pub invite_code: String,
    pub created_by: MemberId,
    pub created_at: DateTime<Utc>,
}

// ───────────────────────────────────────────────────────────────────
// Records
// ───────────────────────────────────────────────────────────────────

/// Claim state of a request.
///
/// `Claimed` carries the claimer, so "claimed without a claimer" cannot
/// be represented. There is no transition back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RequestState {
    Open,
    Claimed {
        #[serde(rename = "claimed_by")]
        by: MemberId,
    },
}

impl RequestState {
    pub fn is_open(&self) -> bool {
        matches!(self, RequestState::Open)
    }

    pub fn claimed_by(&self) -> Option<MemberId> {
        match self {
            RequestState::Open => None,
            RequestState::Claimed { by } => Some(*by),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    Link,
    Video,
}

/// Type-specific content of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Thought {
        text: String,
    },
    Message {
        text: String,
    },
    Shared {
        kind: ShareKind,
        url: String,
        title: String,
        source: String,
    },
    Request {
        text: String,
        state: RequestState,
    },
}

impl Payload {
    pub fn thought(text: &str) -> Result<Self> {
        Ok(Payload::Thought {
            text: clean_text(text)?,
        })
    }

    pub fn message(text: &str) -> Result<Self> {
        Ok(Payload::Message {
            text: clean_text(text)?,
        })
    }

    /// New requests always start open.
    pub fn request(text: &str) -> Result<Self> {
        Ok(Payload::Request {
            text: clean_text(text)?,
            state: RequestState::Open,
        })
    }

    /// Shared link or video. An empty title falls back to the URL.
    pub fn shared(kind: ShareKind, url: &str, title: &str) -> Result<Self> {
        let url = url.trim();
        let source = source_host(url)?;
        let title = match title.trim() {
            "" => url.to_string(),
            t => t.to_string(),
        };
        Ok(Payload::Shared {
            kind,
            url: url.to_string(),
            title,
            source,
        })
    }

    /// The collection this payload is stored in.
    pub fn collection(&self) -> Collection {
        match self {
            Payload::Thought { .. } => Collection::Thoughts,
            Payload::Message { .. } => Collection::Messages,
            Payload::Shared { .. } => Collection::SharedContent,
            Payload::Request { .. } => Collection::Requests,
        }
    }
}

fn clean_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyncError::InvalidInput("text must not be empty".into()));
    }
    Ok(text.to_string())
}

/// Host of `url` without a leading `www.`.
pub fn source_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| SyncError::InvalidInput(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SyncError::InvalidInput(format!("{url}: missing host")))?;
    Ok(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// A record in one circle, with the author's display fields joined on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub scope_id: CircleId,
    pub author_id: MemberId,
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
    /// Present on anything fetched through a snapshot or re-fetch.
    pub author: Option<AuthorSummary>,
}

impl Record {
    pub fn collection(&self) -> Collection {
        self.payload.collection()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Thought { text } | Payload::Message { text } | Payload::Request { text, .. } => {
                Some(text.as_str())
            }
            Payload::Shared { title, .. } => Some(title.as_str()),
        }
    }

    pub fn request_state(&self) -> Option<RequestState> {
        match &self.payload {
            Payload::Request { state, .. } => Some(*state),
            _ => None,
        }
    }
}

impl Keyed for Record {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// Write request for a new record; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub scope_id: CircleId,
    pub author_id: MemberId,
    pub payload: Payload,
}

// ───────────────────────────────────────────────────────────────────
// Presence
// ───────────────────────────────────────────────────────────────────

/// Awake/asleep status of one member in one circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub id: Uuid,
    pub scope_id: CircleId,
    pub member_id: MemberId,
    pub is_awake: bool,
    /// Set on every asleep→awake transition.
    pub awake_since: Option<DateTime<Utc>>,
    /// Updated on every transition; doubles as the record version.
    pub last_seen: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn asleep(scope_id: CircleId, member_id: MemberId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope_id,
            member_id,
            is_awake: false,
            awake_since: None,
            last_seen: now,
        }
    }

    /// The record after one toggle at `now`.
    pub fn toggled(&self, now: DateTime<Utc>) -> Self {
        let is_awake = !self.is_awake;
        Self {
            is_awake,
            awake_since: if is_awake { Some(now) } else { self.awake_since },
            last_seen: now,
            ..self.clone()
        }
    }

    /// Whether `self` is a newer version than `other`.
    pub fn supersedes(&self, other: &PresenceRecord) -> bool {
        self.last_seen > other.last_seen
    }
}

impl Keyed for PresenceRecord {
    fn key(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_author_initial() {
        assert_eq!(AuthorSummary::for_name("alice").initial, "A");
        assert_eq!(AuthorSummary::for_name("  émile ").initial, "É");
        assert_eq!(AuthorSummary::for_name("").initial, "");
    }

    #[test]
    fn test_default_orders() {
        assert_eq!(Collection::Messages.default_order(), SortOrder::Ascending);
        assert_eq!(Collection::Thoughts.default_order(), SortOrder::Descending);
        assert_eq!(Collection::Requests.default_order(), SortOrder::Descending);
        assert_eq!(Collection::SharedContent.to_string(), "shared_content");
    }

    #[test]
    fn test_text_payloads_trimmed_and_required() {
        assert_eq!(
            Payload::thought("  hello ").unwrap(),
            Payload::Thought { text: "hello".into() }
        );
        assert!(matches!(
            Payload::message("   "),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_request_starts_open() {
        let payload = Payload::request("need a ride").unwrap();
        assert_eq!(payload.collection(), Collection::Requests);
        match payload {
            Payload::Request { state, .. } => assert!(state.is_open()),
            _ => panic!("Wrong payload type"),
        }
    }

    #[test]
    fn test_shared_source_and_title() {
        let payload = Payload::shared(ShareKind::Video, "https://www.youtube.com/watch?v=1", "").unwrap();
        match payload {
            Payload::Shared { source, title, url, .. } => {
                assert_eq!(source, "youtube.com");
                assert_eq!(title, url);
            }
            _ => panic!("Wrong payload type"),
        }

        let payload = Payload::shared(ShareKind::Link, "https://blog.example.org/a", "A post").unwrap();
        match payload {
            Payload::Shared { source, title, .. } => {
                assert_eq!(source, "blog.example.org");
                assert_eq!(title, "A post");
            }
            _ => panic!("Wrong payload type"),
        }

        assert!(Payload::shared(ShareKind::Link, "not a url", "x").is_err());
    }

    #[test]
    fn test_request_state_serialized_shape() {
        let open = serde_json::to_value(RequestState::Open).unwrap();
        assert_eq!(open, serde_json::json!({ "status": "open" }));

        let by = Uuid::new_v4();
        let claimed = serde_json::to_value(RequestState::Claimed { by }).unwrap();
        assert_eq!(
            claimed,
            serde_json::json!({ "status": "claimed", "claimed_by": by.to_string() })
        );
        assert_eq!(RequestState::Claimed { by }.claimed_by(), Some(by));
    }

    #[test]
    fn test_presence_toggle_transitions() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        let t2 = t0 + Duration::seconds(2);
        let t3 = t0 + Duration::seconds(3);

        let asleep = PresenceRecord::asleep(Uuid::new_v4(), Uuid::new_v4(), t0);
        let awake = asleep.toggled(t1);
        assert!(awake.is_awake);
        assert_eq!(awake.awake_since, Some(t1));
        assert_eq!(awake.last_seen, t1);

        let asleep_again = awake.toggled(t2);
        assert!(!asleep_again.is_awake);
        assert_eq!(asleep_again.awake_since, Some(t1));
        assert_eq!(asleep_again.last_seen, t2);

        let awake_again = asleep_again.toggled(t3);
        assert!(awake_again.is_awake);
        assert_eq!(awake_again.awake_since, Some(t3));
        assert_eq!(awake_again.id, asleep.id);
        assert!(awake_again.supersedes(&awake));
        assert!(!awake.supersedes(&awake_again));
    }
}
