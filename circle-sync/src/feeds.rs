//! The circle's record feeds: thoughts, chat and shared links.

use std::ops::Deref;
use std::sync::Arc;

use circle_core::{Collection, Payload, RecordId, Result, ShareKind};

use crate::config::SyncConfig;
use crate::list::ReconciledList;
use crate::remote::RemoteStore;
use crate::session::SessionScope;

async fn open_list(
    store: Arc<dyn RemoteStore>,
    session: SessionScope,
    collection: Collection,
    config: &SyncConfig,
) -> Result<ReconciledList> {
    ReconciledList::open(store, session, collection, collection.default_order(), config).await
}

/// Short status posts, newest first.
pub struct Thoughts(ReconciledList);

impl Thoughts {
    pub async fn open(store: Arc<dyn RemoteStore>, session: SessionScope, config: &SyncConfig) -> Result<Self> {
        open_list(store, session, Collection::Thoughts, config).await.map(Self)
    }

    pub async fn post(&self, text: &str) -> Result<RecordId> {
        self.0.append(Payload::thought(text)?).await
    }
}

impl Deref for Thoughts {
    type Target = ReconciledList;

    fn deref(&self) -> &ReconciledList {
        &self.0
    }
}

/// Circle chat, oldest first.
pub struct Messages(ReconciledList);

impl Messages {
    pub async fn open(store: Arc<dyn RemoteStore>, session: SessionScope, config: &SyncConfig) -> Result<Self> {
        open_list(store, session, Collection::Messages, config).await.map(Self)
    }

    pub async fn send(&self, text: &str) -> Result<RecordId> {
        self.0.append(Payload::message(text)?).await
    }
}

impl Deref for Messages {
    type Target = ReconciledList;

    fn deref(&self) -> &ReconciledList {
        &self.0
    }
}

/// Links and videos, newest first.
pub struct SharedContent(ReconciledList);

impl SharedContent {
    pub async fn open(store: Arc<dyn RemoteStore>, session: SessionScope, config: &SyncConfig) -> Result<Self> {
        open_list(store, session, Collection::SharedContent, config).await.map(Self)
    }

    /// An empty title falls back to the url.
    pub async fn share(&self, kind: ShareKind, url: &str, title: &str) -> Result<RecordId> {
        self.0.append(Payload::shared(kind, url, title)?).await
    }
}

impl Deref for SharedContent {
    type Target = ReconciledList;

    fn deref(&self) -> &ReconciledList {
        &self.0
    }
}
