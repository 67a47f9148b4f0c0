/// Message store seam
///
/// The remote backend (CRUD + realtime) sits behind [`MessageStore`] so the chat feed
/// can page and send without knowing which service answers.
mod memory;

pub use memory::{InMemoryStore, REALTIME_CAPACITY};

use crate::types::{Message, NewMessage, PageCursor};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Common error type for store calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by store: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub conversation_id: Option<String>,
    /// Only messages strictly older than this; `None` asks for the newest page.
    pub before: Option<PageCursor>,
    pub limit: usize,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages matching the query, oldest first.
    async fn fetch_page(&self, query: MessageQuery) -> StoreResult<Vec<Message>>;

    /// Persist a message and publish it to subscribers.
    async fn insert(&self, message: NewMessage) -> StoreResult<Message>;

    /// Realtime feed of inserted messages.
    fn subscribe(&self) -> broadcast::Receiver<Message>;
}
