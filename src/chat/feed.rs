use crate::chat::list::MessageList;
use crate::chat::pagination::FetchOlder;
use crate::store::{MessageQuery, MessageStore, StoreError};
use crate::types::{LOCAL_ID_PREFIX, Message, NewMessage};
use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

static LOCAL_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// One conversation's loaded history, backed by a [`MessageStore`].
///
/// The feed is the owner that a [`PaginationTrigger`](crate::chat::PaginationTrigger)
/// calls back into: its [`FetchOlder`] impl loads the page before the oldest loaded
/// message.
pub struct ChatFeed {
    store: Arc<dyn MessageStore>,
    conversation_id: Option<String>,
    page_size: NonZeroUsize,
    messages: RwLock<MessageList>,
    exhausted: AtomicBool,
}

impl ChatFeed {
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversation_id: Option<String>,
        page_size: NonZeroUsize,
    ) -> Self {
        Self {
            store,
            conversation_id,
            page_size,
            messages: RwLock::new(MessageList::new()),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn page_size(&self) -> NonZeroUsize {
        self.page_size
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Whether the store may still hold messages older than the loaded ones.
    pub fn has_more(&self) -> bool {
        !self.exhausted.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MessageList {
        self.read().clone()
    }

    /// Replace the loaded history with the newest page.
    pub async fn load_latest(&self) -> FeedResult<usize> {
        let page = self
            .store
            .fetch_page(MessageQuery {
                conversation_id: self.conversation_id.clone(),
                before: None,
                limit: self.page_size.get(),
            })
            .await?;

        let loaded = page.len();
        self.exhausted
            .store(loaded < self.page_size.get(), Ordering::Release);
        *self.write() = MessageList::from_messages(page);
        tracing::info!(loaded, conversation = ?self.conversation_id, "loaded latest messages");
        Ok(loaded)
    }

    /// Load the page before the oldest loaded message. Returns how many were added.
    pub async fn load_older(&self) -> FeedResult<usize> {
        if !self.has_more() {
            tracing::debug!("no older messages left");
            return Ok(0);
        }

        let before = self.read().cursor();
        let page = self
            .store
            .fetch_page(MessageQuery {
                conversation_id: self.conversation_id.clone(),
                before,
                limit: self.page_size.get(),
            })
            .await?;

        if page.len() < self.page_size.get() {
            self.exhausted.store(true, Ordering::Release);
        }
        let added = self.write().extend_older(page);
        tracing::debug!(added, has_more = self.has_more(), "loaded older messages");
        Ok(added)
    }

    /// Send a message, showing it immediately and swapping in the stored row when confirmed.
    pub async fn send(&self, author_id: &str, content: &str) -> FeedResult<Message> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(FeedError::EmptyMessage);
        }

        let local_id = format!(
            "{LOCAL_ID_PREFIX}{}",
            LOCAL_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let created_at = {
            let now = OffsetDateTime::now_utc();
            match self.read().newest() {
                Some(newest) if newest.created_at > now => newest.created_at,
                _ => now,
            }
        };
        self.write().insert(Message {
            id: local_id.clone(),
            author_id: author_id.to_string(),
            content: trimmed.to_string(),
            created_at,
            conversation_id: self.conversation_id.clone(),
        });

        let result = self
            .store
            .insert(NewMessage {
                author_id: author_id.to_string(),
                content: trimmed.to_string(),
                conversation_id: self.conversation_id.clone(),
            })
            .await;

        match result {
            Ok(stored) => {
                self.write().replace(&local_id, stored.clone());
                Ok(stored)
            }
            Err(err) => {
                self.write().remove(&local_id);
                tracing::warn!(error = %err, "send failed, dropped optimistic message");
                Err(err.into())
            }
        }
    }

    /// Apply a realtime message. Returns `true` if the loaded list changed.
    pub fn apply_incoming(&self, message: Message) -> bool {
        if !message.belongs_to(self.conversation_id.as_deref()) {
            return false;
        }
        self.write().insert(message)
    }

    /// Follow the store's realtime feed until it closes.
    pub fn follow(self: &Arc<Self>) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        let mut incoming = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(message) => {
                        feed.apply_incoming(message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "realtime feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("realtime feed closed");
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, MessageList> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MessageList> {
        self.messages.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FetchOlder for ChatFeed {
    async fn fetch_older(&self, reference: Message) -> anyhow::Result<()> {
        tracing::trace!(reference = %reference.id, "older page requested");
        self.load_older().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, REALTIME_CAPACITY};
    use std::time::Duration;
    use time::macros::datetime;

    fn seeded(count: i64) -> Vec<Message> {
        (0..count)
            .map(|n| Message {
                id: format!("seed-{n:04}"),
                author_id: "user-1".to_string(),
                content: format!("seed {n}"),
                created_at: datetime!(2024-05-01 09:00 UTC) + time::Duration::minutes(n),
                conversation_id: None,
            })
            .collect()
    }

    fn feed(store: &Arc<InMemoryStore>, page_size: usize) -> ChatFeed {
        ChatFeed::new(
            Arc::clone(store) as Arc<dyn MessageStore>,
            None,
            NonZeroUsize::new(page_size).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_load_latest_then_older_until_exhausted() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(25)));
        let feed = feed(&store, 10);

        assert_eq!(feed.load_latest().await.unwrap(), 10);
        assert!(feed.has_more());
        assert_eq!(feed.snapshot().oldest().unwrap().id, "seed-0015");

        assert_eq!(feed.load_older().await.unwrap(), 10);
        assert!(feed.has_more());
        assert_eq!(feed.load_older().await.unwrap(), 5);
        assert!(!feed.has_more());

        // An armed failure stays armed: the exhausted feed never queried the store.
        store.fail_next_fetch(StoreError::Unavailable("offline".to_string()));
        assert_eq!(feed.load_older().await.unwrap(), 0);
        let reference = feed.snapshot().oldest().unwrap().clone();
        feed.fetch_older(reference).await.unwrap();
        let armed = store
            .fetch_page(MessageQuery {
                conversation_id: None,
                before: None,
                limit: 1,
            })
            .await;
        assert!(armed.is_err());

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.len(), 25);
        assert_eq!(snapshot.oldest().unwrap().id, "seed-0000");
        assert_eq!(snapshot.newest().unwrap().id, "seed-0024");
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_from_fetch_older() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(25)));
        let feed = feed(&store, 10);
        feed.load_latest().await.unwrap();

        store.fail_next_fetch(StoreError::Unavailable("offline".to_string()));
        let reference = feed.snapshot().oldest().unwrap().clone();
        assert!(feed.fetch_older(reference.clone()).await.is_err());
        assert_eq!(feed.snapshot().len(), 10);
        assert!(feed.has_more());

        feed.fetch_older(reference).await.unwrap();
        assert_eq!(feed.snapshot().len(), 20);
    }

    #[tokio::test]
    async fn test_send_confirms_optimistic_message() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(3)));
        let feed = feed(&store, 10);
        feed.load_latest().await.unwrap();

        let stored = feed.send("user-2", "  Groceries: 42.10  ").await.unwrap();
        assert_eq!(stored.content, "Groceries: 42.10");

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.newest().unwrap().id, stored.id);
        assert!(snapshot.iter().all(|m| !m.is_local()));
    }

    #[tokio::test]
    async fn test_send_rolls_back_on_store_failure() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(3)));
        let feed = feed(&store, 10);
        feed.load_latest().await.unwrap();

        store.fail_next_insert(StoreError::Unavailable("offline".to_string()));
        let err = feed.send("user-2", "Coffee").await.unwrap_err();
        assert!(matches!(err, FeedError::Store(StoreError::Unavailable(_))));
        assert_eq!(feed.snapshot().len(), 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_send_rejects_blank() {
        let store = Arc::new(InMemoryStore::new());
        let feed = feed(&store, 10);
        assert!(matches!(
            feed.send("user-2", " \n ").await,
            Err(FeedError::EmptyMessage)
        ));
        assert!(feed.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_apply_incoming_filters_and_dedups() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(5)));
        let feed = feed(&store, 3);
        feed.load_latest().await.unwrap();

        let mut newer = seeded(6).pop().unwrap();
        newer.id = "seed-0099".to_string();
        newer.created_at += time::Duration::hours(1);
        assert!(feed.apply_incoming(newer.clone()));
        assert!(!feed.apply_incoming(newer.clone()));

        let mut other = newer.clone();
        other.id = "elsewhere".to_string();
        other.conversation_id = Some("savings".to_string());
        assert!(!feed.apply_incoming(other));

        // Older than anything loaded: pagination will bring it in.
        assert!(!feed.apply_incoming(seeded(1).remove(0)));
        assert_eq!(feed.snapshot().len(), 4);
    }

    #[tokio::test]
    async fn test_follow_survives_lag_and_keeps_applying() {
        let store = Arc::new(InMemoryStore::with_messages(seeded(5)));
        let feed = Arc::new(feed(&store, 5));
        feed.load_latest().await.unwrap();
        let follower = feed.follow();

        // The follower has not been polled yet, so its receiver overflows.
        let burst = REALTIME_CAPACITY + 20;
        let mut first = None;
        for n in 0..burst {
            let stored = store
                .insert(NewMessage {
                    author_id: "bank-sync".to_string(),
                    content: format!("Imported transaction {n}"),
                    conversation_id: None,
                })
                .await
                .unwrap();
            first.get_or_insert(stored.id);
        }

        let last = store
            .insert(NewMessage {
                author_id: "user-1".to_string(),
                content: "All caught up?".to_string(),
                conversation_id: None,
            })
            .await
            .unwrap();

        let mut attempts = 0;
        while !feed.snapshot().contains(&last.id) && attempts < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert!(!follower.is_finished());

        let snapshot = feed.snapshot();
        assert!(snapshot.contains(&last.id));
        assert!(!snapshot.contains(&first.unwrap()));
        assert_eq!(snapshot.len(), 5 + REALTIME_CAPACITY);

        let after = store
            .insert(NewMessage {
                author_id: "assistant".to_string(),
                content: "Yes, 276 new rows.".to_string(),
                conversation_id: None,
            })
            .await
            .unwrap();
        let mut attempts = 0;
        while !feed.snapshot().contains(&after.id) && attempts < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert_eq!(feed.snapshot().newest().unwrap().id, after.id);
        follower.abort();
    }
}
