use super::{MessageQuery, MessageStore, StoreError, StoreResult};
use crate::types::{Message, NewMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Messages a realtime subscriber may fall behind by before it lags.
pub const REALTIME_CAPACITY: usize = 256;

/// In-process store used by the demo binary and tests.
pub struct InMemoryStore {
    rows: Mutex<Vec<Message>>,
    counter: AtomicU64,
    latency: Duration,
    failures: Mutex<Failures>,
    realtime: broadcast::Sender<Message>,
}

#[derive(Default)]
struct Failures {
    fetch: Option<StoreError>,
    insert: Option<StoreError>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let (realtime, _) = broadcast::channel(REALTIME_CAPACITY);
        Self {
            rows: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
            latency: Duration::ZERO,
            failures: Mutex::new(Failures::default()),
            realtime,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing rows.
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let store = Self::default();
        store.rows().extend(messages);
        store
    }

    /// Delay every call, to make in-flight fetches observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `fetch_page` call fail with `err`.
    pub fn fail_next_fetch(&self, err: StoreError) {
        self.failures().fetch = Some(err);
    }

    /// Make the next `insert` call fail with `err`.
    pub fn fail_next_insert(&self, err: StoreError) {
        self.failures().insert = Some(err);
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<Message>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn fetch_page(&self, query: MessageQuery) -> StoreResult<Vec<Message>> {
        self.simulate_latency().await;
        if let Some(err) = self.failures().fetch.take() {
            return Err(err);
        }

        let mut matching: Vec<Message> = self
            .rows()
            .iter()
            .filter(|m| m.belongs_to(query.conversation_id.as_deref()))
            .filter(|m| query.before.as_ref().is_none_or(|b| m.cursor() < *b))
            .cloned()
            .collect();
        matching.sort_by_key(Message::cursor);

        let skip = matching.len().saturating_sub(query.limit);
        Ok(matching.split_off(skip))
    }

    async fn insert(&self, message: NewMessage) -> StoreResult<Message> {
        self.simulate_latency().await;
        if let Some(err) = self.failures().insert.take() {
            return Err(err);
        }
        if message.content.trim().is_empty() {
            return Err(StoreError::Rejected("content must not be empty".to_string()));
        }

        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let stored = {
            let mut rows = self.rows();
            // Never go backwards, so a new row always sorts after what is already stored.
            let newest = rows.iter().map(|m| m.created_at).max();
            let now = OffsetDateTime::now_utc();
            let created_at = match newest {
                Some(newest) if newest >= now => newest + time::Duration::microseconds(1),
                _ => now,
            };
            let stored = Message {
                id: format!("msg-{id:08}"),
                author_id: message.author_id,
                content: message.content,
                created_at,
                conversation_id: message.conversation_id,
            };
            rows.push(stored.clone());
            stored
        };

        // No subscribers is fine.
        let _ = self.realtime.send(stored.clone());
        Ok(stored)
    }

    fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.realtime.subscribe()
    }
}
