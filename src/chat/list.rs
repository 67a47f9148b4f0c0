use crate::types::{Message, PageCursor};

/// Loaded messages, oldest first, in a single total order by `(created_at, id)`.
///
/// Pagination only ever grows the list at the older end via [`MessageList::extend_older`].
/// Realtime and optimistic messages go through [`MessageList::insert`], which refuses
/// anything older than the current oldest message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageList {
    messages: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from messages in any order, dropping repeated ids.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut messages: Vec<Message> = messages.into_iter().collect();
        messages.sort_by_key(Message::cursor);
        let mut list = Self::new();
        for msg in messages {
            if !list.contains(&msg.id) {
                list.messages.push(msg);
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Cursor of the oldest loaded message; the next page continues before it.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.oldest().map(Message::cursor)
    }

    /// Message at `index`, counted from the oldest.
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Message at `index`, counted from the newest (the order a chat renders in).
    pub fn get_from_newest(&self, index: usize) -> Option<&Message> {
        let len = self.messages.len();
        if index >= len {
            return None;
        }
        self.messages.get(len - 1 - index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// How many messages sit between `id` and the oldest message.
    pub fn distance_from_oldest(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Prepend a page of older messages.
    ///
    /// Only messages strictly older than the current oldest message and not already
    /// loaded are kept. Returns the number of messages added.
    pub fn extend_older(&mut self, batch: impl IntoIterator<Item = Message>) -> usize {
        let boundary = self.cursor();
        let mut older: Vec<Message> = batch
            .into_iter()
            .filter(|m| boundary.as_ref().is_none_or(|b| m.cursor() < *b))
            .collect();
        older.sort_by_key(Message::cursor);
        older.dedup_by(|a, b| a.id == b.id);
        older.retain(|m| !self.contains(&m.id));

        let added = older.len();
        if added > 0 {
            older.append(&mut self.messages);
            self.messages = older;
        }
        added
    }

    /// Insert a message in order, replacing any entry with the same id.
    ///
    /// Messages older than the oldest loaded one are ignored; they arrive through
    /// pagination instead. Returns `true` when the list changed.
    pub fn insert(&mut self, message: Message) -> bool {
        let existing = self.messages.iter().position(|m| m.id == message.id);
        if let Some(idx) = existing
            && self.messages[idx] == message
        {
            return false;
        }

        // Checked before touching the existing entry so a rejected update keeps it.
        if let Some(oldest) = self.oldest()
            && message.cursor() < oldest.cursor()
        {
            return false;
        }

        if let Some(idx) = existing {
            self.messages.remove(idx);
        }

        let key = message.cursor();
        let idx = self.messages.partition_point(|m| m.cursor() <= key);
        self.messages.insert(idx, message);
        true
    }

    /// Swap `old_id` for `message`, e.g. an optimistic message for its confirmed row.
    pub fn replace(&mut self, old_id: &str, message: Message) -> bool {
        let removed = self.remove(old_id).is_some();
        self.insert(message) || removed
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(idx))
    }
}
