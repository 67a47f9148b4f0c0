/// Chat history for a conversation
///
/// - `list` - ordered, de-duplicated message list
/// - `pagination` - single-flight trigger that asks for older pages while scrolling
/// - `feed` - store-backed owner of a list: paging, optimistic sends, realtime inserts
pub mod feed;
pub mod list;
pub mod pagination;

pub use feed::{ChatFeed, FeedError, FeedResult};
pub use list::MessageList;
pub use pagination::{FetchGuard, FetchOlder, PaginationTrigger};
