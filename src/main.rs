use finchat::chat::{ChatFeed, PaginationTrigger};
use finchat::config::{Config, load_dotenv};
use finchat::store::{InMemoryStore, MessageStore};
use finchat::types::Message;
use std::sync::Arc;
use time::OffsetDateTime;

const DEMO_AUTHOR: &str = "demo-user";

fn seed_history(count: usize, conversation_id: Option<&str>) -> Vec<Message> {
    let start = OffsetDateTime::now_utc() - time::Duration::minutes(count as i64 + 1);
    (0..count)
        .map(|n| Message {
            id: format!("seed-{n:06}"),
            author_id: if n % 3 == 0 { "assistant" } else { DEMO_AUTHOR }.to_string(),
            content: format!("Expense note #{n}"),
            created_at: start + time::Duration::minutes(n as i64),
            conversation_id: conversation_id.map(str::to_string),
        })
        .collect()
}

/// Scroll from the newest message toward the oldest, the way a chat list renders,
/// until the whole history is loaded.
async fn scroll_to_beginning(
    feed: &Arc<ChatFeed>,
    trigger: &PaginationTrigger<ChatFeed>,
) -> anyhow::Result<usize> {
    let mut fetches = 0;
    loop {
        let snapshot = feed.snapshot();
        let mut started = None;
        for item in snapshot.iter().rev() {
            if let Some(task) = trigger.on_item_appear(&snapshot, item) {
                started = Some(task);
                break;
            }
        }

        match started {
            Some(task) => {
                task.await?;
                fetches += 1;
                // Nothing new: either the beginning was reached or the fetch failed.
                if feed.snapshot().len() == snapshot.len() {
                    return Ok(fetches);
                }
            }
            None => return Ok(fetches),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();
    if let Err(err) = dotenv {
        tracing::warn!(error = %err, "ignoring unreadable .env");
    }

    let conversation = config.conversation_id.as_deref();
    let store = Arc::new(
        InMemoryStore::with_messages(seed_history(config.seed_messages, conversation))
            .with_latency(config.store_latency),
    );
    let feed = Arc::new(ChatFeed::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        config.conversation_id.clone(),
        config.page_size,
    ));
    let realtime = feed.follow();

    feed.load_latest().await?;
    let trigger = PaginationTrigger::new(config.page_size, Arc::clone(&feed));
    let fetches = scroll_to_beginning(&feed, &trigger).await?;

    let sent = feed.send(DEMO_AUTHOR, "Coffee 3.80").await?;
    tracing::info!(row = %serde_json::to_string(&sent)?, "sent message");

    let history = feed.snapshot();
    tracing::info!(
        loaded = history.len(),
        stored = store.len(),
        fetches,
        oldest = ?history.oldest().map(|m| m.id.as_str()),
        newest = ?history.newest().map(|m| m.id.as_str()),
        "history loaded"
    );

    realtime.abort();
    Ok(())
}
