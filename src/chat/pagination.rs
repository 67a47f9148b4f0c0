//! Single-flight pagination for a reverse-chronological message list.
//!
//! As items scroll into view, [`PaginationTrigger::on_item_appear`] checks whether the
//! item sits within one page of the oldest loaded message. If it does and no fetch is
//! already running, the owner's [`FetchOlder`] handler is spawned on the tokio runtime.
//!
//! The in-flight flag is held by a [`FetchGuard`] that lives inside the spawned task, so
//! it is released however the task ends: success, error, panic or abort.

use crate::chat::list::MessageList;
use crate::types::Message;
use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Implemented by whatever owns the message list.
///
/// On success the implementation is expected to have added the older page to its list.
#[async_trait]
pub trait FetchOlder: Send + Sync {
    async fn fetch_older(&self, reference: Message) -> anyhow::Result<()>;
}

pub struct PaginationTrigger<H: ?Sized> {
    page_size: NonZeroUsize,
    handler: Arc<H>,
    in_flight: Arc<AtomicBool>,
    runtime: Option<Handle>,
}

impl<H: ?Sized> Clone for PaginationTrigger<H> {
    fn clone(&self) -> Self {
        Self {
            page_size: self.page_size,
            handler: Arc::clone(&self.handler),
            in_flight: Arc::clone(&self.in_flight),
            runtime: self.runtime.clone(),
        }
    }
}

impl<H> PaginationTrigger<H>
where
    H: FetchOlder + ?Sized + 'static,
{
    /// Fetches run on the runtime entered when the trigger is built.
    ///
    /// Built outside a runtime, the trigger never starts a fetch; use
    /// [`PaginationTrigger::with_runtime`] to hand one in from a UI thread.
    pub fn new(page_size: NonZeroUsize, handler: Arc<H>) -> Self {
        Self {
            page_size,
            handler,
            in_flight: Arc::new(AtomicBool::new(false)),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(page_size: NonZeroUsize, handler: Arc<H>, runtime: Handle) -> Self {
        Self {
            page_size,
            handler,
            in_flight: Arc::new(AtomicBool::new(false)),
            runtime: Some(runtime),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size.get()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether `item` is close enough to the oldest loaded message to ask for more.
    pub fn is_near_oldest(&self, messages: &MessageList, item: &Message) -> bool {
        messages
            .distance_from_oldest(&item.id)
            .is_some_and(|distance| distance < self.page_size.get())
    }

    /// Claim the in-flight flag. Returns `None` while another fetch holds it.
    pub fn try_acquire(&self) -> Option<FetchGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FetchGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    /// Called for every item the list renders.
    ///
    /// Spawns the handler and returns its task handle when a fetch starts, `None` otherwise.
    pub fn on_item_appear(&self, messages: &MessageList, item: &Message) -> Option<JoinHandle<()>> {
        if !self.is_near_oldest(messages, item) {
            return None;
        }

        let Some(runtime) = self.runtime.as_ref() else {
            tracing::warn!(reference = %item.id, "no tokio runtime, older page not requested");
            return None;
        };

        let Some(guard) = self.try_acquire() else {
            tracing::trace!(reference = %item.id, "older page already in flight");
            return None;
        };

        tracing::debug!(
            reference = %item.id,
            loaded = messages.len(),
            page_size = self.page_size.get(),
            "fetching older messages"
        );

        let handler = Arc::clone(&self.handler);
        let reference = item.clone();
        Some(runtime.spawn(async move {
            let _guard = guard;
            let reference_id = reference.id.clone();
            if let Err(err) = handler.fetch_older(reference).await {
                tracing::warn!(reference = %reference_id, error = %err, "fetching older messages failed");
            }
        }))
    }
}

/// Scoped ownership of the "fetch in progress" flag; dropping it clears the flag.
#[derive(Debug)]
pub struct FetchGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
