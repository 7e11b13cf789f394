//! Unbounded FIFO queue with a cancellable async take

use crate::error::{WatchtowerError, WatchtowerResult};
use crate::metrics;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct SwapQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> SwapQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, item: T) {
        let depth = {
            let mut items = self.items();
            items.push_back(item);
            items.len()
        };
        metrics::set_queue_depth(self.name, depth);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        let (item, depth) = {
            let mut items = self.items();
            (items.pop_front(), items.len())
        };
        metrics::set_queue_depth(self.name, depth);
        item
    }

    /// Inspect the head without removing it
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items().front().map(f)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Wait for the next item; `Cancelled` once the token fires
    pub async fn take(&self, cancel: &CancellationToken) -> WatchtowerResult<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WatchtowerError::Cancelled),
                _ = self.notify.notified() => {}
            }
        }
    }
}
