use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// Single-slot mailbox: `put` overwrites, `get` takes the newest item.
///
/// Writers never wait on the reader, so a burst of targets collapses into
/// the last one.
#[derive(Debug, Default)]
pub struct LatestOnly<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> LatestOnly<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn put(&self, item: T) {
        *self.slot.lock() = Some(item);
        self.notify.notify_one();
    }

    /// Take the item if one is waiting.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Wait up to `timeout` for an item.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.take() {
                return Some(item);
            }
            // A permit left over from an item already taken wakes us early; loop again.
            if time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.take();
            }
        }
    }
}
