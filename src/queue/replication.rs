use crate::types::PendingUpdate;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Log an overflow warning on the first eviction and then every this many.
const EVICTION_LOG_EVERY: u64 = 1_000;

/// Bounded multi-producer, single-consumer FIFO with drop-oldest overflow.
///
/// Backed by a lock-free `ArrayQueue`. `offer` never waits: when the queue is
/// full the oldest entry is evicted to make room. `take` suspends the consumer
/// until an entry is available.
pub struct ReplicationQueue {
    label: String,
    entries: ArrayQueue<PendingUpdate>,
    available: Notify,
    offered: AtomicU64,
    evicted: AtomicU64,
}

impl ReplicationQueue {
    /// A capacity of zero is raised to one.
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            entries: ArrayQueue::new(capacity.max(1)),
            available: Notify::new(),
            offered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Admit an update, evicting the oldest entry first if the queue is full.
    ///
    /// Returns the evicted entry, if any.
    pub fn offer(&self, update: PendingUpdate) -> Option<PendingUpdate> {
        let evicted = self.entries.force_push(update);

        self.offered.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();

        if let Some(ref dropped) = evicted {
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % EVICTION_LOG_EVERY == 0 {
                tracing::warn!(
                    link = %self.label,
                    capacity = self.capacity(),
                    evicted_total = total,
                    container = dropped.container_name(),
                    "[WAN {}] replication queue full, dropping oldest update",
                    self.label
                );
            }
        }

        evicted
    }

    /// Remove and return the oldest entry, waiting until one is available.
    ///
    /// Cancel safe: if the returned future is dropped no entry is lost.
    pub async fn take(&self) -> PendingUpdate {
        loop {
            let notified = self.available.notified();
            if let Some(update) = self.try_take() {
                return update;
            }
            notified.await;
        }
    }

    pub fn try_take(&self) -> Option<PendingUpdate> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Total number of updates ever admitted.
    pub fn offered(&self) -> u64 {
        self.offered.load(Ordering::Relaxed)
    }

    /// Total number of updates dropped by overflow.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
