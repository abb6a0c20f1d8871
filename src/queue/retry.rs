use crate::types::PendingUpdate;
use std::collections::VecDeque;

/// Holding area for updates whose last delivery attempt failed.
///
/// Push and pop both work on the front, so the most recently failed update is
/// always the next one sent. A stuck update blocks everything behind it until
/// it goes through; nothing newer can overtake it. Owned by the forwarder
/// worker alone and never shared with producers. Unbounded.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: VecDeque<PendingUpdate>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, update: PendingUpdate) {
        self.entries.push_front(update);
    }

    pub fn pop_front(&mut self) -> Option<PendingUpdate> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
