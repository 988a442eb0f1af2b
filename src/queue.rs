//! Outbound message buffer used while the connection is not authenticated.

use crate::types::Message;
use std::collections::VecDeque;

/// Bounded FIFO of outbound messages held while the channel is not ready.
///
/// When full, new messages are dropped; already queued ones are kept.
#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<Message>,
    capacity: usize,
    dropped: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends `message`, or drops it and returns `false` when at capacity.
    pub fn enqueue(&mut self, message: Message) -> bool {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.items.push_back(message);
        true
    }

    /// Takes every queued message in insertion order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.items).into()
    }

    /// Puts unsent messages back at the front, ahead of anything queued since.
    pub fn requeue_front(&mut self, messages: Vec<Message>) {
        for message in messages.into_iter().rev() {
            if self.items.len() >= self.capacity {
                self.items.pop_back();
                self.dropped += 1;
            }
            self.items.push_front(message);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages rejected because the queue was full, over its lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
