//! Bounded per-link buffer

use std::collections::VecDeque;

use segnet_core::Record;

/// FIFO of records waiting for the link's window
///
/// Owned by exactly one relay task. A full buffer rejects the arriving
/// record; records already queued keep their place.
#[derive(Debug)]
pub struct LinkBuffer {
    queue: VecDeque<Record>,
    capacity: usize,
}

impl LinkBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Queue `record`, or hand it back if the buffer is full
    pub fn push(&mut self, record: Record) -> Result<(), Record> {
        if self.is_full() {
            return Err(record);
        }
        self.queue.push_back(record);
        Ok(())
    }

    pub fn front(&self) -> Option<&Record> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<Record> {
        self.queue.pop_front()
    }

    /// Remove every queued record, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = Record> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
