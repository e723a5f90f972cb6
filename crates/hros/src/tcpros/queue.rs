// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded outbound payload queue with drop-oldest overflow.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// FIFO of payloads waiting to be written to one peer.
///
/// `push` never blocks: when the queue is full the oldest entry is evicted.
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<Arc<[u8]>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue; a zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append `payload`, returning `true` if an older entry was evicted.
    pub fn push(&self, payload: Arc<[u8]>) -> bool {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        items.push_back(payload);
        evicted
    }

    pub fn pop(&self) -> Option<Arc<[u8]>> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
