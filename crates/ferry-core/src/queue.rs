// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pending-pull queue ("long-polling queue").
//!
//! Producers push into a lock-free inbox. Draining removes the carried-over
//! pulls first, then exactly the inbox entries present when the drain started,
//! so pulls arriving during a pass wait for the next one. Requeued pulls go to
//! the carry list and therefore stay ahead of anything that arrived while they
//! were out. Drain and requeue assume a single drainer; the owning
//! [`Consumer`](crate::Consumer) only calls them under its pass lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam::queue::SegQueue;

use crate::pull::PendingPull;

/// Unbounded multi-producer FIFO of pending pulls.
#[derive(Debug, Default)]
pub struct PullQueue {
    inbox: SegQueue<PendingPull>,
    carry: Mutex<Vec<PendingPull>>,
    carried: AtomicUsize,
}

impl PullQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pull in arrival order.
    pub fn enqueue(&self, pull: PendingPull) {
        self.inbox.push(pull);
    }

    /// Remove every pull present at call time, oldest first.
    pub fn drain(&self) -> Vec<PendingPull> {
        let mut batch = {
            let mut carry = self.carry.lock().unwrap_or_else(PoisonError::into_inner);
            self.carried.store(0, Ordering::Release);
            std::mem::take(&mut *carry)
        };
        let present = self.inbox.len();
        batch.reserve(present);
        for _ in 0..present {
            match self.inbox.pop() {
                Some(pull) => batch.push(pull),
                None => break,
            }
        }
        batch
    }

    /// Put a drained batch back ahead of newer arrivals, preserving its order.
    pub fn requeue(&self, batch: Vec<PendingPull>) {
        if batch.is_empty() {
            return;
        }
        let mut carry = self.carry.lock().unwrap_or_else(PoisonError::into_inner);
        carry.extend(batch);
        self.carried.store(carry.len(), Ordering::Release);
    }

    /// Approximate number of queued pulls. Never blocks.
    pub fn len(&self) -> usize {
        self.carried.load(Ordering::Acquire) + self.inbox.len()
    }

    /// Whether the queue currently looks empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
