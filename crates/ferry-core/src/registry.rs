// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Consumer registry: topic → live consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::consumer::Consumer;
use crate::flow_log::{FlowLog, TracingFlowLog};
use crate::ident::{ConsumerId, TopicId};
use crate::ledger::Ledger;
use crate::reconcile::PassReport;

/// Receives the completion notice when a consumer's topic is torn down.
pub trait TeardownListener: Send + Sync {
    /// Called exactly once per consumer, after its pending pulls were cancelled.
    fn on_complete(&self, consumer: ConsumerId, topic: &TopicId);
}

/// Owns the mapping from topic to its live [`Consumer`].
pub struct ConsumerRegistry {
    ledger: Arc<dyn Ledger>,
    flow_log: Arc<dyn FlowLog>,
    pull_deadline: Option<Duration>,
    next_id: AtomicU64,
    completed: AtomicU64,
    consumers: RwLock<HashMap<TopicId, Arc<Consumer>>>,
}

impl ConsumerRegistry {
    /// Creates an empty registry whose consumers read from `ledger`.
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            flow_log: Arc::new(TracingFlowLog),
            pull_deadline: None,
            next_id: AtomicU64::new(1),
            completed: AtomicU64::new(0),
            consumers: RwLock::new(HashMap::new()),
        }
    }

    /// Flow log handed to consumers created by [`bind`](Self::bind).
    #[must_use]
    pub fn with_flow_log(mut self, flow_log: Arc<dyn FlowLog>) -> Self {
        self.flow_log = flow_log;
        self
    }

    /// Pull deadline handed to consumers created by [`bind`](Self::bind).
    #[must_use]
    pub fn with_pull_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.pull_deadline = deadline;
        self
    }

    /// Consumer for `topic`, creating and attaching one on first use.
    pub fn bind(self: &Arc<Self>, topic: &TopicId) -> Arc<Consumer> {
        if let Some(existing) = self.get(topic) {
            return existing;
        }
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut consumer = Consumer::new(id, topic.clone(), self.ledger.clone())
            .with_flow_log(self.flow_log.clone());
        if let Some(deadline) = self.pull_deadline {
            consumer = consumer.with_pull_deadline(deadline);
        }
        self.attach(consumer)
    }

    /// Second construction phase: subscribe the registry to `consumer`'s
    /// teardown and publish it. If its topic already has a live consumer, that
    /// one is returned and `consumer` is dropped.
    pub fn attach(self: &Arc<Self>, consumer: Consumer) -> Arc<Consumer> {
        let mut consumers = self.write();
        if let Some(existing) = consumers.get(consumer.topic()) {
            return existing.clone();
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener: Weak<dyn TeardownListener> = weak;
        consumer.subscribe_teardown(listener);
        let consumer = Arc::new(consumer);
        consumers.insert(consumer.topic().clone(), consumer.clone());
        info!(consumer = consumer.id().value(), topic = %consumer.topic(), "consumer bound");
        consumer
    }

    /// Live consumer for `topic`, if any.
    pub fn get(&self, topic: &TopicId) -> Option<Arc<Consumer>> {
        self.read().get(topic).cloned()
    }

    /// New data landed on `topic`: trigger a coalescing pass on its consumer.
    pub fn notify_arrival(&self, topic: &TopicId) -> Option<PassReport> {
        self.get(topic).and_then(|c| c.notify())
    }

    /// Topic destroy lifecycle: tear down its consumer. Returns the number of
    /// pulls cancelled (0 when the topic had no consumer).
    pub fn destroy_topic(&self, topic: &TopicId) -> usize {
        // the teardown callback takes the write lock; do not hold it here
        let consumer = self.get(topic);
        consumer.map_or(0, |c| c.teardown())
    }

    /// Tear down every live consumer, cancelling all parked pulls. Returns the
    /// number of pulls cancelled.
    pub fn shutdown(&self) -> usize {
        let consumers: Vec<Arc<Consumer>> = self.read().values().cloned().collect();
        let cancelled = consumers.iter().map(|c| c.teardown()).sum();
        info!(consumers = consumers.len(), cancelled, "registry shut down");
        cancelled
    }

    /// Trigger a pass on every live consumer.
    pub fn sweep_all(&self) -> PassReport {
        let consumers: Vec<Arc<Consumer>> = self.read().values().cloned().collect();
        let mut report = PassReport::default();
        for consumer in consumers {
            if let Some(r) = consumer.notify() {
                report.absorb(r);
            }
        }
        report
    }

    /// Number of live consumers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no consumer is live.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of completion notices received.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Pending pulls summed over every live consumer.
    pub fn pending_total(&self) -> usize {
        self.read().values().map(|c| c.pending_count()).sum()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TopicId, Arc<Consumer>>> {
        self.consumers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TopicId, Arc<Consumer>>> {
        self.consumers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TeardownListener for ConsumerRegistry {
    fn on_complete(&self, consumer: ConsumerId, topic: &TopicId) {
        let mut consumers = self.write();
        if consumers.get(topic).is_some_and(|c| c.id() == consumer) {
            consumers.remove(topic);
        }
        drop(consumers);
        self.completed.fetch_add(1, Ordering::AcqRel);
        debug!(consumer = consumer.value(), %topic, "consumer complete");
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("consumers", &self.len())
            .field("completed", &self.completed())
            .finish_non_exhaustive()
    }
}
