// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-topic consumer: commit cursor, pending pulls, teardown.
//!
//! A [`Consumer`] is built without side effects and only becomes reachable
//! from a topic's lifecycle once a registry subscribes to its teardown (see
//! [`ConsumerRegistry::attach`](crate::ConsumerRegistry::attach)). The
//! reconciliation pass itself lives in [`crate::reconcile`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use ferry_proto::{PullResponse, StatusCode};
use tracing::{debug, info, warn};

use crate::context::{ActionType, RequestContext};
use crate::flow_log::{FlowLog, FlowRecord, TracingFlowLog};
use crate::ident::{ConsumerId, TopicId};
use crate::ledger::Ledger;
use crate::pull::{PendingPull, PullOutcome};
use crate::queue::PullQueue;
use crate::reconcile::Evaluation;
use crate::registry::TeardownListener;
use crate::reply::ReplyChannel;

/// Offset a fresh consumer's cursor starts at.
pub const INITIAL_CURSOR: i64 = 1;

/// How a pull was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Answered immediately with the given status.
    Answered(StatusCode),
    /// Parked in the pending-pull queue.
    Parked,
}

/// One consumer bound to one topic.
pub struct Consumer {
    pub(crate) id: ConsumerId,
    pub(crate) topic: TopicId,
    consume_offset: AtomicI64,
    pub(crate) queue: PullQueue,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) flow_log: Arc<dyn FlowLog>,
    pull_deadline: Option<Duration>,
    pass: Mutex<()>,
    pub(crate) dirty: AtomicBool,
    closed: AtomicBool,
    torn_down: AtomicBool,
    listener: OnceLock<Weak<dyn TeardownListener>>,
}

impl Consumer {
    /// Creates a consumer for `topic` reading from `ledger`.
    pub fn new(id: ConsumerId, topic: TopicId, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            id,
            topic,
            consume_offset: AtomicI64::new(INITIAL_CURSOR),
            queue: PullQueue::new(),
            ledger,
            flow_log: Arc::new(TracingFlowLog),
            pull_deadline: None,
            pass: Mutex::new(()),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            listener: OnceLock::new(),
        }
    }

    /// Route flow records to `flow_log`.
    #[must_use]
    pub fn with_flow_log(mut self, flow_log: Arc<dyn FlowLog>) -> Self {
        self.flow_log = flow_log;
        self
    }

    /// Give every parked pull without its own deadline this much time.
    #[must_use]
    pub fn with_pull_deadline(mut self, deadline: Duration) -> Self {
        self.pull_deadline = Some(deadline);
        self
    }

    /// Start the cursor somewhere other than [`INITIAL_CURSOR`].
    #[must_use]
    pub fn with_cursor(self, offset: i64) -> Self {
        self.consume_offset.store(offset, Ordering::Relaxed);
        self
    }

    /// Consumer identity.
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Topic this consumer reads.
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Current commit cursor: the offset cursor-relative pulls are served from.
    pub fn commit_cursor(&self) -> i64 {
        self.consume_offset.load(Ordering::Acquire)
    }

    /// Move the cursor forward to `offset`. Never moves it backwards; returns
    /// the cursor value after the call.
    pub fn advance_cursor(&self, offset: i64) -> i64 {
        let prev = self.consume_offset.fetch_max(offset, Ordering::AcqRel);
        prev.max(offset)
    }

    /// Approximate number of parked pulls.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether the backing topic has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe `listener` to this consumer's teardown. Only the first
    /// subscription sticks; returns whether this one did.
    pub fn subscribe_teardown(&self, listener: Weak<dyn TeardownListener>) -> bool {
        self.listener.set(listener).is_ok()
    }

    /// Handle an inbound pull: answer it now if the ledger allows, otherwise
    /// park it until a pass can satisfy it.
    pub fn pull(
        &self,
        context: RequestContext,
        reply: impl ReplyChannel + 'static,
        need_offset: i64,
    ) -> Admission {
        let pull = PendingPull::new(context, reply, need_offset);
        if self.is_closed() {
            return self.cancel(pull);
        }
        match self.evaluate(&pull) {
            Evaluation::Ready(result) => {
                self.serve(pull, result, ActionType::Pull);
                Admission::Answered(StatusCode::Success)
            }
            Evaluation::Failed(error) if !error.is_retryable() => {
                self.fail(pull, error, ActionType::Pull);
                Admission::Answered(StatusCode::ConsumeFailed)
            }
            Evaluation::Failed(error) => {
                self.record(
                    pull.context().clone(),
                    ActionType::Pull,
                    PullOutcome::Failed {
                        error,
                        retryable: true,
                    },
                );
                self.register(pull)
            }
            Evaluation::NotYet => self.register(pull),
        }
    }

    /// Park a pull in the pending-pull queue.
    pub fn register(&self, mut pull: PendingPull) -> Admission {
        if self.is_closed() {
            return self.cancel(pull);
        }
        if let Some(limit) = self.pull_deadline {
            pull.set_default_deadline(pull.context().arrived() + limit);
        }
        self.queue.enqueue(pull);
        // pairs with the fence in `teardown`: either teardown's drain sees
        // this pull or we see `closed`
        fence(Ordering::SeqCst);
        if self.is_closed() {
            self.cancel_resident();
            return Admission::Answered(StatusCode::Cancelled);
        }
        debug!(
            consumer = self.id.value(),
            topic = %self.topic,
            pending = self.queue.len(),
            "parked long pull"
        );
        Admission::Parked
    }

    /// Teardown hook fired by the topic's destroy lifecycle.
    ///
    /// Cancels every parked pull, then notifies the teardown listener. Only
    /// the first call does anything; returns the number of pulls cancelled.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.closed.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let cancelled = self.cancel_resident();
        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.on_complete(self.id, &self.topic);
        }
        info!(
            consumer = self.id.value(),
            topic = %self.topic,
            cancelled,
            "consumer torn down"
        );
        cancelled
    }

    pub(crate) fn lock_pass(&self) -> MutexGuard<'_, ()> {
        self.pass.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn try_lock_pass(&self) -> Option<MutexGuard<'_, ()>> {
        match self.pass.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    fn cancel_resident(&self) -> usize {
        let _guard = self.lock_pass();
        let batch = self.queue.drain();
        let cancelled = batch.len();
        for pull in batch {
            self.cancel(pull);
        }
        cancelled
    }

    fn cancel(&self, pull: PendingPull) -> Admission {
        self.settle(
            pull,
            PullResponse::cancelled(),
            ActionType::LongPullingCancel,
            PullOutcome::Cancelled,
        );
        Admission::Answered(StatusCode::Cancelled)
    }

    /// Answer `pull` and record the merged flow record. A panicking reply
    /// channel is logged; the pull still counts as answered.
    pub(crate) fn settle(
        &self,
        pull: PendingPull,
        response: PullResponse,
        action: ActionType,
        outcome: PullOutcome,
    ) {
        let (context, closed) = pull.answer(response);
        if let Err(panic) = closed {
            warn!(
                consumer = self.id.value(),
                request_id = context.request_id(),
                reason = %panic_message(&*panic),
                "reply channel panicked while answering"
            );
        }
        self.record(context, action, outcome);
    }

    /// Close an abandoned pull's channel and record it.
    pub(crate) fn drop_abandoned(&self, pull: PendingPull, action: ActionType) {
        let (context, closed) = pull.discard();
        if let Err(panic) = closed {
            warn!(
                consumer = self.id.value(),
                request_id = context.request_id(),
                reason = %panic_message(&*panic),
                "reply channel panicked while closing"
            );
        }
        self.record(context, action, PullOutcome::Abandoned);
    }

    /// Hand a record to the flow log. Flow-log failures never reach the caller.
    pub(crate) fn record(&self, context: RequestContext, action: ActionType, outcome: PullOutcome) {
        let record = FlowRecord::new(context, self.id, action, outcome);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.flow_log.record(&record))) {
            warn!(
                consumer = self.id.value(),
                request_id = record.context.request_id(),
                reason = %panic_message(&*panic),
                "flow log panicked; record dropped"
            );
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with a non-string payload".into())
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("cursor", &self.commit_cursor())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flow_log::MemoryFlowLog;
    use crate::ledger::MemoryLedger;
    use crate::reply::OneshotReply;
    use std::time::Instant;

    fn consumer(ledger: &Arc<MemoryLedger>) -> (Consumer, Arc<MemoryFlowLog>) {
        let log = Arc::new(MemoryFlowLog::new());
        let c = Consumer::new(ConsumerId(1), "job".into(), ledger.clone())
            .with_flow_log(log.clone());
        (c, log)
    }

    fn ctx(id: &str) -> RequestContext {
        RequestContext::new(id, "job".into())
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let (c, _) = consumer(&Arc::new(MemoryLedger::new()));
        assert_eq!(c.commit_cursor(), INITIAL_CURSOR);
        assert_eq!(c.advance_cursor(5), 5);
        assert_eq!(c.advance_cursor(3), 5);
        assert_eq!(c.commit_cursor(), 5);
    }

    #[tokio::test]
    async fn pull_is_answered_immediately_when_data_exists() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.append(&"job".into(), "m1");
        let (c, log) = consumer(&ledger);

        let (reply, rx) = OneshotReply::pair();
        assert_eq!(
            c.pull(ctx("r1"), reply, 0),
            Admission::Answered(StatusCode::Success)
        );
        let resp = rx.await.unwrap();
        assert_eq!(resp.request_index, 1);
        assert_eq!(c.pending_count(), 0);
        assert_eq!(log.records()[0].action, ActionType::Pull);
    }

    #[test]
    fn pull_is_parked_when_nothing_is_readable() {
        let (c, log) = consumer(&Arc::new(MemoryLedger::new()));
        let (reply, _rx) = OneshotReply::pair();
        assert_eq!(c.pull(ctx("r1"), reply, 3), Admission::Parked);
        assert_eq!(c.pending_count(), 1);
        assert!(log.records().is_empty());
    }

    #[test]
    fn configured_deadline_is_stamped_on_parked_pulls() {
        let c = Consumer::new(ConsumerId(1), "job".into(), Arc::new(MemoryLedger::new()))
            .with_pull_deadline(Duration::from_secs(5));
        let (reply, _rx) = OneshotReply::pair();
        let context = ctx("r1");
        let arrived = context.arrived();
        c.register(PendingPull::new(context, reply, 0));
        let parked = c.queue.drain();
        assert_eq!(parked[0].deadline(), Some(arrived + Duration::from_secs(5)));
    }

    #[test]
    fn deadline_counts_from_arrival_not_registration() {
        let (c, log) = consumer(&Arc::new(MemoryLedger::new()));
        let c = c.with_pull_deadline(Duration::from_millis(10));
        let (reply, _rx) = OneshotReply::pair();
        let context = ctx("late").received_at(Instant::now() - Duration::from_secs(1));
        assert_eq!(c.pull(context, reply, 0), Admission::Parked);
        assert_eq!(c.reconcile().expired, 1);
        assert_eq!(log.count(|o| *o == PullOutcome::Expired), 1);
    }

    #[test]
    fn explicit_cursor_start_is_used_for_cursor_relative_pulls() {
        let ledger = Arc::new(MemoryLedger::new());
        for body in ["m1", "m2", "m3"] {
            ledger.append(&"job".into(), body);
        }
        let (c, log) = consumer(&ledger);
        let c = c.with_cursor(3);
        let (reply, _rx) = OneshotReply::pair();
        c.pull(ctx("r1"), reply, 0);
        assert!(matches!(
            log.records()[0].outcome,
            PullOutcome::Served {
                request_index: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn pulls_after_teardown_are_cancelled_on_arrival() {
        let (c, log) = consumer(&Arc::new(MemoryLedger::new()));
        c.teardown();
        let (reply, rx) = OneshotReply::pair();
        assert_eq!(
            c.pull(ctx("late"), reply, 0),
            Admission::Answered(StatusCode::Cancelled)
        );
        assert_eq!(rx.await.unwrap().code, StatusCode::Cancelled);
        assert_eq!(c.pending_count(), 0);
        assert_eq!(log.count(|o| *o == PullOutcome::Cancelled), 1);
    }
}
