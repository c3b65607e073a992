// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reconciliation pass: match parked pulls against the ledger frontier.
//!
//! # Pass shape
//!
//! 1. Take the consumer's pass lock (one pass per consumer at a time).
//! 2. Drain the pending-pull queue into a private batch.
//! 3. For each pull, oldest first, resolve its target offset (explicit offset,
//!    or the commit cursor for cursor-relative pulls), check the frontier, and
//!    read. Served pulls are answered and recorded; pulls with nothing to read
//!    are deferred, or answered with a timeout once their deadline passed.
//! 4. Put the deferred pulls back, ahead of pulls that arrived meanwhile.
//!
//! Each pull gets one attempt per pass. Failures stay local to the pull that
//! hit them: retryable ledger errors defer it, anything else answers it with
//! [`StatusCode::ConsumeFailed`]. Panics are caught at every call out of
//! the engine (ledger, reply channel, flow log), so a pass never fails and
//! never loses the rest of its batch.
//!
//! # Triggering
//!
//! [`Consumer::answer_long_pulling`] waits for the lock. [`Consumer::notify`]
//! never waits: if a pass is already running it marks the consumer dirty and
//! returns, and whoever holds the lock runs another pass before releasing it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Instant;

use bytes::Bytes;
use ferry_proto::{PullResponse, StatusCode};
use tracing::{debug, instrument, warn};

use crate::consumer::{panic_message, Consumer};
use crate::context::ActionType;
use crate::ledger::{ConsumeResult, LedgerError};
use crate::pull::{PendingPull, PullOutcome};

/// Result of checking one pull against the ledger.
#[derive(Debug)]
pub(crate) enum Evaluation {
    /// The target offset was read.
    Ready(ConsumeResult),
    /// The frontier has not reached the target yet.
    NotYet,
    /// The ledger failed.
    Failed(LedgerError),
}

/// Tally of one or more passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Passes folded into this report.
    pub passes: usize,
    /// Pulls taken from the queue.
    pub drained: usize,
    /// Pulls answered with a message.
    pub satisfied: usize,
    /// Pulls put back with nothing to read.
    pub deferred: usize,
    /// Pulls put back after a retryable ledger failure.
    pub retried: usize,
    /// Pulls answered with [`StatusCode::ConsumeFailed`].
    pub failed: usize,
    /// Pulls answered with [`StatusCode::Timeout`].
    pub expired: usize,
    /// Pulls dropped because the client had gone.
    pub abandoned: usize,
}

impl PassReport {
    /// Fold `other` into `self`.
    pub fn absorb(&mut self, other: PassReport) {
        self.passes += other.passes;
        self.drained += other.drained;
        self.satisfied += other.satisfied;
        self.deferred += other.deferred;
        self.retried += other.retried;
        self.failed += other.failed;
        self.expired += other.expired;
        self.abandoned += other.abandoned;
    }

    /// Pulls that went back into the queue.
    pub fn requeued(&self) -> usize {
        self.deferred + self.retried
    }
}

impl Consumer {
    /// Run one reconciliation pass, waiting for any active pass to finish
    /// first. Returns the number of pulls answered with a message.
    pub fn answer_long_pulling(&self) -> usize {
        self.reconcile().satisfied
    }

    /// Like [`answer_long_pulling`](Self::answer_long_pulling) but returns the
    /// full report. Triggers that coalesced into this call are included.
    pub fn reconcile(&self) -> PassReport {
        let mut report = {
            let _guard = self.lock_pass();
            self.dirty.store(false, Ordering::Release);
            let mut report = self.run_pass(Instant::now());
            self.drain_dirty(&mut report);
            report
        };
        if self.dirty.load(Ordering::Acquire) {
            if let Some(more) = self.notify() {
                report.absorb(more);
            }
        }
        report
    }

    /// Request a pass without waiting behind an active one.
    ///
    /// Returns `None` when another caller holds the pass lock; that caller
    /// will run the requested pass before it lets go.
    pub fn notify(&self) -> Option<PassReport> {
        self.dirty.store(true, Ordering::Release);
        let mut total: Option<PassReport> = None;
        loop {
            let Some(guard) = self.try_lock_pass() else {
                return total;
            };
            self.drain_dirty(total.get_or_insert_with(PassReport::default));
            drop(guard);
            // a trigger may have landed between the last swap and the unlock
            if !self.dirty.load(Ordering::Acquire) {
                return total;
            }
        }
    }

    fn drain_dirty(&self, report: &mut PassReport) {
        while self.dirty.swap(false, Ordering::AcqRel) {
            report.absorb(self.run_pass(Instant::now()));
        }
    }

    /// One pass over the queue. Caller must hold the pass lock.
    #[instrument(level = "debug", skip(self), fields(consumer = self.id.value(), topic = %self.topic))]
    fn run_pass(&self, now: Instant) -> PassReport {
        let batch = self.queue.drain();
        let mut report = PassReport {
            passes: 1,
            drained: batch.len(),
            ..PassReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let mut deferred = Vec::new();
        for pull in batch {
            if pull.is_abandoned() {
                self.drop_abandoned(pull, ActionType::LongPullingAnswer);
                report.abandoned += 1;
                continue;
            }
            match self.evaluate(&pull) {
                Evaluation::Ready(result) => {
                    self.serve(pull, result, ActionType::LongPullingAnswer);
                    report.satisfied += 1;
                }
                Evaluation::Failed(error) if !error.is_retryable() => {
                    warn!(request_id = pull.context().request_id(), %error, "long pull failed");
                    self.fail(pull, error, ActionType::LongPullingAnswer);
                    report.failed += 1;
                }
                _ if pull.is_expired(now) => {
                    self.expire(pull);
                    report.expired += 1;
                }
                Evaluation::Failed(error) => {
                    warn!(request_id = pull.context().request_id(), %error, "long pull deferred after ledger failure");
                    self.record(
                        pull.context().clone(),
                        ActionType::LongPullingAnswer,
                        PullOutcome::Failed {
                            error,
                            retryable: true,
                        },
                    );
                    deferred.push(pull);
                    report.retried += 1;
                }
                Evaluation::NotYet => {
                    deferred.push(pull);
                    report.deferred += 1;
                }
            }
        }

        self.queue.requeue(deferred);
        debug!(
            drained = report.drained,
            satisfied = report.satisfied,
            requeued = report.requeued(),
            "reconciliation pass finished"
        );
        report
    }

    /// Resolve the target offset of `pull` and try to read it.
    ///
    /// The availability check and the read are separate ledger calls. A read
    /// that comes back `NotFound` after a positive check counts as "not yet";
    /// a panic inside the ledger counts as a non-retryable fault.
    pub(crate) fn evaluate(&self, pull: &PendingPull) -> Evaluation {
        let target = if pull.is_cursor_relative() {
            self.commit_cursor()
        } else {
            pull.need_offset()
        };
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            match self.ledger.is_available(&self.topic, target) {
                Ok(false) => Evaluation::NotYet,
                Ok(true) => match self.ledger.read(&self.topic, target) {
                    Ok(result) => Evaluation::Ready(result),
                    Err(LedgerError::NotFound { .. }) => Evaluation::NotYet,
                    Err(error) => Evaluation::Failed(error),
                },
                Err(LedgerError::NotFound { .. }) => Evaluation::NotYet,
                Err(error) => Evaluation::Failed(error),
            }
        }));
        attempt.unwrap_or_else(|panic| {
            Evaluation::Failed(LedgerError::Fault(panic_message(&*panic)))
        })
    }

    pub(crate) fn serve(&self, pull: PendingPull, result: ConsumeResult, action: ActionType) {
        let data_size = result.payload.as_ref().map_or(0, Bytes::len);
        let outcome = PullOutcome::Served {
            request_index: result.request_index,
            logic_index_total: result.logic_index_total,
            data_size,
        };
        let response = PullResponse::success(
            result.payload,
            result.request_index,
            result.logic_index_total,
        );
        self.settle(pull, response, action, outcome);
    }

    pub(crate) fn fail(&self, pull: PendingPull, error: LedgerError, action: ActionType) {
        let response = PullResponse::terminal(StatusCode::ConsumeFailed, error.to_string());
        self.settle(
            pull,
            response,
            action,
            PullOutcome::Failed {
                error,
                retryable: false,
            },
        );
    }

    fn expire(&self, pull: PendingPull) {
        self.settle(
            pull,
            PullResponse::timeout(),
            ActionType::LongPullingAnswer,
            PullOutcome::Expired,
        );
    }

}
