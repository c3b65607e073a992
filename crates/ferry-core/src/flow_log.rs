// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flow (audit) logging of settled pulls.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use ferry_proto::StatusCode;
use tracing::{info, warn};

use crate::context::{ActionType, RequestContext};
use crate::ident::{ConsumerId, TopicId};
use crate::pull::PullOutcome;

/// Audit record: the request context merged with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    /// Request context as received.
    pub context: RequestContext,
    /// Consumer that handled the pull.
    pub consumer: ConsumerId,
    /// Path that produced the record.
    pub action: ActionType,
    /// What happened.
    pub outcome: PullOutcome,
    /// Time between arrival and this record.
    pub elapsed: Duration,
}

impl FlowRecord {
    /// Merge a context with its outcome.
    pub fn new(
        context: RequestContext,
        consumer: ConsumerId,
        action: ActionType,
        outcome: PullOutcome,
    ) -> Self {
        let elapsed = context.arrived().elapsed();
        Self {
            context,
            consumer,
            action,
            outcome,
            elapsed,
        }
    }

    /// Topic of the request.
    pub fn topic(&self) -> &TopicId {
        self.context.topic()
    }

    /// Status code sent to the client, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.outcome.status()
    }
}

/// Audit sink. Recording is fire-and-forget: implementations swallow their
/// own failures.
pub trait FlowLog: Send + Sync {
    /// Record one settled (or failed) pull.
    fn record(&self, record: &FlowRecord);
}

/// Emits flow records as `tracing` events on the `flow` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFlowLog;

impl FlowLog for TracingFlowLog {
    fn record(&self, record: &FlowRecord) {
        let ctx = &record.context;
        let elapsed_ms = u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX);
        match &record.outcome {
            PullOutcome::Served {
                request_index,
                logic_index_total,
                data_size,
            } => info!(
                target: "flow",
                action = record.action.alias(),
                request_id = ctx.request_id(),
                topic = %ctx.topic(),
                consumer = record.consumer.value(),
                src = ctx.src_party().unwrap_or("-"),
                des = ctx.des_party().unwrap_or("-"),
                code = StatusCode::Success.code(),
                request_index,
                current_index = logic_index_total,
                data_size,
                elapsed_ms,
            ),
            PullOutcome::Failed { error, retryable } => warn!(
                target: "flow",
                action = record.action.alias(),
                request_id = ctx.request_id(),
                topic = %ctx.topic(),
                consumer = record.consumer.value(),
                retryable,
                %error,
                elapsed_ms,
            ),
            outcome => info!(
                target: "flow",
                action = record.action.alias(),
                request_id = ctx.request_id(),
                topic = %ctx.topic(),
                consumer = record.consumer.value(),
                code = outcome.status().map(StatusCode::code),
                outcome = ?outcome,
                elapsed_ms,
            ),
        }
    }
}

/// Keeps every record in memory; for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryFlowLog {
    records: Mutex<Vec<FlowRecord>>,
}

impl MemoryFlowLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<FlowRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records whose outcome matches `pred`.
    pub fn count(&self, pred: impl Fn(&PullOutcome) -> bool) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| pred(&r.outcome))
            .count()
    }
}

impl FlowLog for MemoryFlowLog {
    fn record(&self, record: &FlowRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
