// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pending pulls and their outcomes.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use ferry_proto::{PullResponse, StatusCode};

use crate::context::RequestContext;
use crate::ledger::LedgerError;
use crate::reply::ReplyChannel;

/// A blocked client request waiting for a message.
///
/// Answering consumes the pull, so its reply channel can only ever be
/// completed once.
pub struct PendingPull {
    context: RequestContext,
    reply: Box<dyn ReplyChannel>,
    need_offset: i64,
    deadline: Option<Instant>,
}

impl PendingPull {
    /// Creates a pull for `need_offset` (positive: explicit offset;
    /// zero or negative: serve from the consumer's commit cursor).
    pub fn new(
        context: RequestContext,
        reply: impl ReplyChannel + 'static,
        need_offset: i64,
    ) -> Self {
        Self {
            context,
            reply: Box::new(reply),
            need_offset,
            deadline: None,
        }
    }

    /// Answer with a timeout once `deadline` has passed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Request context.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Requested offset as sent by the client.
    pub fn need_offset(&self) -> i64 {
        self.need_offset
    }

    /// True when the pull follows the consumer's cursor.
    pub fn is_cursor_relative(&self) -> bool {
        self.need_offset <= 0
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Whether the client has gone away. A channel that panics while being
    /// asked counts as gone.
    pub fn is_abandoned(&self) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.reply.is_abandoned())).unwrap_or(true)
    }

    pub(crate) fn set_default_deadline(&mut self, deadline: Instant) {
        self.deadline.get_or_insert(deadline);
    }

    /// Deliver `response`, close the channel, and hand back the context.
    /// A panic inside the channel is caught and returned next to it.
    pub(crate) fn answer(self, response: PullResponse) -> (RequestContext, thread::Result<()>) {
        let Self {
            context, mut reply, ..
        } = self;
        let closed = catch_unwind(AssertUnwindSafe(move || {
            reply.deliver(response);
            reply.complete();
        }));
        (context, closed)
    }

    /// Close the channel without an answer (client already gone).
    pub(crate) fn discard(self) -> (RequestContext, thread::Result<()>) {
        let Self {
            context, mut reply, ..
        } = self;
        let closed = catch_unwind(AssertUnwindSafe(move || reply.complete()));
        (context, closed)
    }
}

impl fmt::Debug for PendingPull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPull")
            .field("request_id", &self.context.request_id())
            .field("need_offset", &self.need_offset)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// What happened to a pull during one handling step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// A message was delivered.
    Served {
        /// Offset served.
        request_index: i64,
        /// Ledger total at serve time.
        logic_index_total: i64,
        /// Payload size in bytes.
        data_size: usize,
    },
    /// The ledger failed. Retryable failures keep the pull queued; the rest
    /// answer it with [`StatusCode::ConsumeFailed`].
    Failed {
        /// The ledger error.
        error: LedgerError,
        /// Whether the pull was kept for another attempt.
        retryable: bool,
    },
    /// The deadline passed; answered with [`StatusCode::Timeout`].
    Expired,
    /// The topic was torn down; answered with [`StatusCode::Cancelled`].
    Cancelled,
    /// The client disconnected before an answer was available.
    Abandoned,
}

impl PullOutcome {
    /// Status code sent to the client, if an answer was sent.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PullOutcome::Served { .. } => Some(StatusCode::Success),
            PullOutcome::Failed {
                retryable: false, ..
            } => Some(StatusCode::ConsumeFailed),
            PullOutcome::Expired => Some(StatusCode::Timeout),
            PullOutcome::Cancelled => Some(StatusCode::Cancelled),
            PullOutcome::Failed {
                retryable: true, ..
            }
            | PullOutcome::Abandoned => None,
        }
    }
}
