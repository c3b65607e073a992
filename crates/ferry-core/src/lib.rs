// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ferry core: long-poll delivery for transfer queues.
//!
//! A client pull either gets answered on arrival or is parked as a
//! [`PendingPull`] in its consumer's [`PullQueue`]. Arrival notifications and
//! the periodic [`Sweeper`] run reconciliation passes
//! ([`Consumer::answer_long_pulling`], [`Consumer::notify`]) that match parked
//! pulls against the [`Ledger`] frontier, answer what they can through each
//! pull's [`ReplyChannel`], and put the rest back.
//!
//! Every pull is answered at most once. Topic teardown answers whatever is
//! still parked with a cancellation and notifies the [`ConsumerRegistry`].

mod consumer;
mod context;
mod flow_log;
mod ident;
mod ledger;
mod pull;
mod queue;
mod reconcile;
mod registry;
mod reply;
mod sweep;

pub use consumer::{Admission, Consumer, INITIAL_CURSOR};
pub use context::{ActionType, RequestContext};
pub use ferry_proto::{PullResponse, StatusCode};
pub use flow_log::{FlowLog, FlowRecord, MemoryFlowLog, TracingFlowLog};
pub use ident::{ConsumerId, TopicId};
pub use ledger::{ConsumeResult, Ledger, LedgerError, MemoryLedger};
pub use pull::{PendingPull, PullOutcome};
pub use queue::PullQueue;
pub use reconcile::PassReport;
pub use registry::{ConsumerRegistry, TeardownListener};
pub use reply::{OneshotReply, ReplyChannel, ReplyReceiver};
pub use sweep::Sweeper;
