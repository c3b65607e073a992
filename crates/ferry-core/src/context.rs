// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable request context carried by every pull.
//!
//! The context is built once when the request arrives and never mutated.
//! Whatever happens to the pull is described by a separate
//! [`PullOutcome`](crate::PullOutcome); both are merged into a
//! [`FlowRecord`](crate::FlowRecord) when the pull settles.

use std::time::Instant;

use crate::ident::TopicId;

/// Which path produced a flow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// The pull was answered on arrival, before it was parked.
    Pull,
    /// The pull was answered by a reconciliation pass.
    LongPullingAnswer,
    /// The pull was cancelled by topic teardown.
    LongPullingCancel,
}

impl ActionType {
    /// Short alias used in flow logs.
    pub fn alias(self) -> &'static str {
        match self {
            ActionType::Pull => "pull",
            ActionType::LongPullingAnswer => "long_pulling_answer",
            ActionType::LongPullingCancel => "long_pulling_cancel",
        }
    }
}

/// Tracing and accounting fields of one inbound pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
    topic: TopicId,
    src_party: Option<String>,
    des_party: Option<String>,
    session_id: Option<String>,
    received_at: Instant,
}

impl RequestContext {
    /// Context for a request received now.
    pub fn new(request_id: impl Into<String>, topic: TopicId) -> Self {
        Self {
            request_id: request_id.into(),
            topic,
            src_party: None,
            des_party: None,
            session_id: None,
            received_at: Instant::now(),
        }
    }

    /// Attach the source and destination party ids.
    #[must_use]
    pub fn with_parties(mut self, src: impl Into<String>, des: impl Into<String>) -> Self {
        self.src_party = Some(src.into());
        self.des_party = Some(des.into());
        self
    }

    /// Attach the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Override the arrival timestamp.
    #[must_use]
    pub fn received_at(mut self, at: Instant) -> Self {
        self.received_at = at;
        self
    }

    /// Caller-supplied request id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Topic the request targets.
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Source party id, if known.
    pub fn src_party(&self) -> Option<&str> {
        self.src_party.as_deref()
    }

    /// Destination party id, if known.
    pub fn des_party(&self) -> Option<&str> {
        self.des_party.as_deref()
    }

    /// Session id, if known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// When the request arrived.
    pub fn arrived(&self) -> Instant {
        self.received_at
    }
}
