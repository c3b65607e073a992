// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ledger port: the append-only, offset-indexed log behind each topic.
//!
//! Offsets are 1-based. A topic whose frontier is `n` holds offsets `1..=n`;
//! a frontier of 0 means nothing has been written yet. The engine only reads
//! through this port; appends and durability belong to the implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use thiserror::Error;

use crate::ident::TopicId;

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeResult {
    /// Message body (opaque).
    pub payload: Option<Bytes>,
    /// Offset actually served.
    pub request_index: i64,
    /// Ledger's total indexed count at serve time.
    pub logic_index_total: i64,
}

/// Ledger failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Offset is past the frontier (not written yet).
    #[error("offset {offset} not yet written on {topic}")]
    NotFound {
        /// Topic that was read.
        topic: TopicId,
        /// Offset that was requested.
        offset: i64,
    },
    /// Storage is temporarily unreachable; retrying later may succeed.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// Record is unreadable; retrying will not help.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// Offset of the bad record.
        offset: i64,
        /// Implementation-specific description.
        reason: String,
    },
    /// Implementation fault (e.g. a panic inside the ledger call).
    #[error("ledger fault: {0}")]
    Fault(String),
}

impl LedgerError {
    /// Whether the failed pull should be kept and retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound { .. } | LedgerError::Unavailable(_)
        )
    }
}

/// Read-side view of the per-topic log.
pub trait Ledger: Send + Sync {
    /// Highest offset currently readable on `topic` (0 when empty or unknown).
    fn frontier(&self, topic: &TopicId) -> Result<i64, LedgerError>;

    /// Whether the frontier has reached `offset`.
    fn is_available(&self, topic: &TopicId, offset: i64) -> Result<bool, LedgerError> {
        Ok(offset >= 1 && self.frontier(topic)? >= offset)
    }

    /// Read the record stored at `offset`.
    fn read(&self, topic: &TopicId, offset: i64) -> Result<ConsumeResult, LedgerError>;
}

/// In-memory ledger used by the broker daemon and tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    topics: RwLock<HashMap<TopicId, Vec<Bytes>>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its offset.
    pub fn append(&self, topic: &TopicId, body: impl Into<Bytes>) -> i64 {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let log = topics.entry(topic.clone()).or_default();
        log.push(body.into());
        offset_of(log.len())
    }

    /// Drop a topic and everything written to it. Returns the number of
    /// messages discarded.
    pub fn remove_topic(&self, topic: &TopicId) -> usize {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic)
            .map_or(0, |log| log.len())
    }
}

fn offset_of(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

impl Ledger for MemoryLedger {
    fn frontier(&self, topic: &TopicId) -> Result<i64, LedgerError> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        Ok(topics.get(topic).map_or(0, |log| offset_of(log.len())))
    }

    fn read(&self, topic: &TopicId, offset: i64) -> Result<ConsumeResult, LedgerError> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let not_found = || LedgerError::NotFound {
            topic: topic.clone(),
            offset,
        };
        let log = topics.get(topic).ok_or_else(not_found)?;
        let slot = offset
            .checked_sub(1)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(not_found)?;
        let body = log.get(slot).ok_or_else(not_found)?;
        Ok(ConsumeResult {
            payload: Some(body.clone()),
            request_index: offset,
            logic_index_total: offset_of(log.len()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_one_based_and_dense() {
        let ledger = MemoryLedger::new();
        let t = TopicId::from("job-7");
        assert_eq!(ledger.frontier(&t).unwrap(), 0);
        assert!(!ledger.is_available(&t, 1).unwrap());

        assert_eq!(ledger.append(&t, "a"), 1);
        assert_eq!(ledger.append(&t, "b"), 2);
        assert!(ledger.is_available(&t, 2).unwrap());
        assert!(!ledger.is_available(&t, 3).unwrap());
        assert!(!ledger.is_available(&t, 0).unwrap());

        let got = ledger.read(&t, 1).unwrap();
        assert_eq!(got.payload.as_deref(), Some(&b"a"[..]));
        assert_eq!(got.request_index, 1);
        assert_eq!(got.logic_index_total, 2);
    }

    #[test]
    fn reads_past_frontier_are_not_found() {
        let ledger = MemoryLedger::new();
        let t = TopicId::from("job-7");
        ledger.append(&t, "a");
        for offset in [0, -3, 2] {
            let err = ledger.read(&t, offset).unwrap_err();
            assert!(matches!(err, LedgerError::NotFound { .. }));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn removing_a_topic_resets_its_frontier() {
        let ledger = MemoryLedger::new();
        let t = TopicId::from("job-7");
        ledger.append(&t, "a");
        ledger.append(&t, "b");
        assert_eq!(ledger.remove_topic(&t), 2);
        assert_eq!(ledger.frontier(&t).unwrap(), 0);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(LedgerError::Unavailable("io".into()).is_retryable());
        assert!(!LedgerError::Corrupt {
            offset: 1,
            reason: "crc".into()
        }
        .is_retryable());
        assert!(!LedgerError::Fault("boom".into()).is_retryable());
    }
}
