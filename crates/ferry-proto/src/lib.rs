// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response schema for Ferry pulls.
//!
//! A pull is always answered with exactly one [`PullResponse`]. Successful
//! answers carry the served payload together with the offset metadata the
//! client needs to resume (`request_index`, `logic_index_total`); terminal
//! answers (timeout, cancellation, consume failure) carry an empty payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub mod wire;

/// Outcome code carried by every [`PullResponse`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// A message was served.
    #[serde(rename = "SUCCESS")]
    Success,
    /// The ledger failed in a way that retrying will not fix.
    #[serde(rename = "CONSUME_FAILED")]
    ConsumeFailed,
    /// The pull waited past its deadline without a message arriving.
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// The backing topic was destroyed while the pull was pending.
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl StatusCode {
    /// Numeric code used in flow records and HTTP adapters.
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Success => 0,
            StatusCode::ConsumeFailed => 1,
            StatusCode::Timeout => 2,
            StatusCode::Cancelled => 3,
        }
    }

    /// True for every code except [`StatusCode::Success`].
    pub fn is_terminal_error(self) -> bool {
        !matches!(self, StatusCode::Success)
    }
}

/// Answer delivered to a pull's reply channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullResponse {
    /// Outcome code.
    pub code: StatusCode,
    /// Human readable status message.
    pub message: String,
    /// Served message body; `None` for terminal answers.
    pub payload: Option<Bytes>,
    /// Offset actually served (0 when nothing was served).
    pub request_index: i64,
    /// Ledger's total indexed count at serve time (0 when nothing was served).
    pub logic_index_total: i64,
}

impl PullResponse {
    /// Successful answer carrying a served message.
    pub fn success(payload: Option<Bytes>, request_index: i64, logic_index_total: i64) -> Self {
        Self {
            code: StatusCode::Success,
            message: "success".into(),
            payload,
            request_index,
            logic_index_total,
        }
    }

    /// Terminal answer with no payload.
    pub fn terminal(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payload: None,
            request_index: 0,
            logic_index_total: 0,
        }
    }

    /// Answer for a pull whose topic went away.
    pub fn cancelled() -> Self {
        Self::terminal(StatusCode::Cancelled, "topic destroyed")
    }

    /// Answer for a pull that outlived its deadline.
    pub fn timeout() -> Self {
        Self::terminal(StatusCode::Timeout, "long pull timed out")
    }

    /// Size of the served payload in bytes (0 when absent).
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }
}
