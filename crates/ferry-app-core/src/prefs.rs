// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broker preferences persisted by Ferry tools.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config key under which [`BrokerPrefs`] are stored.
pub const BROKER_PREFS_KEY: &str = "broker";

/// Saved preferences for the broker daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerPrefs {
    /// HTTP listen address (e.g. `127.0.0.1:9370`).
    pub listen: String,
    /// Milliseconds between periodic reconciliation sweeps.
    pub sweep_interval_ms: u64,
    /// Deadline for a pending pull in milliseconds; `None` waits forever.
    pub pull_deadline_ms: Option<u64>,
    /// Largest message body accepted on append, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for BrokerPrefs {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9370".into(),
            sweep_interval_ms: 1000,
            pull_deadline_ms: Some(30_000),
            max_payload_bytes: 8 * 1024 * 1024,
        }
    }
}

impl BrokerPrefs {
    /// Sweep interval as a `Duration` (never zero).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Pull deadline as a `Duration`, if one is configured.
    pub fn pull_deadline(&self) -> Option<Duration> {
        self.pull_deadline_ms.map(Duration::from_millis)
    }
}
