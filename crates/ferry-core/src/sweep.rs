// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Periodic sweep driver.
//!
//! Arrival notifications only fire when data lands. The sweeper makes sure
//! every consumer still gets a pass at a fixed interval so deadlines expire
//! and abandoned pulls are dropped on quiet topics.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::reconcile::PassReport;
use crate::registry::ConsumerRegistry;

/// Ticks at a fixed interval and sweeps every registered consumer.
#[derive(Debug)]
pub struct Sweeper {
    interval: Duration,
    sweep_count: u64,
}

impl Sweeper {
    /// Creates a sweeper with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sweep_count: 0,
        }
    }

    /// Number of sweeps run so far.
    pub fn sweep_count(&self) -> u64 {
        self.sweep_count
    }

    /// Sweep loop. Runs until the task is dropped or aborted.
    #[instrument(skip(self, registry))]
    pub async fn run(&mut self, registry: Arc<ConsumerRegistry>) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("sweeper started, interval {:?}", self.interval);

        loop {
            interval.tick().await;
            self.sweep(&registry);
        }
    }

    /// One sweep over every live consumer.
    pub fn sweep(&mut self, registry: &ConsumerRegistry) -> PassReport {
        self.sweep_count += 1;
        let report = registry.sweep_all();
        if report.satisfied + report.expired + report.abandoned > 0 {
            debug!(
                sweep = self.sweep_count,
                satisfied = report.satisfied,
                expired = report.expired,
                abandoned = report.abandoned,
                still_pending = registry.pending_total(),
                "sweep settled pulls"
            );
        }
        report
    }
}
