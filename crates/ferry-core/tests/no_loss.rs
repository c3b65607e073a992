// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Random interleavings of parks, appends, cursor moves and passes.

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
mod common;

use std::sync::Arc;

use common::{Harness, ReplyLog};
use ferry_core::StatusCode;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Park(i64),
    Append,
    Advance(i64),
    Pass,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..8).prop_map(Op::Park),
        2 => Just(Op::Append),
        1 => (1i64..8).prop_map(Op::Advance),
        2 => Just(Op::Pass),
    ]
}

proptest! {
    #[test]
    fn every_pull_is_answered_once_or_still_pending(ops in prop::collection::vec(op(), 0..64)) {
        let h = Harness::new();
        let mut parked: Vec<(i64, Arc<ReplyLog>)> = Vec::new();
        let mut frontier = 0i64;

        for (i, op) in ops.iter().enumerate() {
            match op {
                Op::Park(need) => parked.push((*need, h.park(&format!("r{i}"), *need))),
                Op::Append => frontier = h.append("m"),
                Op::Advance(to) => {
                    h.consumer.advance_cursor(*to);
                }
                Op::Pass => {
                    h.consumer.answer_long_pulling();
                }
            }
        }
        h.consumer.answer_long_pulling();

        let cursor = h.consumer.commit_cursor();
        let mut pending = 0;
        for (need, log) in &parked {
            let target = if *need <= 0 { cursor } else { *need };
            if log.untouched() {
                // anything readable now must have been served by the last pass
                prop_assert!(target > frontier, "pull for {} lost with frontier {}", target, frontier);
                pending += 1;
                continue;
            }
            prop_assert!(log.settled_once());
            let resp = &log.responses()[0];
            prop_assert_eq!(resp.code, StatusCode::Success);
            prop_assert!(resp.request_index <= frontier);
            if *need > 0 {
                prop_assert_eq!(resp.request_index, *need);
            }
        }
        prop_assert_eq!(h.consumer.pending_count(), pending);
    }
}
