// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concurrent producers, triggers, and teardown against one consumer.

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::{RecordingReply, ReplyLog};
use ferry_core::{Consumer, ConsumerId, MemoryLedger, PendingPull, RequestContext, TopicId};

const PRODUCERS: usize = 4;
const TRIGGERS: usize = 4;
const PULLS_PER_PRODUCER: usize = 200;

fn shared_consumer() -> (Arc<Consumer>, Arc<MemoryLedger>, TopicId) {
    let topic = TopicId::from("hot");
    let ledger = Arc::new(MemoryLedger::new());
    let consumer = Arc::new(Consumer::new(ConsumerId(1), topic.clone(), ledger.clone()));
    (consumer, ledger, topic)
}

fn spawn_producers(
    consumer: &Arc<Consumer>,
    topic: &TopicId,
    barrier: &Arc<Barrier>,
    need_offset: impl Fn(usize) -> i64 + Send + Sync + Copy + 'static,
) -> Vec<thread::JoinHandle<Vec<Arc<ReplyLog>>>> {
    (0..PRODUCERS)
        .map(|p| {
            let consumer = consumer.clone();
            let topic = topic.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PULLS_PER_PRODUCER)
                    .map(|i| {
                        let (reply, log) = RecordingReply::new();
                        let ctx = RequestContext::new(format!("p{p}-{i}"), topic.clone());
                        consumer.register(PendingPull::new(ctx, reply, need_offset(i)));
                        log
                    })
                    .collect()
            })
        })
        .collect()
}

#[test]
fn concurrent_passes_and_producers_never_lose_or_double_answer() {
    let (consumer, ledger, topic) = shared_consumer();
    // half the pulls target offsets that exist, half target offsets that never will
    for i in 0..PULLS_PER_PRODUCER {
        ledger.append(&topic, format!("m{i}"));
    }
    let barrier = Arc::new(Barrier::new(PRODUCERS + TRIGGERS));
    let producers = spawn_producers(&consumer, &topic, &barrier, |i| {
        if i % 2 == 0 {
            i64::try_from(i + 1).unwrap()
        } else {
            1_000_000
        }
    });

    let satisfied = Arc::new(AtomicUsize::new(0));
    let triggers: Vec<_> = (0..TRIGGERS)
        .map(|t| {
            let consumer = consumer.clone();
            let barrier = barrier.clone();
            let satisfied = satisfied.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    let n = if t % 2 == 0 {
                        consumer.answer_long_pulling()
                    } else {
                        consumer.notify().map_or(0, |r| r.satisfied)
                    };
                    satisfied.fetch_add(n, Ordering::SeqCst);
                }
            })
        })
        .collect();

    let logs: Vec<Arc<ReplyLog>> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    for t in triggers {
        t.join().unwrap();
    }
    // settle anything registered after the last trigger ran
    satisfied.fetch_add(consumer.answer_long_pulling(), Ordering::SeqCst);

    let total = PRODUCERS * PULLS_PER_PRODUCER;
    let answered = logs.iter().filter(|l| l.settled_once()).count();
    let untouched = logs.iter().filter(|l| l.untouched()).count();
    assert_eq!(answered + untouched, total, "a reply was touched twice");
    assert_eq!(answered, total / 2);
    assert_eq!(satisfied.load(Ordering::SeqCst), answered);
    assert_eq!(consumer.pending_count(), untouched);
}

#[test]
fn teardown_racing_producers_leaves_no_pull_behind() {
    let (consumer, _ledger, topic) = shared_consumer();
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));
    let producers = spawn_producers(&consumer, &topic, &barrier, |_| 0);

    let killer = {
        let consumer = consumer.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            thread::yield_now();
            consumer.teardown()
        })
    };

    let logs: Vec<Arc<ReplyLog>> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    killer.join().unwrap();

    // anything parked before teardown was cancelled by it; anything later
    // was cancelled on arrival
    assert_eq!(consumer.pending_count(), 0);
    assert!(logs.iter().all(|l| l.settled_once()));
}
