// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ferry_core::{
    Consumer, ConsumerId, MemoryFlowLog, MemoryLedger, PendingPull, PullResponse, ReplyChannel,
    RequestContext, TopicId,
};

/// What a [`RecordingReply`] saw.
#[derive(Debug, Default)]
pub struct ReplyLog {
    deliveries: AtomicUsize,
    completions: AtomicUsize,
    responses: Mutex<Vec<PullResponse>>,
}

impl ReplyLog {
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> Vec<PullResponse> {
        self.responses.lock().unwrap().clone()
    }

    /// Delivered exactly once and completed exactly once.
    pub fn settled_once(&self) -> bool {
        self.deliveries() == 1 && self.completions() == 1
    }

    pub fn untouched(&self) -> bool {
        self.deliveries() == 0 && self.completions() == 0
    }
}

/// Reply channel that counts every call made on it.
pub struct RecordingReply {
    log: Arc<ReplyLog>,
}

impl RecordingReply {
    pub fn new() -> (Self, Arc<ReplyLog>) {
        let log = Arc::new(ReplyLog::default());
        (Self { log: log.clone() }, log)
    }
}

impl ReplyChannel for RecordingReply {
    fn deliver(&mut self, response: PullResponse) {
        self.log.deliveries.fetch_add(1, Ordering::SeqCst);
        self.log.responses.lock().unwrap().push(response);
    }

    fn complete(&mut self) {
        self.log.completions.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub topic: TopicId,
    pub ledger: Arc<MemoryLedger>,
    pub flow: Arc<MemoryFlowLog>,
    pub consumer: Consumer,
}

impl Harness {
    pub fn new() -> Self {
        let topic = TopicId::from("party-a/party-b/transfer-1");
        let ledger = Arc::new(MemoryLedger::new());
        let flow = Arc::new(MemoryFlowLog::new());
        let consumer = Consumer::new(ConsumerId(1), topic.clone(), ledger.clone())
            .with_flow_log(flow.clone());
        Self {
            topic,
            ledger,
            flow,
            consumer,
        }
    }

    /// Park a pull for `need_offset` and return its reply log.
    pub fn park(&self, request_id: &str, need_offset: i64) -> Arc<ReplyLog> {
        let (reply, log) = RecordingReply::new();
        self.consumer.register(PendingPull::new(
            RequestContext::new(request_id, self.topic.clone()),
            reply,
            need_offset,
        ));
        log
    }

    pub fn append(&self, body: &'static str) -> i64 {
        self.ledger.append(&self.topic, body)
    }
}
