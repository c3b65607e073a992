// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reply channel port: the one-shot path back to a waiting client.

use ferry_proto::PullResponse;
use tokio::sync::oneshot;

/// One-shot delivery mechanism owned by the transport layer.
///
/// The engine calls [`deliver`](ReplyChannel::deliver) then
/// [`complete`](ReplyChannel::complete) exactly once per pull. Both calls must
/// return without blocking.
pub trait ReplyChannel: Send {
    /// Push the answer towards the client.
    fn deliver(&mut self, response: PullResponse);

    /// Close the channel. Must tolerate being called more than once.
    fn complete(&mut self);

    /// True when the client is gone and nothing can be delivered any more.
    fn is_abandoned(&self) -> bool {
        false
    }
}

/// Receiving half handed to the transport handler.
pub type ReplyReceiver = oneshot::Receiver<PullResponse>;

/// [`ReplyChannel`] backed by a tokio oneshot.
#[derive(Debug)]
pub struct OneshotReply {
    tx: Option<oneshot::Sender<PullResponse>>,
}

impl OneshotReply {
    /// Creates a connected reply/receiver pair.
    pub fn pair() -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }
}

impl ReplyChannel for OneshotReply {
    fn deliver(&mut self, response: PullResponse) {
        if let Some(tx) = self.tx.take() {
            // receiver may be gone; nothing to do about it here
            let _ = tx.send(response);
        }
    }

    fn complete(&mut self) {
        self.tx = None;
    }

    fn is_abandoned(&self) -> bool {
        self.tx.as_ref().is_none_or(oneshot::Sender::is_closed)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use ferry_proto::StatusCode;

    #[tokio::test]
    async fn receiver_gets_the_delivered_answer() {
        let (mut reply, rx) = OneshotReply::pair();
        assert!(!reply.is_abandoned());
        reply.deliver(PullResponse::timeout());
        reply.complete();
        reply.complete();
        assert_eq!(rx.await.unwrap().code, StatusCode::Timeout);
    }

    #[tokio::test]
    async fn completing_without_delivery_closes_the_receiver() {
        let (mut reply, rx) = OneshotReply::pair();
        reply.complete();
        assert!(rx.await.is_err());
    }

    #[test]
    fn dropped_receiver_marks_reply_abandoned() {
        let (reply, rx) = OneshotReply::pair();
        drop(rx);
        assert!(reply.is_abandoned());
    }
}
