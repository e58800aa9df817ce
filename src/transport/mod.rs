// Publish/subscribe transport used by the collector.
// The collector only needs: unique inbox, subscribe, publish-with-reply, and drain.

mod memory;
mod nats;

pub use memory::MemoryBus;
pub use nats::{NatsOptions, NatsTransport, ServerHello};

use crate::error::TransportError;
use bytes::Bytes;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Receiving side of a subscription. Ends once the transport drains or closes it,
/// after every message already routed to it has been yielded.
#[derive(Debug)]
pub struct Subscription {
    sid: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub(crate) fn new(sid: u64, subject: String, receiver: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            sid,
            subject,
            receiver,
        }
    }

    pub fn sid(&self) -> u64 {
        self.sid
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Refuse further deliveries locally; already buffered messages are still yielded.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub trait Transport: Send + Sync {
    /// A reply subject no other subscriber will receive.
    fn new_inbox(&self) -> String;

    fn subscribe(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send;

    fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop new deliveries to `sid`, let in-flight messages arrive, then end the subscription.
    fn drain(&self, sid: u64) -> impl Future<Output = Result<(), TransportError>> + Send;
}
