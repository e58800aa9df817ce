// In-process bus: exact-subject fan-out over unbounded channels

use super::{Message, Subscription, Transport};
use crate::error::TransportError;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct BusState {
    next_sid: u64,
    next_inbox: u64,
    subs: HashMap<u64, (String, mpsc::UnboundedSender<Message>)>,
    closed: bool,
}

/// Cloneable handle; every clone talks to the same bus.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to every subscription on `subject`. Returns how many received it.
    pub fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: impl Into<Bytes>,
    ) -> Result<usize, TransportError> {
        let state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let msg = Message {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            payload: payload.into(),
        };
        let delivered = state
            .subs
            .values()
            .filter(|(s, _)| s == subject)
            .filter(|(_, tx)| tx.send(msg.clone()).is_ok())
            .count();
        Ok(delivered)
    }

    /// Close the bus: every subscription ends and further operations fail.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subs.clear();
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subs.len()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryBus {
    fn new_inbox(&self) -> String {
        let mut state = self.lock();
        state.next_inbox += 1;
        format!("_INBOX.mem.{}", state.next_inbox)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.next_sid += 1;
        let sid = state.next_sid;
        let (tx, rx) = mpsc::unbounded_channel();
        state.subs.insert(sid, (subject.to_string(), tx));
        Ok(Subscription::new(sid, subject.to_string(), rx))
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.publish(subject, Some(reply), payload).map(|_| ())
    }

    // Delivery is synchronous, so nothing can be in flight: dropping the sender
    // ends the stream right after the buffered messages.
    async fn drain(&self, sid: u64) -> Result<(), TransportError> {
        self.lock().subs.remove(&sid);
        Ok(())
    }
}
