// Scatter-gather controller: broadcast one ping, collect replies until the first of
// {expected count, deadline, interrupt, subscription closed}, drain, then reduce.
//
// Every reply is applied in its own task. Termination never cancels those tasks:
// the delivery loop joins all of them before the snapshot is taken, so a reply that
// reached the aggregator is always counted and none is counted twice.

use crate::aggregator::Aggregator;
use crate::error::CollectError;
use crate::models::{StatsMsg, StatsReport};
use crate::sorter::{self, ServerListing, SortSpec};
use crate::transport::{Message, Subscription, Transport};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Subject every server in the system account answers with its statsz.
pub const SERVER_PING_SUBJECT: &str = "$SYS.REQ.SERVER.PING";

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub subject: String,
    /// Stop as soon as this many replies were seen; 0 disables the early exit.
    pub expected: u32,
    /// Collection window, measured from the broadcast.
    pub timeout: Duration,
    /// Upper bound for flushing in-flight replies after termination.
    pub drain_timeout: Duration,
    /// Regular expression on server names; empty accepts all.
    pub filter: String,
    pub sort: SortSpec,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            subject: SERVER_PING_SUBJECT.to_string(),
            expected: 0,
            timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            filter: String::new(),
            sort: SortSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Broadcasting,
    Collecting,
    Finalizing,
    Done,
}

/// Which signal ended collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    ExpectedReached,
    Deadline,
    Interrupted,
    /// The transport ended the subscription (e.g. connection lost).
    SubscriptionClosed,
}

#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub listing: ServerListing,
    pub termination: Termination,
    /// Deficit against the expected count; advisory only.
    pub missing: Option<u32>,
    pub elapsed: Duration,
}

pub struct Collector<'a, T> {
    transport: &'a T,
    config: CollectorConfig,
    state: CollectorState,
}

impl<'a, T: Transport> Collector<'a, T> {
    pub fn new(transport: &'a T, config: CollectorConfig) -> Self {
        Self {
            transport,
            config,
            state: CollectorState::Idle,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Run one scatter-gather round. `interrupt` resolves on an external cancel request.
    /// The collector ends in [`CollectorState::Done`] whatever the result.
    pub async fn run<F>(&mut self, interrupt: F) -> Result<CollectionOutcome, CollectError>
    where
        F: Future<Output = ()>,
    {
        let result = self.collect(interrupt).await;
        self.transition(CollectorState::Done);
        result
    }

    async fn collect<F>(&mut self, interrupt: F) -> Result<CollectionOutcome, CollectError>
    where
        F: Future<Output = ()>,
    {
        let aggregator = Arc::new(Aggregator::with_pattern(
            &self.config.filter,
            self.config.expected,
        )?);

        self.transition(CollectorState::Broadcasting);
        let inbox = self.transport.new_inbox();
        let subscription = self
            .transport
            .subscribe(&inbox)
            .await
            .map_err(CollectError::Subscribe)?;
        let sid = subscription.sid();

        let start = Instant::now();
        let stop = CancellationToken::new();
        let mut delivery = tokio::spawn(deliver(
            subscription,
            aggregator.clone(),
            start,
            stop.clone(),
        ));

        if let Err(e) = self
            .transport
            .publish_request(&self.config.subject, &inbox, Bytes::new())
            .await
        {
            stop.cancel();
            self.drain(sid).await;
            delivery.abort();
            return Err(CollectError::Publish(e));
        }
        debug!(subject = %self.config.subject, %inbox, "server ping published");

        self.transition(CollectorState::Collecting);
        let expected_reached = aggregator.expected_reached();
        let deadline = start + self.config.timeout;
        tokio::pin!(interrupt);

        let (termination, delivery_finished) = tokio::select! {
            biased;
            _ = expected_reached.cancelled() => (Termination::ExpectedReached, false),
            _ = &mut interrupt => (Termination::Interrupted, false),
            _ = sleep_until(deadline) => (Termination::Deadline, false),
            joined = &mut delivery => {
                if let Err(e) = joined {
                    warn!(error = %e, "reply delivery task failed");
                }
                (Termination::SubscriptionClosed, true)
            }
        };
        debug!(?termination, seen = aggregator.seen(), "collection terminated");

        self.transition(CollectorState::Finalizing);
        if !delivery_finished {
            if !self.drain(sid).await {
                stop.cancel();
            }
            if let Err(e) = delivery.await {
                warn!(error = %e, "reply delivery task failed");
            }
        }

        let snapshot = aggregator.snapshot();
        let elapsed = start.elapsed();
        if snapshot.matched == 0 {
            return Err(CollectError::NoResults {
                seen: snapshot.seen,
            });
        }

        let expected = self.config.expected;
        let missing = (expected != 0 && snapshot.seen < expected).then(|| expected - snapshot.seen);
        info!(
            seen = snapshot.seen,
            matched = snapshot.matched,
            clusters = snapshot.clusters.len(),
            ?termination,
            elapsed_ms = elapsed.as_millis() as u64,
            "collection complete"
        );

        Ok(CollectionOutcome {
            listing: sorter::reduce(snapshot, self.config.sort),
            termination,
            missing,
            elapsed,
        })
    }

    /// Drain the reply subscription within `drain_timeout`. Returns false if it did not complete.
    async fn drain(&self, sid: u64) -> bool {
        match timeout(self.config.drain_timeout, self.transport.drain(sid)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, sid, "draining reply subscription failed");
                false
            }
            Err(_) => {
                warn!(
                    sid,
                    timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "draining reply subscription timed out"
                );
                false
            }
        }
    }

    fn transition(&mut self, next: CollectorState) {
        trace!(from = ?self.state, to = ?next, "collector state");
        self.state = next;
    }
}

/// Pump the subscription until it ends, applying each reply in its own task.
/// On `stop` the subscription is closed locally and the buffered replies are still applied.
async fn deliver(
    mut subscription: Subscription,
    aggregator: Arc<Aggregator>,
    start: Instant,
    stop: CancellationToken,
) -> usize {
    let mut tasks = JoinSet::new();
    let mut received = 0usize;
    let mut stopping = false;

    loop {
        tokio::select! {
            biased;
            msg = subscription.next() => match msg {
                Some(msg) => {
                    received += 1;
                    let rtt = start.elapsed();
                    let aggregator = aggregator.clone();
                    tasks.spawn(async move { apply_reply(&aggregator, msg, rtt) });
                }
                None => break,
            },
            _ = stop.cancelled(), if !stopping => {
                stopping = true;
                subscription.close();
            }
        }
        while let Some(joined) = tasks.try_join_next() {
            log_join_error(joined);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_join_error(joined);
    }
    debug!(inbox = subscription.subject(), received, "reply delivery finished");
    received
}

fn apply_reply(aggregator: &Aggregator, msg: Message, rtt: Duration) {
    match StatsMsg::decode(&msg.payload) {
        Ok(stats) => {
            aggregator.apply(StatsReport::new(stats, rtt));
        }
        Err(e) => warn!(
            subject = %msg.subject,
            bytes = msg.payload.len(),
            error = %e,
            "undecodable stats reply skipped"
        ),
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "reply task failed");
    }
}
