// Collector tests over the in-process bus: termination signals, filtering, error paths

mod common;

use bytes::Bytes;
use common::*;
use server_list::collector::{Collector, CollectorConfig, CollectorState, Termination};
use server_list::error::{CollectError, TransportError};
use server_list::models::StatsReport;
use server_list::sorter::{SortKey, SortSpec};
use server_list::transport::{MemoryBus, Subscription, Transport};
use std::future::pending;
use std::time::Duration;

const GAP: Duration = Duration::from_millis(5);

fn config(expected: u32, timeout: Duration) -> CollectorConfig {
    CollectorConfig {
        expected,
        timeout,
        ..Default::default()
    }
}

fn names(reports: &[StatsReport]) -> Vec<&str> {
    reports.iter().map(|r| r.name()).collect()
}

#[tokio::test]
async fn stops_once_expected_count_replied() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![
            stats_msg("a", "", 5),
            stats_msg("b", "", 10),
            stats_msg("c", "", 2),
        ],
        GAP,
    )
    .await;

    let mut collector = Collector::new(&bus, config(3, Duration::from_secs(10)));
    assert_eq!(collector.state(), CollectorState::Idle);
    let outcome = collector.run(pending()).await.unwrap();

    assert_eq!(collector.state(), CollectorState::Done);
    assert_eq!(outcome.termination, Termination::ExpectedReached);
    assert_eq!(outcome.missing, None);
    assert!(outcome.elapsed < Duration::from_secs(5));

    let listing = outcome.listing;
    assert_eq!(listing.servers.len(), 3);
    assert_eq!(listing.totals.connections, 17);
    // Default sort is rtt, which follows arrival order here.
    assert_eq!(names(&listing.servers), vec!["a", "b", "c"]);
    assert!(listing.servers.windows(2).all(|w| w[0].rtt <= w[1].rtt));
}

#[tokio::test]
async fn sort_spec_is_applied_to_results() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![
            stats_msg("a", "", 5),
            stats_msg("b", "", 10),
            stats_msg("c", "", 2),
        ],
        GAP,
    )
    .await;

    let cfg = CollectorConfig {
        sort: SortSpec::new(SortKey::Connections, true),
        ..config(3, Duration::from_secs(10))
    };
    let outcome = Collector::new(&bus, cfg).run(pending()).await.unwrap();
    assert_eq!(names(&outcome.listing.servers), vec!["b", "a", "c"]);
}

#[tokio::test]
async fn deadline_reports_missing_servers() {
    let bus = MemoryBus::new();
    let replies = (0..6).map(|i| stats_msg(&format!("s{i}"), "", 1)).collect();
    let _fleet = spawn_fleet(&bus, replies, GAP).await;

    let outcome = Collector::new(&bus, config(10, Duration::from_millis(400)))
        .run(pending())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Deadline);
    assert_eq!(outcome.listing.servers.len(), 6);
    assert_eq!(outcome.listing.seen, 6);
    assert_eq!(outcome.missing, Some(4));
}

#[tokio::test]
async fn no_expectation_waits_for_the_deadline() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(&bus, vec![stats_msg("only", "", 1)], GAP).await;

    let outcome = Collector::new(&bus, config(0, Duration::from_millis(200)))
        .run(pending())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Deadline);
    assert_eq!(outcome.missing, None);
    assert!(outcome.elapsed >= Duration::from_millis(200));
}

#[tokio::test]
async fn filter_matching_nothing_is_an_error() {
    let bus = MemoryBus::new();
    let replies = (0..5).map(|i| stats_msg(&format!("edge-{i}"), "", 1)).collect();
    let _fleet = spawn_fleet(&bus, replies, GAP).await;

    let cfg = CollectorConfig {
        filter: "^core-".into(),
        ..config(5, Duration::from_secs(10))
    };
    let mut collector = Collector::new(&bus, cfg);
    let err = collector.run(pending()).await.unwrap_err();

    assert!(matches!(err, CollectError::NoResults { seen: 5 }), "{err:?}");
    assert!(err.to_string().contains("system privileges"));
    assert_eq!(collector.state(), CollectorState::Done);
}

#[tokio::test]
async fn filter_keeps_matching_servers_only() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![
            stats_msg("core-1", "", 3),
            stats_msg("edge-1", "", 4),
            stats_msg("core-2", "", 5),
        ],
        GAP,
    )
    .await;

    let cfg = CollectorConfig {
        filter: "^core-".into(),
        ..config(3, Duration::from_secs(10))
    };
    let outcome = Collector::new(&bus, cfg).run(pending()).await.unwrap();
    let listing = outcome.listing;

    assert_eq!(outcome.termination, Termination::ExpectedReached);
    assert_eq!(listing.seen, 3);
    assert_eq!(listing.matched, 2);
    assert_eq!(listing.totals.connections, 8);
}

#[tokio::test]
async fn no_replies_at_all_is_an_error() {
    let bus = MemoryBus::new();
    let err = Collector::new(&bus, config(0, Duration::from_millis(100)))
        .run(pending())
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::NoResults { seen: 0 }), "{err:?}");
}

#[tokio::test]
async fn invalid_filter_fails_before_subscribing() {
    let bus = MemoryBus::new();
    let cfg = CollectorConfig {
        filter: "([".into(),
        ..Default::default()
    };
    let mut collector = Collector::new(&bus, cfg);
    let err = collector.run(pending()).await.unwrap_err();

    assert!(matches!(err, CollectError::InvalidFilter { .. }), "{err:?}");
    assert_eq!(bus.subscription_count(), 0);
    assert_eq!(collector.state(), CollectorState::Done);
}

#[tokio::test]
async fn interrupt_stops_collection_with_partial_results() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![stats_msg("a", "", 1), stats_msg("b", "", 1)],
        GAP,
    )
    .await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = tx.send(());
    });

    let outcome = Collector::new(&bus, config(5, Duration::from_secs(30)))
        .run(async {
            let _ = rx.await;
        })
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Interrupted);
    assert_eq!(outcome.listing.servers.len(), 2);
    assert_eq!(outcome.missing, Some(3));
    assert!(outcome.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn closed_subscription_ends_collection() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![stats_msg("a", "", 1), stats_msg("b", "", 1)],
        GAP,
    )
    .await;

    let closer = bus.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        closer.close();
    });

    let outcome = Collector::new(&bus, config(0, Duration::from_secs(30)))
        .run(pending())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::SubscriptionClosed);
    assert_eq!(outcome.listing.servers.len(), 2);
}

#[tokio::test]
async fn undecodable_replies_are_skipped() {
    let bus = MemoryBus::new();
    let payloads = vec![
        stats_msg("good-1", "", 1).encode().unwrap(),
        b"not json".to_vec(),
        stats_msg("good-2", "", 1).encode().unwrap(),
    ];
    let _fleet = spawn_raw_fleet(&bus, payloads, GAP).await;

    let outcome = Collector::new(&bus, config(0, Duration::from_millis(300)))
        .run(pending())
        .await
        .unwrap();

    assert_eq!(outcome.listing.seen, 2);
    assert_eq!(names(&outcome.listing.servers), vec!["good-1", "good-2"]);
}

#[tokio::test]
async fn clusters_are_rolled_up_and_ordered_by_size() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![
            stats_msg("w1", "west", 1),
            stats_msg("e1", "east", 2),
            stats_msg("e2", "east", 3),
            stats_msg("solo", "", 4),
        ],
        GAP,
    )
    .await;

    let outcome = Collector::new(&bus, config(4, Duration::from_secs(10)))
        .run(pending())
        .await
        .unwrap();

    let clusters = &outcome.listing.clusters;
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].name, "east");
    assert_eq!(clusters[0].nodes, vec!["e1", "e2"]);
    assert_eq!(clusters[0].connections, 5);
    assert_eq!(clusters[1].name, "west");
    assert_eq!(outcome.listing.totals.servers, 4);
}

#[tokio::test]
async fn collector_unsubscribes_its_inbox() {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(&bus, vec![stats_msg("a", "", 1)], GAP).await;
    // The fleet holds one subscription on the ping subject.
    assert_eq!(bus.subscription_count(), 1);

    Collector::new(&bus, config(1, Duration::from_secs(10)))
        .run(pending())
        .await
        .unwrap();
    assert_eq!(bus.subscription_count(), 1);
}

#[tokio::test]
async fn subscribe_failure_is_reported() {
    let bus = MemoryBus::new();
    bus.close();
    let err = Collector::new(&bus, CollectorConfig::default())
        .run(pending())
        .await
        .unwrap_err();
    assert!(
        matches!(err, CollectError::Subscribe(TransportError::Closed)),
        "{err:?}"
    );
}

/// Delegates to the bus but refuses to publish.
struct PublishRefused(MemoryBus);

impl Transport for PublishRefused {
    fn new_inbox(&self) -> String {
        self.0.new_inbox()
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        self.0.subscribe(subject).await
    }

    async fn publish_request(
        &self,
        _subject: &str,
        _reply: &str,
        _payload: Bytes,
    ) -> Result<(), TransportError> {
        Err(TransportError::Protocol("permissions violation".into()))
    }

    async fn drain(&self, sid: u64) -> Result<(), TransportError> {
        self.0.drain(sid).await
    }
}

#[tokio::test]
async fn publish_failure_releases_the_inbox() {
    let bus = MemoryBus::new();
    let transport = PublishRefused(bus.clone());
    let mut collector = Collector::new(&transport, CollectorConfig::default());
    let err = collector.run(pending()).await.unwrap_err();

    assert!(matches!(err, CollectError::Publish(_)), "{err:?}");
    assert_eq!(bus.subscription_count(), 0);
    assert_eq!(collector.state(), CollectorState::Done);
}

#[derive(Clone, Copy)]
enum DrainFault {
    Hang,
    Fail,
}

/// Delegates to the bus but never completes a drain.
struct BrokenDrain {
    bus: MemoryBus,
    fault: DrainFault,
}

impl Transport for BrokenDrain {
    fn new_inbox(&self) -> String {
        self.bus.new_inbox()
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        self.bus.subscribe(subject).await
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.bus.publish_request(subject, reply, payload).await
    }

    async fn drain(&self, _sid: u64) -> Result<(), TransportError> {
        match self.fault {
            DrainFault::Hang => pending().await,
            DrainFault::Fail => Err(TransportError::Closed),
        }
    }
}

async fn collect_with_broken_drain(fault: DrainFault) {
    let bus = MemoryBus::new();
    let _fleet = spawn_fleet(
        &bus,
        vec![
            stats_msg("a", "", 2),
            stats_msg("b", "", 3),
            stats_msg("c", "", 4),
        ],
        GAP,
    )
    .await;

    let transport = BrokenDrain {
        bus: bus.clone(),
        fault,
    };
    let cfg = CollectorConfig {
        drain_timeout: Duration::from_millis(100),
        ..config(3, Duration::from_secs(10))
    };
    let mut collector = Collector::new(&transport, cfg);
    let outcome = collector.run(pending()).await.unwrap();

    assert_eq!(outcome.termination, Termination::ExpectedReached);
    assert_eq!(names(&outcome.listing.servers), vec!["a", "b", "c"]);
    assert_eq!(outcome.listing.totals.connections, 9);
    assert_eq!(outcome.missing, None);
    assert_eq!(collector.state(), CollectorState::Done);
}

#[tokio::test]
async fn drain_timeout_still_finalizes_with_applied_replies() {
    collect_with_broken_drain(DrainFault::Hang).await;
}

#[tokio::test]
async fn drain_error_still_finalizes_with_applied_replies() {
    collect_with_broken_drain(DrainFault::Fail).await;
}
