// Post-collection reduction: multi-key sort of servers and presentation order of clusters.
// Pure functions over a frozen CollectionSnapshot; no I/O.

use crate::models::{ClusterRollup, ClusterTotals, CollectionSnapshot, StatsReport, Totals};
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[value(name = "conns", alias = "conn")]
    Connections,
    #[value(name = "subs", alias = "sub")]
    Subscriptions,
    #[value(name = "routes", alias = "route")]
    Routes,
    #[value(name = "gws", alias = "gw")]
    Gateways,
    #[value(name = "mem")]
    Memory,
    #[value(name = "cpu")]
    Cpu,
    #[value(name = "slow")]
    SlowConsumers,
    #[value(name = "uptime")]
    Uptime,
    /// Round-trip time of the reply.
    #[default]
    #[value(name = "rtt")]
    Rtt,
}

impl SortKey {
    /// Parse a key name, falling back to [`SortKey::Rtt`] for unknown names.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Ascending comparator for this key. Uptime is the exception: it orders by
    /// start time, so the longest-running server (earliest start) comes first.
    fn compare(self, a: &StatsReport, b: &StatsReport) -> Ordering {
        match self {
            SortKey::Connections => a.connections().cmp(&b.connections()),
            SortKey::Subscriptions => a.subscriptions().cmp(&b.subscriptions()),
            SortKey::Routes => a.route_count().cmp(&b.route_count()),
            SortKey::Gateways => a.gateway_count().cmp(&b.gateway_count()),
            SortKey::Memory => a.memory().cmp(&b.memory()),
            SortKey::Cpu => a.cpu().total_cmp(&b.cpu()),
            SortKey::SlowConsumers => a.slow_consumers().cmp(&b.slow_consumers()),
            SortKey::Uptime => a.start().cmp(&b.start()),
            SortKey::Rtt => a.rtt.cmp(&b.rtt),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as clap::ValueEnum>::from_str(s, true)
    }
}

/// Sort key plus a uniform reversal of the key's comparator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub reverse: bool,
}

impl SortSpec {
    pub fn new(key: SortKey, reverse: bool) -> Self {
        Self { key, reverse }
    }

    pub fn compare(&self, a: &StatsReport, b: &StatsReport) -> Ordering {
        let ord = self.key.compare(a, b);
        if self.reverse { ord.reverse() } else { ord }
    }
}

/// Stable sort: equal keys keep arrival order, so sorting twice with the same `SortSpec` is a no-op.
pub fn sort_reports(reports: &mut [StatsReport], spec: SortSpec) {
    reports.sort_by(|a, b| spec.compare(a, b));
}

/// Largest clusters first; ties keep the given (first-seen) order.
pub fn sort_clusters(clusters: &mut [ClusterRollup]) {
    clusters.sort_by_key(|c| std::cmp::Reverse(c.member_count()));
}

/// Presentable result of one collection run.
#[derive(Debug, Clone, Serialize)]
pub struct ServerListing {
    pub servers: Vec<StatsReport>,
    pub clusters: Vec<ClusterRollup>,
    pub totals: Totals,
    pub cluster_totals: ClusterTotals,
    pub seen: u32,
    pub matched: u32,
    pub sort: SortSpec,
}

/// Turn a frozen snapshot into the sorted listing handed to presentation.
pub fn reduce(snapshot: CollectionSnapshot, spec: SortSpec) -> ServerListing {
    let mut clusters: Vec<ClusterRollup> = snapshot.ordered_clusters().cloned().collect();
    sort_clusters(&mut clusters);
    let cluster_totals = ClusterTotals::from_rollups(&clusters);

    let mut servers = snapshot.reports;
    sort_reports(&mut servers, spec);

    ServerListing {
        servers,
        clusters,
        totals: snapshot.totals,
        cluster_totals,
        seen: snapshot.seen,
        matched: snapshot.matched,
        sort: spec,
    }
}
