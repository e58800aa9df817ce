// Terminal state of one collection run and the running totals it carries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ClusterRollup, StatsReport};

/// Running totals over accepted replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub servers: usize,
    pub connections: u64,
    pub memory: i64,
    pub slow_consumers: i64,
    pub subscriptions: u64,
}

impl Totals {
    pub fn add(&mut self, report: &StatsReport) {
        self.servers += 1;
        self.connections += u64::from(report.connections());
        self.memory += report.memory();
        self.slow_consumers += report.slow_consumers();
        self.subscriptions += u64::from(report.subscriptions());
    }
}

/// Frozen result of a collection: `seen >= matched` and `matched == reports.len()`.
#[derive(Debug, Clone, Default)]
pub struct CollectionSnapshot {
    /// Accepted reports in the order the aggregator admitted them.
    pub reports: Vec<StatsReport>,
    pub clusters: HashMap<String, ClusterRollup>,
    /// Cluster names in first-seen order.
    pub cluster_order: Vec<String>,
    pub totals: Totals,
    pub seen: u32,
    pub matched: u32,
}

impl CollectionSnapshot {
    /// Clusters in first-seen order.
    pub fn ordered_clusters(&self) -> impl Iterator<Item = &ClusterRollup> {
        self.cluster_order
            .iter()
            .filter_map(|name| self.clusters.get(name))
    }
}
