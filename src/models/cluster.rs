// Per-cluster rollup built while replies are collected

use serde::{Deserialize, Serialize};

use super::StatsReport;

/// Aggregate view of every accepted server sharing a cluster name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRollup {
    pub name: String,
    /// Member server names in arrival order.
    pub nodes: Vec<String>,
    pub gateways_out: usize,
    pub gateways_in: u64,
    pub connections: u64,
}

impl ClusterRollup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fold one member report into the rollup.
    pub fn add(&mut self, report: &StatsReport) {
        self.nodes.push(report.name().to_string());
        self.connections += u64::from(report.connections());
        self.gateways_out += report.gateway_count();
        self.gateways_in += u64::from(report.inbound_gateways());
    }

    pub fn member_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Column totals across all clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTotals {
    pub nodes: usize,
    pub gateways_out: usize,
    pub gateways_in: u64,
    pub connections: u64,
}

impl ClusterTotals {
    pub fn from_rollups<'a>(rollups: impl IntoIterator<Item = &'a ClusterRollup>) -> Self {
        rollups.into_iter().fold(Self::default(), |mut acc, c| {
            acc.nodes += c.member_count();
            acc.gateways_out += c.gateways_out;
            acc.gateways_in += c.gateways_in;
            acc.connections += c.connections;
            acc
        })
    }
}
