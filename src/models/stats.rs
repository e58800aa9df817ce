// Server identity, statsz payload, and the per-reply report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity block of a stats reply (`server` on the wire).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub id: String,
    /// Empty when the server is not part of a cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(default, rename = "ver")]
    pub version: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStats {
    #[serde(default)]
    pub msgs: i64,
    #[serde(default)]
    pub bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteStat {
    #[serde(default)]
    pub rid: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sent: DataStats,
    #[serde(default)]
    pub received: DataStats,
    #[serde(default)]
    pub pending: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStat {
    #[serde(default)]
    pub gwid: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "inbound_connections")]
    pub num_inbound: u32,
}

/// Runtime statistics block of a stats reply (`statsz` on the wire).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStats {
    pub start: DateTime<Utc>,
    pub mem: i64,
    pub cores: u32,
    pub cpu: f64,
    pub connections: u32,
    pub total_connections: u64,
    pub active_accounts: u32,
    #[serde(rename = "subscriptions")]
    pub num_subs: u32,
    pub sent: DataStats,
    pub received: DataStats,
    pub slow_consumers: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteStat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<GatewayStat>,
}

/// Wire payload of one reply to a server ping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsMsg {
    pub server: ServerInfo,
    #[serde(rename = "statsz")]
    pub stats: ServerStats,
}

impl StatsMsg {
    /// Decode a raw reply payload (JSON).
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One decoded reply plus the time it took to arrive after the broadcast.
/// Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub msg: StatsMsg,
    #[serde(with = "rtt_format")]
    pub rtt: Duration,
}

impl StatsReport {
    pub fn new(msg: StatsMsg, rtt: Duration) -> Self {
        Self { msg, rtt }
    }

    pub fn name(&self) -> &str {
        &self.msg.server.name
    }

    /// Cluster this server belongs to; `None` for standalone servers.
    pub fn cluster(&self) -> Option<&str> {
        let cluster = self.msg.server.cluster.as_str();
        (!cluster.is_empty()).then_some(cluster)
    }

    pub fn host(&self) -> &str {
        &self.msg.server.host
    }

    pub fn version(&self) -> &str {
        &self.msg.server.version
    }

    pub fn connections(&self) -> u32 {
        self.msg.stats.connections
    }

    pub fn subscriptions(&self) -> u32 {
        self.msg.stats.num_subs
    }

    pub fn route_count(&self) -> usize {
        self.msg.stats.routes.len()
    }

    /// Outbound gateways: one entry per gateway this server connects to.
    pub fn gateway_count(&self) -> usize {
        self.msg.stats.gateways.len()
    }

    pub fn inbound_gateways(&self) -> u32 {
        self.msg.stats.gateways.iter().map(|g| g.num_inbound).sum()
    }

    pub fn memory(&self) -> i64 {
        self.msg.stats.mem
    }

    pub fn cpu(&self) -> f64 {
        self.msg.stats.cpu
    }

    pub fn slow_consumers(&self) -> i64 {
        self.msg.stats.slow_consumers
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.msg.stats.start
    }

    /// Time since process start as of `now`; zero if the start lies in the future.
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start()).to_std().unwrap_or(Duration::ZERO)
    }
}

mod rtt_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(rtt: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*rtt).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
