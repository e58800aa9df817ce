// Domain models (stats replies, cluster rollups, collection snapshot)

mod cluster;
mod snapshot;
mod stats;

pub use cluster::{ClusterRollup, ClusterTotals};
pub use snapshot::{CollectionSnapshot, Totals};
pub use stats::{
    DataStats, GatewayStat, RouteStat, ServerInfo, ServerStats, StatsMsg, StatsReport,
};
