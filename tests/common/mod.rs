// Shared test helpers
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use server_list::collector::SERVER_PING_SUBJECT;
use server_list::models::*;
use server_list::transport::{MemoryBus, Transport};
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn stats_msg(name: &str, cluster: &str, connections: u32) -> StatsMsg {
    StatsMsg {
        server: ServerInfo {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            id: format!("ID-{name}"),
            cluster: cluster.to_string(),
            version: "2.10.4".to_string(),
            ..Default::default()
        },
        stats: ServerStats {
            start: started_at(0),
            connections,
            ..Default::default()
        },
    }
}

pub fn report(name: &str, cluster: &str, connections: u32, rtt_ms: u64) -> StatsReport {
    StatsReport::new(stats_msg(name, cluster, connections), Duration::from_millis(rtt_ms))
}

/// Fixed reference instant plus `offset_secs`.
pub fn started_at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

pub fn gateways(outbound: usize, inbound_each: u32) -> Vec<GatewayStat> {
    (0..outbound)
        .map(|i| GatewayStat {
            gwid: i as u64,
            name: format!("gw-{i}"),
            num_inbound: inbound_each,
        })
        .collect()
}

pub fn routes(count: usize) -> Vec<RouteStat> {
    (0..count)
        .map(|i| RouteStat {
            rid: i as u64,
            name: format!("route-{i}"),
            ..Default::default()
        })
        .collect()
}

/// Simulated fleet: answers every ping on the system subject by publishing `replies`
/// to the request's reply inbox, waiting `gap` before each one.
pub async fn spawn_fleet(bus: &MemoryBus, replies: Vec<StatsMsg>, gap: Duration) -> JoinHandle<()> {
    let payloads = replies
        .iter()
        .map(|m| m.encode().unwrap())
        .collect::<Vec<_>>();
    spawn_raw_fleet(bus, payloads, gap).await
}

/// Like [`spawn_fleet`], with raw payloads (lets tests inject garbage).
pub async fn spawn_raw_fleet(bus: &MemoryBus, payloads: Vec<Vec<u8>>, gap: Duration) -> JoinHandle<()> {
    let mut requests = bus.subscribe(SERVER_PING_SUBJECT).await.unwrap();
    let bus = bus.clone();
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let Some(inbox) = request.reply else {
                continue;
            };
            for payload in &payloads {
                tokio::time::sleep(gap).await;
                if bus.publish(&inbox, None, payload.clone()).is_err() {
                    return;
                }
            }
        }
    })
}
