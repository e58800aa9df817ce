// Presentation: server and cluster overview tables, JSON output, human-readable units.

use crate::sorter::ServerListing;
use chrono::{DateTime, Utc};
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table, presets};
use std::time::Duration;

const IEC_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Pretty JSON array of the sorted server reports.
pub fn render_json(listing: &ServerListing) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&listing.servers)
}

/// IEC byte size, e.g. `1.5 MiB`. Negative values render as `0 B`.
pub fn format_bytes(bytes: i64) -> String {
    let Ok(bytes) = u64::try_from(bytes) else {
        return "0 B".to_string();
    };
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < IEC_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{value:.1} {}", IEC_UNITS[unit])
    } else {
        format!("{value:.0} {}", IEC_UNITS[unit])
    }
}

/// Uptime truncated to whole seconds, e.g. `2days 3h 4m 5s`.
pub fn format_uptime(uptime: Duration) -> String {
    humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string()
}

/// Round-trip time truncated to microseconds, e.g. `1ms 250us`.
pub fn format_rtt(rtt: Duration) -> String {
    let micros = Duration::from_micros(rtt.as_micros() as u64);
    humantime::format_duration(micros).to_string()
}

fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

fn right(value: impl ToString) -> Cell {
    Cell::new(value).set_alignment(CellAlignment::Right)
}

/// "Server Overview": one row per server in sorted order, then a totals row.
pub fn render_servers_table(listing: &ServerListing, now: DateTime<Utc>) -> String {
    let mut table = table(
        &[
            "Name", "Cluster", "Host", "Version", "Conns", "Subs", "Routes", "GWs", "Mem", "CPU",
            "Slow", "Uptime", "RTT",
        ],
    );

    for s in &listing.servers {
        table.add_row(vec![
            Cell::new(s.name()),
            Cell::new(s.cluster().unwrap_or_default()),
            Cell::new(s.host()),
            Cell::new(s.version()),
            right(s.connections()),
            right(s.subscriptions()),
            right(s.route_count()),
            right(s.gateway_count()),
            right(format_bytes(s.memory())),
            right(format!("{:.1}", s.cpu())),
            right(s.slow_consumers()),
            right(format_uptime(s.uptime(now))),
            right(format_rtt(s.rtt)),
        ]);
    }

    let totals = &listing.totals;
    table.add_row(vec![
        Cell::new(""),
        Cell::new(format!("{} Clusters", listing.clusters.len())).add_attribute(Attribute::Bold),
        Cell::new(format!("{} Servers", totals.servers)).add_attribute(Attribute::Bold),
        Cell::new(""),
        right(totals.connections).add_attribute(Attribute::Bold),
        right(totals.subscriptions).add_attribute(Attribute::Bold),
        Cell::new(""),
        Cell::new(""),
        right(format_bytes(totals.memory)).add_attribute(Attribute::Bold),
        Cell::new(""),
        right(totals.slow_consumers).add_attribute(Attribute::Bold),
        Cell::new(""),
        Cell::new(""),
    ]);

    format!("Server Overview\n{table}\n")
}

/// "Cluster Overview": clusters by descending node count, then a totals row.
pub fn render_clusters_table(listing: &ServerListing) -> String {
    let mut table = table(
        &[
            "Cluster",
            "Node Count",
            "Outgoing Gateways",
            "Incoming Gateways",
            "Connections",
        ],
    );

    for c in &listing.clusters {
        table.add_row(vec![
            Cell::new(&c.name),
            right(c.member_count()),
            right(c.gateways_out),
            right(c.gateways_in),
            right(c.connections),
        ]);
    }

    let totals = &listing.cluster_totals;
    table.add_row(vec![
        Cell::new(""),
        right(totals.nodes).add_attribute(Attribute::Bold),
        right(totals.gateways_out).add_attribute(Attribute::Bold),
        right(totals.gateways_in).add_attribute(Attribute::Bold),
        right(totals.connections).add_attribute(Attribute::Bold),
    ]);

    format!("Cluster Overview\n{table}\n")
}

/// Advisory line for servers that did not answer.
pub fn render_missing(missing: u32) -> String {
    format!("Missing {missing} server(s)")
}
