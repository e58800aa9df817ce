use anyhow::{Context, Result};
use server_list::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Resolves on Ctrl-C (and SIGTERM on unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::debug!("interrupt received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse_args();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_directive()));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let app_config = config::AppConfig::load(args.config.as_deref())?;
    let nats_options = args.nats_options(&app_config);
    let transport = transport::NatsTransport::connect(&nats_options)
        .await
        .context("connecting to server")?;
    tracing::info!(
        server = %transport.server().server_name,
        version = %transport.server().version,
        "connected"
    );

    let mut collector =
        collector::Collector::new(&transport, args.collector_config(&app_config));
    let outcome = collector.run(shutdown_signal()).await?;

    if args.json_output(&app_config) {
        if let Some(missing) = outcome.missing {
            tracing::warn!(missing, "not all expected servers replied");
        }
        println!("{}", render::render_json(&outcome.listing)?);
        return Ok(());
    }

    print!(
        "{}",
        render::render_servers_table(&outcome.listing, chrono::Utc::now())
    );
    if let Some(missing) = outcome.missing {
        println!("\n{}", render::render_missing(missing));
    }
    if !outcome.listing.clusters.is_empty() {
        println!();
        print!("{}", render::render_clusters_table(&outcome.listing));
    }

    Ok(())
}
