use std::net::SocketAddr;

use anyhow::Context as _;
use clap::Parser;
use futures::future;
use k8s_openapi::api::core::v1::Event;
use kube::{Api, Client};
use kube_runtime::watcher;
use prometheus::Registry;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use kube_event_counter::sink::prometheus::serve_metrics;
use kube_event_counter::sink::PrometheusSink;
use kube_event_counter::{source, EventMonitor, MonitorConfig};

/// Exports Kubernetes cluster events as Prometheus counters by severity.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// The address to serve the Prometheus scrape endpoint on.
    #[arg(long, default_value = "0.0.0.0:9001")]
    listen_address: SocketAddr,

    /// Also count Normal events; by default only Warning and unrecognized
    /// severities are counted.
    #[arg(long)]
    count_normal_events: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let client = Client::try_default()
        .await
        .context("failed to load cluster configuration")?;
    let events: Api<Event> = Api::all(client);

    let registry = Registry::new();
    let sink = PrometheusSink::new(&registry).context("failed to register event counters")?;
    let monitor = EventMonitor::new(
        sink,
        MonitorConfig {
            count_normal: args.count_normal_events,
        },
    );

    let stop = shutdown_token();

    tokio::spawn({
        let addr = args.listen_address;
        async move {
            log::info!("serving metrics on {addr}");
            if let Err(err) = serve_metrics(registry, addr).await {
                log::error!("metrics endpoint failed: {err}");
            }
        }
    });

    let (store, notifications) = source::events(events, watcher::Config::default());
    let feed = tokio::spawn({
        let monitor = monitor.clone();
        let stop = stop.clone();
        async move { source::dispatch(notifications, &monitor, &stop).await }
    });

    let synced = async {
        if store.wait_until_ready().await.is_err() {
            // the watch dropped its writer; the stop signal releases run()
            future::pending::<()>().await;
        }
    };
    if let Err(err) = monitor.run(synced, &stop).await {
        log::warn!("{err}");
    }

    feed.await.context("notification feed panicked")?;
    Ok(())
}

/// Returns a token cancelled exactly once, on the first SIGINT or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    log::error!("failed to install SIGTERM handler: {err}");
                    stop.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::warn!("interrupt received, shutting down"),
                _ = term.recv() => log::warn!("termination requested, shutting down"),
            }
            stop.cancel();
        }
    });
    stop
}
