use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tapwire_proxy::config::Config;
use tapwire_proxy::inspect::InspectServer;
use tapwire_proxy::proxy::ProxyServer;
use tapwire_proxy::shutdown;
use tapwire_proxy::store::TrafficStore;

/// Wait this long for listeners and pending store writes on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "tapwire-proxy", about = "Intercepting reverse-proxy traffic inspector")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: String,

    /// Run in recording mode
    #[arg(short, long)]
    record: bool,

    /// Run in replay mode
    #[arg(short = 'p', long)]
    replay: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut config = Config::load(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load configuration from {}: {e}", args.config))?;
    if args.record {
        config.recording = true;
    }
    if args.replay {
        config.replay = true;
    }
    config.validate()?;

    info!(
        mode = config.mode().as_str(),
        tls = config.tls.enabled,
        validation = config.api_validation.enabled,
        "configuration loaded"
    );

    let store = Arc::new(TrafficStore::open(&config.store_path).await?);
    let ui_port = config.ui_port;
    let inactivity = config.inactivity_timeout_secs.map(Duration::from_secs);

    let server = ProxyServer::new(config, Arc::clone(&store))?;
    let ctx = server.context();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let inspect = InspectServer::new(ui_port, Arc::clone(&store));
    let mut inspect_handle = tokio::spawn(inspect.run(shutdown_rx.clone()));
    let mut proxy_handle = tokio::spawn(server.run(shutdown_rx));

    let mut proxy_done = false;
    tokio::select! {
        _ = shutdown::wait_for_trigger(inactivity, &ctx.activity) => {
            shutdown_tx.send(true).ok();
        }
        result = &mut proxy_handle => {
            // Bind failure or another fatal listener error: abort startup.
            shutdown_tx.send(true).ok();
            proxy_done = true;
            match result {
                Ok(Ok(())) => warn!("proxy server exited unexpectedly"),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(anyhow::anyhow!("proxy server task panicked: {e}")),
            }
        }
    }

    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        if !proxy_done {
            match (&mut proxy_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "proxy server exited with error"),
                Err(e) => error!(error = %e, "proxy server task panicked"),
            }
        }
        match (&mut inspect_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "inspection server exited with error"),
            Err(e) => warn!(error = %e, "inspection server task panicked"),
        }
    })
    .await;
    if drained.is_err() {
        warn!("listeners did not stop within the shutdown deadline");
        proxy_handle.abort();
        inspect_handle.abort();
    }

    let outstanding = store.drain(SHUTDOWN_DEADLINE).await;
    if outstanding > 0 {
        warn!(outstanding, "abandoning pending store writes");
    }
    store.close().await;

    info!("all servers stopped");
    Ok(())
}
