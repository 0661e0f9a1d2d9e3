mod collector;
mod config;
mod http;
mod provider;
mod query;
mod snapshot;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::serve;
use clap::Parser;
use provider::{MetricsProvider, SysinfoProvider};
use store::SampleStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hoststats")]
#[command(version)]
struct Cli {
    /// Address the query endpoint listens on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: String,
    /// Path of the SQLite database holding the sample table.
    #[arg(long, default_value = "system_stats.db")]
    db: String,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let interval = config::interval_from_env();

    let addr: SocketAddr = match cli.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cli.listen, "invalid listen address");
            std::process::exit(1);
        }
    };

    let store = match SampleStore::open(&cli.db) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, db = %cli.db, "failed to open sample store");
            std::process::exit(1);
        }
    };
    let provider: Arc<dyn MetricsProvider> = Arc::new(SysinfoProvider::new());

    info!(
        listen = %cli.listen,
        db = %cli.db,
        interval_secs = interval.as_secs(),
        "starting hoststats"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let store = store.clone();
        let provider = provider.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(store, provider);
            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start the HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let collector_task = tokio::spawn(collector::run(
        provider.clone(),
        store.clone(),
        interval,
        shutdown_rx.clone(),
    ));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
