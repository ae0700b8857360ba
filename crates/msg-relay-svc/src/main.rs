//! Message relay service binary

use anyhow::Result;
use clap::Parser;
use msg_relay::MessageStore;
use msg_relay_svc::{router, spawn_cleanup, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// Message relay service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "msg-relay-svc")]
#[command(about = "Message relay service for threshold signing sessions")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Message TTL in seconds
    #[arg(long, env = "RELAY_TTL_SECS", default_value = "3600")]
    ttl: i64,

    /// Expired message sweep interval in seconds
    #[arg(long, default_value = "60")]
    cleanup_interval: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(
        listen = %args.listen,
        ttl = args.ttl,
        "Starting message relay service"
    );

    let store = MessageStore::new(args.ttl);
    spawn_cleanup(store.clone(), Duration::from_secs(args.cleanup_interval));

    let app = router(Arc::new(AppState { store }));

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
