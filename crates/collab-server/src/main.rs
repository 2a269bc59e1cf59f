//! collab-server: Real-time collaborative editing service for form documents.
//!
//! Runs the WebSocket endpoint, per-document actors, snapshot persistence
//! and the metadata debounce scheduler around the collab-core CRDT engine.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use collab_core::events::EventBus;
use collab_server::document::{DocDeps, DocumentConfig};
use collab_server::gate::MutationGate;
use collab_server::gateway::{HttpResolver, SessionGateway};
use collab_server::manager::DocumentManager;
use collab_server::metadata_cache::MetadataCache;
use collab_server::server::CollabServer;
use collab_server::store::{FileStore, SnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "collab-server")]
#[command(about = "Real-time collaborative form editing server")]
struct Args {
    /// Directory for document snapshots and the metadata cache
    #[arg(short, long)]
    data: PathBuf,

    /// Address to listen on for incoming connections
    #[arg(short, long, default_value = "0.0.0.0:9090")]
    listen: String,

    /// Base URL of the auth/permission resolver service
    #[arg(long)]
    auth_url: String,

    /// Base URL for deriving background image URLs in metadata
    #[arg(long)]
    asset_base_url: Option<String>,

    /// Quiet window before metadata extraction, in milliseconds
    #[arg(long, default_value_t = 2000)]
    debounce_ms: u64,

    /// How long an idle document is retained before eviction, in seconds
    #[arg(long, default_value_t = 60)]
    idle_secs: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,collab_server=debug"
    } else {
        "info,collab_server=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting collab-server");
    info!("Data directory: {:?}", args.data);
    info!("Listen address: {}", args.listen);
    info!("Permission resolver: {}", args.auth_url);

    let store: Arc<dyn SnapshotStore> = Arc::new(FileStore::new(args.data.clone()));
    let cache = Arc::new(Mutex::new(MetadataCache::new(&args.data)?));
    let events = Arc::new(EventBus::new());
    let gate = Arc::new(MutationGate::new(Arc::clone(&events)));

    let deps = DocDeps {
        store,
        cache,
        gate,
        events,
    };
    let config = DocumentConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        idle_timeout: Duration::from_secs(args.idle_secs),
        asset_base_url: args.asset_base_url.clone(),
        ..DocumentConfig::default()
    };

    let manager = DocumentManager::new(deps, config);
    let gateway = SessionGateway::new(Arc::new(HttpResolver::new(args.auth_url.clone())));
    let server = CollabServer::new(gateway, manager);

    let listener = CollabServer::bind(&args.listen).await?;
    info!("Server running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => server.accept(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
