use std::sync::Arc;

use anyhow::{bail, Context};
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_record_cell::{CallRecordCache, SupabaseCallRecordRepository, SupabasePetOwnerDirectory};
use call_sync_cell::{CallSyncWorker, RetellClient, SyncSettings};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vetdesk call sync worker");

    // Load configuration
    let config = AppConfig::from_env();
    if !config.is_configured() {
        bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set");
    }

    let supabase = Arc::new(SupabaseClient::new(&config));
    let cache = Arc::new(CallRecordCache::new(
        Arc::new(SupabaseCallRecordRepository::new(supabase.clone())),
        Arc::new(SupabasePetOwnerDirectory::new(supabase)),
        Arc::new(SystemClock),
    ));
    let provider = RetellClient::new(&config).context("telephony provider client")?;

    let settings = SyncSettings::from_config(&config);
    let worker = CallSyncWorker::new(Arc::new(provider), cache, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Could not listen for Ctrl-C, stopping: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
