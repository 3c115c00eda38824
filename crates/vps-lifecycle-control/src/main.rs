//! VPS Lifecycle Control - Service Lifecycle Orchestration
//!
//! This is the main entry point for the lifecycle service.
//! It accepts status changes and payments over HTTP and runs the
//! resulting lifecycle jobs in a background worker.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vps_lifecycle_control::api::{create_router, ApiState};
use vps_lifecycle_control::{
    HttpBillingLedger, JobContext, LifecycleConfig, LifecycleService, LogNotifier, Notifier,
    StoreJobQueue, SystemClock, WebhookNotifier, Worker,
};
use vps_lifecycle_hypervisor::{ControlPlaneClient, HttpControlPlaneClient};
use vps_lifecycle_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vps_lifecycle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VPS Lifecycle Control");

    // Load configuration from environment
    let config = LifecycleConfig::from_env()?;

    // Initialize store
    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    // Collaborators
    let clock = Arc::new(SystemClock);
    let control_plane = Arc::new(HttpControlPlaneClient::new(
        &config.control_plane_url,
        &config.control_plane_token,
    ));
    let billing = Arc::new(HttpBillingLedger::new(&config.billing_url));
    let notifier: Arc<dyn Notifier> = match &config.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => {
            tracing::warn!("NOTIFY_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let queue = Arc::new(StoreJobQueue::new(Arc::clone(&store), clock.clone()));
    tracing::info!(
        control_plane_url = %config.control_plane_url,
        billing_url = %config.billing_url,
        "Configured collaborators"
    );

    // Check the control plane once; /ready keeps reporting it afterwards
    match control_plane.host_status().await {
        Ok(host) => tracing::info!(
            hostname = %host.hostname,
            running_vms = host.running_vms,
            "Connected to control plane"
        ),
        Err(e) => tracing::warn!(error = %e, "Control plane not reachable at startup"),
    }

    let listen_addr = config.listen_addr.clone();
    let ctx = Arc::new(JobContext {
        store,
        control_plane,
        billing,
        notifier,
        queue,
        clock,
        config,
    });

    // Start the job worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Arc::new(Worker::new(Arc::clone(&ctx)));
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    // Create router
    let state = ApiState {
        lifecycle: Arc::new(LifecycleService::new(ctx)),
    };
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    // Let in-flight jobs finish
    let _ = shutdown_tx.send(true);
    worker_handle.await?;

    Ok(())
}
