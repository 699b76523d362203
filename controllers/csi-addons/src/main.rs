//! CSI-Addons Controller
//!
//! Reconciles the CSI-Addons CRDs against the per-node storage agent:
//! - VolumeReplication / VolumeGroupReplication: replication role of a volume or group
//! - NetworkFence: fencing of client CIDRs
//! - ReclaimSpaceJob / EncryptionKeyRotationJob: one-shot volume operations
//! - ReclaimSpaceCronJob / EncryptionKeyRotationCronJob: scheduled emission of those jobs

mod backoff;
mod clock;
mod config;
mod controller;
mod driver;
mod error;
mod finalizer;
mod membership;
mod metrics;
mod reconciler;
mod server;
mod state_machine;
mod watcher;
#[cfg(test)]
mod test_utils;

use controller::Controller;
use config::ControllerConfig;
use error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube and tonic both pull in rustls; pick the provider before either builds a client
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting CSI-Addons Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Agent endpoint: {}", config.agent_endpoint.as_deref().unwrap_or("per driver only"));
    info!("  Driver endpoints: {}", config.agent_endpoints.len());
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
