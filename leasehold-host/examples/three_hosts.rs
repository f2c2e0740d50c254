//! Three hosts sharing eight partitions through a file-backed lease store.
//!
//! host-b is stopped after a few seconds without releasing anything; watch host-a
//! and host-c pick up its partitions once the leases expire.
//!
//! ```sh
//! RUST_LOG=info,leasehold_host=debug cargo run -p leasehold-host --example three_hosts
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use leasehold_core::{Clock, SystemClock};
use leasehold_host::{HostConfiguration, LeaseConfig, PartitionScanner};
use leasehold_storage::FileLeaseStore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    leasehold_host::host_metrics::describe_metrics();

    let dir = tempfile::tempdir()?;
    let root = dir.path().join("leases");
    let partitions: Vec<String> = (0..8).map(|i| format!("orders-{}", i)).collect();
    let lease = LeaseConfig::new(1_000, 4_000)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut hosts = Vec::new();
    for name in ["host-a", "host-b", "host-c"] {
        let config = HostConfiguration::new(name, partitions.clone(), lease.clone());
        let store = Arc::new(FileLeaseStore::with_clock(&root, clock.clone()));
        let scanner = PartitionScanner::from_configuration(&config, store, clock.clone())?;
        scanner.initialize(true).await?;

        let mut events = scanner.subscribe();
        let host = name.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => info!(host = %host, "{}", event),
                    Err(e) => info!(host = %host, error = %e, "ownership stream error"),
                }
            }
        });

        let cancel = CancellationToken::new();
        let handle = scanner.start(cancel.clone());
        hosts.push((name, cancel, handle));
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    let (name, cancel, handle) = hosts.remove(1);
    cancel.cancel();
    let stopped = handle.await?;
    info!(host = name, owned = ?stopped.owned_partitions(), "stopped host without releasing");

    tokio::time::sleep(Duration::from_secs(8)).await;
    for (name, cancel, handle) in hosts {
        cancel.cancel();
        let mut scanner = handle.await?;
        info!(host = name, owned = ?scanner.owned_partitions(), "final ownership");
        scanner.release_all().await;
    }
    Ok(())
}
