//! grafop kubehub: typed cluster access, event recording, API discovery and
//! per-instance state snapshots.

#![forbid(unsafe_code)]

mod cluster;
mod memory;
mod state;

use grafop_core::crd::ROUTE_GROUP;
use grafop_core::{Error, Result};
use kube::discovery::Discovery;
use kube::Client;
use tracing::info;

pub use cluster::{Cluster, EventKind, EventNote, KubeCluster, Object};
pub use memory::{MemoryCluster, RecordedEvent};
pub use state::ClusterState;

/// Whether the API server serves OpenShift routes.
pub async fn routes_available(client: Client) -> Result<bool> {
    let discovery = Discovery::new(client)
        .filter(&[ROUTE_GROUP])
        .run()
        .await
        .map_err(|e| Error::Network(format!("api discovery: {}", e)))?;
    let found = discovery
        .groups()
        .any(|g| g.recommended_resources().iter().any(|(ar, _)| ar.kind == "Route"));
    info!(routes = found, "route api discovery");
    Ok(found)
}
