//! Probe command: reports which configured servers start and what tools
//! each one offers, without involving a model.

use serde::Deserialize;

use crate::inference::config::OrchestrationConfig;
use crate::mcp_client::connection::{ConnectOptions, StdioConnector};
use crate::mcp_client::pool::{probe_servers, ServerProbe};
use crate::mcp_client::types::ServerDescriptor;

/// Inbound probe request: the same `servers` array a chat request carries.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeRequest {
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

/// Connect to every descriptor, snapshot its tools, and disconnect.
pub async fn probe(
    config: &OrchestrationConfig,
    descriptors: &[ServerDescriptor],
) -> Vec<ServerProbe> {
    let connector = StdioConnector::new(ConnectOptions::new(config.working_root()));
    let probes = probe_servers(&connector, descriptors, config.connect_timeout()).await;

    let connected = probes
        .iter()
        .filter(|p| p.status == crate::mcp_client::pool::ProbeStatus::Connected)
        .count();
    tracing::info!(
        servers = probes.len(),
        connected,
        failed = probes.len() - connected,
        "probe finished"
    );
    probes
}
