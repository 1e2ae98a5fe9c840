//! Network records: descriptor only, no payload.

use serde_json::Value;
use tracing::{debug, info};

use super::string_map;
use crate::backup_set::{read_json, write_json, BackupSet};
use crate::docker::{DockerClient, NetworkSpec};
use crate::utils::errors::{BackupError, Result};

const DEFAULT_NETWORKS: [&str; 3] = ["bridge", "host", "none"];
const PLATFORM_PREFIXES: [&str; 2] = ["docker-", "com.docker."];

/// Networks the daemon or platform manages itself. Never captured or restored.
pub fn is_default_network(name: &str) -> bool {
    DEFAULT_NETWORKS.contains(&name) || PLATFORM_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Write `networks/{name}.json`. Returns `false` for excluded networks.
pub async fn capture_network<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    name: &str,
) -> Result<bool> {
    if is_default_network(name) {
        debug!(network = %name, "Skipping default network");
        return Ok(false);
    }
    let descriptor = client.inspect_network(name).await?;
    write_json(&set.network_descriptor(name), &descriptor)?;
    debug!(network = %name, "Network captured");
    Ok(true)
}

/// Creation parameters carried over from a stored descriptor.
pub fn network_spec(descriptor: &Value) -> Result<NetworkSpec> {
    let name = descriptor["Name"]
        .as_str()
        .ok_or_else(|| BackupError::IncompleteBackup("network descriptor has no Name".into()))?;

    Ok(NetworkSpec {
        name: name.to_string(),
        driver: descriptor["Driver"].as_str().unwrap_or("bridge").to_string(),
        options: string_map(&descriptor["Options"]),
        labels: string_map(&descriptor["Labels"]),
        internal: descriptor["Internal"].as_bool().unwrap_or(false),
        attachable: descriptor["Attachable"].as_bool().unwrap_or(false),
        enable_ipv6: descriptor["EnableIPv6"].as_bool().unwrap_or(false),
    })
}

/// Recreate a network from `networks/{name}.json`.
///
/// Returns `false` when nothing was created: excluded name, or a network of
/// that name already exists.
pub async fn restore_network<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    name: &str,
) -> Result<bool> {
    let descriptor: Value = read_json(&set.network_descriptor(name))?;
    let spec = network_spec(&descriptor)?;

    if is_default_network(&spec.name) {
        debug!(network = %spec.name, "Skipping default network");
        return Ok(false);
    }

    match client.create_network(&spec).await {
        Ok(()) => {
            info!(network = %spec.name, driver = %spec.driver, "Network restored");
            Ok(true)
        }
        Err(e) if e.is_conflict() => {
            info!(network = %spec.name, "Network already exists, skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
