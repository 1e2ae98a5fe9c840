//! Container records: full inspect JSON plus a filesystem export.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::trim_name;
use crate::backup_set::{read_json, write_json, BackupSet};
use crate::docker::DockerClient;
use crate::utils::errors::{BackupError, Result};

/// `EndpointSettings` fields carried into `NetworkingConfig.EndpointsConfig`.
const ENDPOINT_KEYS: &[&str] = &["Aliases", "Links", "IPAMConfig", "DriverOpts"];

/// Write `containers/{id}.json` and `containers/{id}.tar`. Returns the
/// descriptor so the caller can cascade into volumes and binds.
pub async fn capture_container<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    id: &str,
) -> Result<Value> {
    let descriptor = client.inspect_container(id).await?;
    write_json(&set.container_descriptor(id), &descriptor)?;
    client.export_container(id, &set.container_archive(id)).await?;
    debug!(container = %id, name = %container_name(&descriptor), "Container captured");
    Ok(descriptor)
}

/// Read a stored container descriptor; both the descriptor and the
/// filesystem export must be present.
pub fn load_record(set: &BackupSet, id: &str) -> Result<Value> {
    let descriptor_path = set.container_descriptor(id);
    if !descriptor_path.exists() || !set.container_archive(id).exists() {
        return Err(BackupError::IncompleteBackup(format!(
            "container {id} is missing its descriptor or filesystem export"
        )));
    }
    let descriptor: Value = read_json(&descriptor_path)?;
    if !descriptor["Config"].is_object() {
        return Err(BackupError::IncompleteBackup(format!(
            "container {id} descriptor has no Config"
        )));
    }
    Ok(descriptor)
}

pub fn container_name(descriptor: &Value) -> &str {
    trim_name(descriptor["Name"].as_str().unwrap_or_default())
}

/// Image reference the container was created from (`Config.Image`).
pub fn image_reference(descriptor: &Value) -> &str {
    descriptor["Config"]["Image"].as_str().unwrap_or_default()
}

/// Create body for the daemon: the stored `Config` with `HostConfig` and a
/// `NetworkingConfig` built from the recorded network attachments.
pub fn create_body(descriptor: &Value) -> Value {
    let mut body = descriptor["Config"].as_object().cloned().unwrap_or_else(Map::new);
    body.insert("HostConfig".into(), descriptor["HostConfig"].clone());
    let endpoints: Map<String, Value> = descriptor["NetworkSettings"]["Networks"]
        .as_object()
        .map(|networks| {
            networks
                .iter()
                .map(|(name, endpoint)| (name.clone(), portable_endpoint(endpoint)))
                .collect()
        })
        .unwrap_or_default();
    body.insert("NetworkingConfig".into(), json!({ "EndpointsConfig": endpoints }));
    Value::Object(body)
}

/// Endpoint settings that still mean something on another daemon. IDs and
/// addresses the source daemon assigned are dropped; the daemon resolves a
/// stale `NetworkID` before the network name.
fn portable_endpoint(endpoint: &Value) -> Value {
    let mut portable = Map::new();
    for key in ENDPOINT_KEYS {
        if let Some(value) = endpoint.get(*key).filter(|v| !v.is_null()) {
            portable.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(portable)
}

/// Stop and force-remove a live container with this name, if there is one.
///
/// "Already stopped" and "no such container" are fine; a failed removal is an
/// error. Returns whether a container was removed.
pub async fn remove_existing<C: DockerClient>(client: &C, name: &str) -> Result<bool> {
    let existing = match client.inspect_container(name).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    };
    let id = existing["Id"].as_str().unwrap_or(name).to_string();

    match client.stop_container(&id).await {
        Ok(()) | Err(BackupError::NotModified(_)) => {}
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    }
    client.remove_container(&id, true).await?;
    info!(container = %name, id = %id, "Removed existing container");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::{container_descriptor, MockDockerClient};
    use tempfile::TempDir;

    #[test]
    fn test_create_body_merges_sections() {
        let mut descriptor = container_descriptor("c1", "web", "nginx:latest", "sha256:abc");
        descriptor["HostConfig"]["Binds"] = json!(["/srv/www:/usr/share/nginx/html"]);
        descriptor["NetworkSettings"]["Networks"] = json!({ "frontend": { "Aliases": ["web"] } });

        let body = create_body(&descriptor);
        assert_eq!(body["Image"], "nginx:latest");
        assert_eq!(body["HostConfig"]["Binds"][0], "/srv/www:/usr/share/nginx/html");
        assert_eq!(body["NetworkingConfig"]["EndpointsConfig"]["frontend"]["Aliases"][0], "web");
        assert!(body.get("Name").is_none());
    }

    #[test]
    fn test_create_body_drops_source_network_identity() {
        let mut descriptor = container_descriptor("c1", "web", "nginx:latest", "sha256:abc");
        descriptor["NetworkSettings"]["Networks"] = json!({
            "appnet": {
                "Aliases": ["web"],
                "IPAMConfig": { "IPv4Address": "172.20.0.10" },
                "Links": null,
                "NetworkID": "oldnetid123",
                "EndpointID": "oldep",
                "Gateway": "172.20.0.1",
                "IPAddress": "172.20.0.2",
                "MacAddress": "02:42:ac:14:00:02",
            }
        });

        let body = create_body(&descriptor);
        assert_eq!(
            body["NetworkingConfig"]["EndpointsConfig"]["appnet"],
            json!({
                "Aliases": ["web"],
                "IPAMConfig": { "IPv4Address": "172.20.0.10" },
            })
        );
    }

    #[tokio::test]
    async fn test_remove_existing_stopped_container() {
        let client = MockDockerClient::new().with_container(
            container_descriptor("c1", "web", "nginx:latest", "sha256:abc"),
            false,
        );
        assert!(remove_existing(&client, "web").await.unwrap());
        assert!(client.state().containers.is_empty());
        assert!(!remove_existing(&client, "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_capture_writes_descriptor_and_export() {
        let tmp = TempDir::new().unwrap();
        let set = BackupSet::create(tmp.path()).unwrap();
        let client = MockDockerClient::new().with_container(
            container_descriptor("c1", "web", "nginx:latest", "sha256:abc"),
            true,
        );

        let descriptor = capture_container(&client, &set, "c1").await.unwrap();
        assert_eq!(container_name(&descriptor), "web");
        assert_eq!(std::fs::read(set.container_archive("c1")).unwrap(), b"rootfs:c1");
        assert_eq!(load_record(&set, "c1").unwrap(), descriptor);
    }

    #[test]
    fn test_load_record_requires_export() {
        let tmp = TempDir::new().unwrap();
        let set = BackupSet::create(tmp.path()).unwrap();
        write_json(&set.container_descriptor("c9"), &json!({ "Config": {} })).unwrap();
        let err = load_record(&set, "c9").unwrap_err();
        assert!(matches!(err, BackupError::IncompleteBackup(_)));
    }
}
