//! In-memory Docker daemon for tests.
//!
//! Behaves like the real daemon where the backup and restore paths depend on
//! it: name conflicts, 304 on stopping a stopped container, helper containers
//! that expose a named volume through archive download/upload, and `docker
//! load` producing untagged images.

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{DockerClient, NetworkSpec, VolumeSpec};
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub descriptor: Value,
    pub running: bool,
    /// Bytes returned by a filesystem export
    pub export: Vec<u8>,
    /// Archives uploaded into the container, with their target path
    pub uploads: Vec<(String, Vec<u8>)>,
    /// Volume mounted at the helper path, for helper containers
    pub helper_volume: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MockVolume {
    pub descriptor: Value,
    /// Tar archive of the volume as seen at the helper mount path
    pub archive: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub images: BTreeMap<String, Value>,
    pub containers: BTreeMap<String, MockContainer>,
    pub networks: BTreeMap<String, Value>,
    pub volumes: BTreeMap<String, MockVolume>,
    /// Ordered log of mutating calls, e.g. `create_container:web`
    pub calls: Vec<String>,
    /// Container IDs whose export fails
    pub fail_exports: HashSet<String>,
    /// Volumes whose archive download fails
    pub fail_volume_downloads: HashSet<String>,
    /// Every `start_container` fails
    pub fail_starts: bool,
    next_id: u64,
}

impl MockState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:060}", self.next_id)
    }

    fn find_image(&self, reference: &str) -> Option<&Value> {
        self.images.get(reference).or_else(|| {
            self.images.values().find(|img| {
                img["RepoTags"]
                    .as_array()
                    .map(|tags| tags.iter().any(|t| t.as_str() == Some(reference)))
                    .unwrap_or(false)
            })
        })
    }

    fn find_container_id(&self, id_or_name: &str) -> Option<String> {
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        let wanted = format!("/{}", id_or_name.trim_start_matches('/'));
        self.containers
            .iter()
            .find(|(_, c)| c.descriptor["Name"].as_str() == Some(wanted.as_str()))
            .map(|(id, _)| id.clone())
    }
}

/// Builds an inspect-style container descriptor.
pub fn container_descriptor(id: &str, name: &str, image_ref: &str, image_id: &str) -> Value {
    json!({
        "Id": id,
        "Name": format!("/{name}"),
        "Image": image_id,
        "Config": {
            "Image": image_ref,
            "Cmd": ["sleep", "infinity"],
            "Env": ["PATH=/usr/bin"],
        },
        "HostConfig": { "Binds": [] },
        "Mounts": [],
        "NetworkSettings": { "Networks": {} },
    })
}

/// Tar bytes as the daemon returns them for `/volume-data`.
pub fn volume_tar(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let uid = nix::unistd::getuid().as_raw() as u64;
    let gid = nix::unistd::getgid().as_raw() as u64;
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_uid(uid);
    dir.set_gid(gid);
    dir.set_mtime(1_700_000_000);
    dir.set_size(0);
    builder.append_data(&mut dir, "volume-data/", &[][..]).unwrap();

    for (name, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_mode(*mode);
        header.set_uid(uid);
        header.set_gid(gid);
        header.set_mtime(1_700_000_100);
        header.set_size(content.len() as u64);
        builder
            .append_data(&mut header, format!("volume-data/{name}"), *content)
            .unwrap();
    }
    builder.into_inner().unwrap()
}

#[derive(Default)]
pub struct MockDockerClient {
    state: Mutex<MockState>,
}

impl MockDockerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_image(self, id: &str, tags: &[&str]) -> Self {
        self.state().images.insert(
            id.to_string(),
            json!({
                "Id": id,
                "RepoTags": tags,
                "RepoDigests": [],
                "Size": 1024,
            }),
        );
        self
    }

    pub fn with_container(self, descriptor: Value, running: bool) -> Self {
        let id = descriptor["Id"].as_str().unwrap_or_default().to_string();
        self.state().containers.insert(
            id.clone(),
            MockContainer {
                descriptor,
                running,
                export: format!("rootfs:{id}").into_bytes(),
                uploads: Vec::new(),
                helper_volume: None,
            },
        );
        self
    }

    pub fn with_network(self, name: &str, driver: &str) -> Self {
        self.state().networks.insert(
            name.to_string(),
            json!({
                "Name": name,
                "Id": format!("net-{name}"),
                "Driver": driver,
                "Options": {},
                "Labels": {},
                "Internal": false,
                "Attachable": false,
                "EnableIPv6": false,
            }),
        );
        self
    }

    pub fn with_volume(self, name: &str, archive: Vec<u8>) -> Self {
        self.state().volumes.insert(
            name.to_string(),
            MockVolume {
                descriptor: json!({
                    "Name": name,
                    "Driver": "local",
                    "Labels": { "owner": "tests" },
                    "Options": {},
                    "Mountpoint": format!("/var/lib/docker/volumes/{name}/_data"),
                    "Scope": "local",
                }),
                archive,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl DockerClient for MockDockerClient {
    async fn info(&self) -> Result<Value> {
        Ok(json!({ "Name": "mock-host", "ServerVersion": "27.0.0" }))
    }

    async fn version(&self) -> Result<Value> {
        Ok(json!({ "Version": "27.0.0", "ApiVersion": "1.46" }))
    }

    async fn list_images(&self) -> Result<Vec<Value>> {
        Ok(self.state().images.values().cloned().collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Value> {
        self.state()
            .find_image(reference)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("No such image: {reference}")))
    }

    async fn export_image(&self, id: &str, dest: &Path) -> Result<()> {
        let image = self
            .state()
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("No such image: {id}")))?;
        std::fs::write(dest, serde_json::to_vec(&image)?)?;
        Ok(())
    }

    async fn load_image(&self, source: &Path) -> Result<()> {
        let mut image: Value = serde_json::from_slice(&std::fs::read(source)?)?;
        image["RepoTags"] = json!([]);
        let id = image["Id"].as_str().unwrap_or_default().to_string();
        let mut state = self.state();
        state.calls.push(format!("load_image:{id}"));
        state.images.insert(id, image);
        Ok(())
    }

    async fn tag_image(&self, id: &str, repo: &str, tag: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("tag_image:{repo}:{tag}"));
        let image = state
            .images
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such image: {id}")))?;
        if let Some(tags) = image["RepoTags"].as_array_mut() {
            tags.push(json!(format!("{repo}:{tag}")));
        }
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("pull_image:{reference}"));
        let id = format!("sha256:pulled-{reference}");
        state.images.insert(
            id.clone(),
            json!({ "Id": id, "RepoTags": [reference], "RepoDigests": [] }),
        );
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<Value>> {
        let state = self.state();
        Ok(state
            .containers
            .values()
            .map(|c| {
                let d = &c.descriptor;
                json!({
                    "Id": d["Id"],
                    "Names": [d["Name"]],
                    "Image": d["Config"]["Image"],
                    "ImageID": d["Image"],
                    "State": if c.running { "running" } else { "exited" },
                    "NetworkSettings": { "Networks": d["NetworkSettings"]["Networks"] },
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        let state = self.state();
        state
            .find_container_id(id)
            .and_then(|cid| state.containers.get(&cid))
            .map(|c| c.descriptor.clone())
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))
    }

    async fn create_container(&self, name: Option<&str>, body: &Value) -> Result<String> {
        let mut state = self.state();
        if let Some(name) = name {
            if state.find_container_id(name).is_some() {
                return Err(BackupError::Conflict(format!(
                    "container name \"/{name}\" is already in use"
                )));
            }
        }

        let image_ref = body["Image"].as_str().unwrap_or_default().to_string();
        let image_id = state
            .find_image(&image_ref)
            .and_then(|img| img["Id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| BackupError::NotFound(format!("No such image: {image_ref}")))?;

        let id = state.fresh_id("c");
        let name = name.map(str::to_string).unwrap_or_else(|| id.clone());
        state.calls.push(format!("create_container:{name}"));

        let mut config = body.clone();
        let host_config = config
            .as_object_mut()
            .and_then(|o| o.remove("HostConfig"))
            .unwrap_or_else(|| json!({}));
        let networking = config
            .as_object_mut()
            .and_then(|o| o.remove("NetworkingConfig"))
            .unwrap_or_else(|| json!({}));

        let helper_volume = host_config["Binds"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|b| b.as_str())
            .filter_map(|b| b.split(':').next())
            .find(|src| !src.starts_with('/'))
            .map(str::to_string);
        if let Some(volume) = &helper_volume {
            if !state.volumes.contains_key(volume) {
                state.volumes.insert(
                    volume.clone(),
                    MockVolume {
                        descriptor: json!({ "Name": volume, "Driver": "local" }),
                        archive: Vec::new(),
                    },
                );
            }
        }

        let descriptor = json!({
            "Id": id,
            "Name": format!("/{name}"),
            "Image": image_id,
            "Config": config,
            "HostConfig": host_config,
            "Mounts": [],
            "NetworkSettings": { "Networks": networking["EndpointsConfig"] },
        });
        state.containers.insert(
            id.clone(),
            MockContainer {
                descriptor,
                running: false,
                export: Vec::new(),
                uploads: Vec::new(),
                helper_volume,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("start_container:{id}"));
        if state.fail_starts {
            return Err(BackupError::Docker(format!("start container {id}: injected failure")));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("stop_container:{id}"));
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        if !container.running {
            return Err(BackupError::NotModified(format!("container {id} already stopped")));
        }
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("remove_container:{id}"));
        let running = state
            .containers
            .get(id)
            .map(|c| c.running)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        if running && !force {
            return Err(BackupError::Conflict(format!("container {id} is running")));
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn export_container(&self, id: &str, dest: &Path) -> Result<()> {
        let state = self.state();
        if state.fail_exports.contains(id) {
            return Err(BackupError::Docker(format!("export container {id}: injected failure")));
        }
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        std::fs::write(dest, &container.export)?;
        Ok(())
    }

    async fn download_archive(&self, id: &str, path: &str, dest: &Path) -> Result<()> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        if !container.running {
            return Err(BackupError::Docker(format!("container {id} is not running")));
        }
        let volume = container
            .helper_volume
            .clone()
            .ok_or_else(|| BackupError::NotFound(format!("{path} not found in {id}")))?;
        if state.fail_volume_downloads.contains(&volume) {
            return Err(BackupError::Docker(format!("download {path}: injected failure")));
        }
        let archive = state
            .volumes
            .get(&volume)
            .map(|v| v.archive.clone())
            .unwrap_or_default();
        std::fs::write(dest, archive)?;
        Ok(())
    }

    async fn upload_archive(&self, id: &str, path: &str, source: &Path) -> Result<()> {
        let bytes = std::fs::read(source)?;
        let mut state = self.state();
        state.calls.push(format!("upload_archive:{id}:{path}"));
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("No such container: {id}")))?;
        match container.helper_volume.clone() {
            Some(volume) => {
                if let Some(v) = state.volumes.get_mut(&volume) {
                    v.archive = bytes;
                }
            }
            None => container.uploads.push((path.to_string(), bytes)),
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<Value>> {
        Ok(self.state().networks.values().cloned().collect())
    }

    async fn inspect_network(&self, name: &str) -> Result<Value> {
        self.state()
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("network {name} not found")))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("create_network:{}", spec.name));
        if state.networks.contains_key(&spec.name) {
            return Err(BackupError::Conflict(format!(
                "network with name {} already exists",
                spec.name
            )));
        }
        state.networks.insert(
            spec.name.clone(),
            json!({
                "Name": spec.name,
                "Driver": spec.driver,
                "Options": spec.options,
                "Labels": spec.labels,
                "Internal": spec.internal,
                "Attachable": spec.attachable,
                "EnableIPv6": spec.enable_ipv6,
            }),
        );
        Ok(())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Value> {
        self.state()
            .volumes
            .get(name)
            .map(|v| v.descriptor.clone())
            .ok_or_else(|| BackupError::NotFound(format!("get {name}: no such volume")))
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("create_volume:{}", spec.name));
        state.volumes.entry(spec.name.clone()).or_insert_with(|| MockVolume {
            descriptor: json!({
                "Name": spec.name,
                "Driver": spec.driver,
                "Labels": spec.labels,
                "Options": spec.driver_opts,
            }),
            archive: Vec::new(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_inspect_image_by_tag() {
        let client = MockDockerClient::new().with_image("sha256:abc", &["nginx:latest"]);
        let image = client.inspect_image("nginx:latest").await.unwrap();
        assert_eq!(image["Id"], "sha256:abc");
        assert!(client.inspect_image("redis:7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn mock_stop_stopped_container_is_not_modified() {
        let client = MockDockerClient::new().with_container(
            container_descriptor("c1", "web", "nginx:latest", "sha256:abc"),
            false,
        );
        let err = client.stop_container("c1").await.unwrap_err();
        assert!(matches!(err, BackupError::NotModified(_)));
    }

    #[tokio::test]
    async fn mock_create_conflicts_on_name() {
        let client = MockDockerClient::new()
            .with_image("sha256:abc", &["nginx:latest"])
            .with_container(
                container_descriptor("c1", "web", "nginx:latest", "sha256:abc"),
                true,
            );
        let err = client
            .create_container(Some("web"), &json!({ "Image": "nginx:latest" }))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn mock_network_conflict() {
        let client = MockDockerClient::new().with_network("app", "bridge");
        let spec = NetworkSpec {
            name: "app".into(),
            driver: "bridge".into(),
            ..Default::default()
        };
        assert!(client.create_network(&spec).await.unwrap_err().is_conflict());
    }
}
