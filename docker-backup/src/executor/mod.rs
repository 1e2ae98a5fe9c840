//! Backup and restore orchestration.
//!
//! A full backup runs Images -> Networks -> daemon config -> Containers (each
//! cascading into its volumes and binds) -> verification. Restore runs the
//! inverse. Resources are processed one at a time; a failing resource is
//! recorded in the [`RunReport`] and the run moves on. Only setup failures
//! (backup root unusable, scoped image not found) end a run early.

pub mod manifest;
pub mod report;
pub mod restore;

use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backup_set::{write_json, BackupSet};
use crate::capture::bind::{capture_binds, discover_binds};
use crate::capture::container::capture_container;
use crate::capture::image::{capture_image, merge_mappings, ImageMappings};
use crate::capture::network::{capture_network, is_default_network};
use crate::capture::volume::{capture_volume, referenced_volumes};
use crate::docker::DockerClient;
use crate::utils::errors::{BackupError, Result};

pub use report::{ResourceKind, RunReport};
pub use restore::RestoreExecutor;

/// Main backup executor
pub struct BackupExecutor<C: DockerClient> {
    client: Arc<C>,
    set: BackupSet,
    helper_image: String,
}

impl<C: DockerClient> BackupExecutor<C> {
    pub fn new(client: Arc<C>, set: BackupSet, helper_image: impl Into<String>) -> Self {
        Self {
            client,
            set,
            helper_image: helper_image.into(),
        }
    }

    pub fn backup_set(&self) -> &BackupSet {
        &self.set
    }

    /// Capture everything the daemon has.
    pub async fn run_full(&self) -> Result<RunReport> {
        let mut report = RunReport::new("backup");
        info!(root = %self.set.root().display(), "Starting full backup");

        self.capture_images(&mut report).await;
        self.capture_networks(&mut report).await;

        let config = self.capture_daemon_config().await;
        report.record(ResourceKind::Config, "daemon.json", config);

        match self.client.list_containers().await {
            Ok(containers) => {
                let mut captured_volumes = HashSet::new();
                for summary in &containers {
                    if let Some(id) = summary["Id"].as_str() {
                        self.capture_container_tree(id, &mut report, &mut captured_volumes)
                            .await;
                    }
                }
            }
            Err(e) => report.failed(ResourceKind::Container, "list", e),
        }

        let verification = manifest::write_verification(self.client.as_ref(), &self.set).await;
        report.record(ResourceKind::Verification, "checksums.json", verification);

        report.log_summary();
        Ok(report)
    }

    /// Capture one image (matched by exact tag, then by tag substring), the
    /// containers created from it, and the networks those containers use.
    pub async fn run_image(&self, name: &str) -> Result<RunReport> {
        let image = self.find_image(name).await?;
        let image_id = image["Id"]
            .as_str()
            .ok_or_else(|| BackupError::Docker(format!("image matching {name} has no Id")))?
            .to_string();
        info!(image = %name, id = %image_id, "Starting image backup");

        let mut report = RunReport::new("image backup");
        if let Some(mapping) = report.record(
            ResourceKind::Image,
            image_id.as_str(),
            capture_image(self.client.as_ref(), &self.set, &image_id).await,
        ) {
            let merged = merge_mappings(&self.set, ImageMappings::from([(image_id.clone(), mapping)]));
            report.record(ResourceKind::Config, "mappings.json", merged);
        }

        let containers: Vec<Value> = match self.client.list_containers().await {
            Ok(all) => all
                .into_iter()
                .filter(|c| c["ImageID"].as_str() == Some(image_id.as_str()))
                .collect(),
            Err(e) => {
                report.failed(ResourceKind::Container, "list", e);
                Vec::new()
            }
        };
        info!(image = %image_id, containers = containers.len(), "Found dependent containers");

        let networks: BTreeSet<String> = containers
            .iter()
            .filter_map(|c| c["NetworkSettings"]["Networks"].as_object())
            .flat_map(|n| n.keys().cloned())
            .filter(|n| !is_default_network(n))
            .collect();
        for network in &networks {
            let result = capture_network(self.client.as_ref(), &self.set, network).await;
            report.record(ResourceKind::Network, network.as_str(), result);
        }

        let mut captured_volumes = HashSet::new();
        for summary in &containers {
            if let Some(id) = summary["Id"].as_str() {
                self.capture_container_tree(id, &mut report, &mut captured_volumes)
                    .await;
            }
        }

        let verification = manifest::write_verification(self.client.as_ref(), &self.set).await;
        report.record(ResourceKind::Verification, "checksums.json", verification);

        report.log_summary();
        Ok(report)
    }

    async fn find_image(&self, name: &str) -> Result<Value> {
        let images = self.client.list_images().await?;
        let tags = |img: &Value| -> Vec<String> {
            img["RepoTags"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        };

        images
            .iter()
            .find(|img| tags(img).iter().any(|t| t == name))
            .or_else(|| images.iter().find(|img| tags(img).iter().any(|t| t.contains(name))))
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("no image matches {name}")))
    }

    async fn capture_images(&self, report: &mut RunReport) {
        let images = match self.client.list_images().await {
            Ok(images) => images,
            Err(e) => return report.failed(ResourceKind::Image, "list", e),
        };
        info!(count = images.len(), "Capturing images");

        let mut mappings = ImageMappings::new();
        for image in &images {
            let Some(id) = image["Id"].as_str() else { continue };
            let result = capture_image(self.client.as_ref(), &self.set, id).await;
            if let Some(mapping) = report.record(ResourceKind::Image, id, result) {
                mappings.insert(id.to_string(), mapping);
            }
        }

        let merged = merge_mappings(&self.set, mappings);
        report.record(ResourceKind::Config, "mappings.json", merged);
    }

    async fn capture_networks(&self, report: &mut RunReport) {
        let networks = match self.client.list_networks().await {
            Ok(networks) => networks,
            Err(e) => return report.failed(ResourceKind::Network, "list", e),
        };

        for network in &networks {
            let Some(name) = network["Name"].as_str() else { continue };
            match capture_network(self.client.as_ref(), &self.set, name).await {
                Ok(true) => report.succeeded(ResourceKind::Network, name),
                Ok(false) => report.skipped(ResourceKind::Network, name),
                Err(e) => report.failed(ResourceKind::Network, name, e),
            }
        }
    }

    async fn capture_daemon_config(&self) -> Result<()> {
        let info = self.client.info().await?;
        let version = self.client.version().await?;
        write_json(&self.set.daemon_config(), &json!({ "info": info, "version": version }))
    }

    /// Container record, then each not-yet-captured volume, then its binds.
    async fn capture_container_tree(
        &self,
        id: &str,
        report: &mut RunReport,
        captured_volumes: &mut HashSet<String>,
    ) {
        let result = capture_container(self.client.as_ref(), &self.set, id).await;
        let Some(descriptor) = report.record(ResourceKind::Container, id, result) else {
            return;
        };

        for volume in referenced_volumes(&descriptor) {
            if !captured_volumes.insert(volume.clone()) {
                debug!(volume = %volume, "Volume already captured in this run");
                continue;
            }
            let result =
                capture_volume(self.client.as_ref(), &self.set, &self.helper_image, &volume).await;
            report.record(ResourceKind::Volume, volume, result);
        }

        let binds = discover_binds(&descriptor);
        if binds.is_empty() {
            return;
        }
        let dir = self.set.binds_dir(id);
        let result = tokio::task::spawn_blocking(move || capture_binds(&dir, &binds))
            .await
            .map_err(BackupError::from)
            .and_then(|r| r);
        match result {
            Ok(records) => {
                for record in records {
                    report.succeeded(ResourceKind::Bind, record.host_path.display().to_string());
                }
            }
            Err(e) => report.failed(ResourceKind::Bind, id, e),
        }
    }
}
