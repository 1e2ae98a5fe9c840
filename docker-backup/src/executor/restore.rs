//! Restore orchestration.
//!
//! Order: helper image -> images (load + retag) -> networks -> containers.
//! Each container restore removes a same-named live container, repairs a
//! missing image, restores its volumes and binds, then creates, populates and
//! starts the container.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::report::{ResourceKind, RunReport};
use crate::backup_set::BackupSet;
use crate::capture::bind::restore_binds;
use crate::capture::container::{
    container_name, create_body, image_reference, load_record, remove_existing,
};
use crate::capture::ensure_image;
use crate::capture::image::{find_image_record, load_mappings, restore_image, ImageMappings};
use crate::capture::network::restore_network;
use crate::capture::volume::{referenced_volumes, restore_volume};
use crate::docker::DockerClient;
use crate::utils::errors::Result;

/// State shared by the container restores of one run
struct RestoreRun {
    report: RunReport,
    mappings: ImageMappings,
    restored_images: HashSet<String>,
    restored_volumes: HashSet<String>,
}

pub struct RestoreExecutor<C: DockerClient> {
    client: Arc<C>,
    set: BackupSet,
    helper_image: String,
}

impl<C: DockerClient> RestoreExecutor<C> {
    pub fn new(client: Arc<C>, set: BackupSet, helper_image: impl Into<String>) -> Self {
        Self {
            client,
            set,
            helper_image: helper_image.into(),
        }
    }

    fn start_run(&self, operation: &'static str) -> Result<RestoreRun> {
        Ok(RestoreRun {
            report: RunReport::new(operation),
            mappings: load_mappings(&self.set)?,
            restored_images: HashSet::new(),
            restored_volumes: HashSet::new(),
        })
    }

    /// Restore everything in the backup set.
    pub async fn run_full(&self) -> Result<RunReport> {
        let mut run = self.start_run("restore")?;
        info!(root = %self.set.root().display(), "Starting full restore");

        if let Err(e) = ensure_image(self.client.as_ref(), &self.helper_image).await {
            run.report.failed(ResourceKind::Image, self.helper_image.as_str(), e);
        }

        for id in BackupSet::record_ids(&self.set.images_dir())? {
            let result = restore_image(self.client.as_ref(), &self.set, &id, &run.mappings).await;
            if run.report.record(ResourceKind::Image, id.as_str(), result).is_some() {
                run.restored_images.insert(id);
            }
        }

        for name in BackupSet::record_ids(&self.set.networks_dir())? {
            match restore_network(self.client.as_ref(), &self.set, &name).await {
                Ok(true) => run.report.succeeded(ResourceKind::Network, name),
                Ok(false) => run.report.skipped(ResourceKind::Network, name),
                Err(e) => run.report.failed(ResourceKind::Network, name, e),
            }
        }

        for id in BackupSet::record_ids(&self.set.containers_dir())? {
            info!(container = %id, "Restoring container");
            let result = self.restore_container(&id, &mut run).await;
            run.report.record(ResourceKind::Container, id, result);
        }

        run.report.log_summary();
        Ok(run.report)
    }

    /// Restore a single container record (and whatever it depends on).
    pub async fn run_container(&self, id: &str) -> Result<RunReport> {
        let mut run = self.start_run("container restore")?;
        let result = self.restore_container(id, &mut run).await;
        run.report.record(ResourceKind::Container, id, result);
        run.report.log_summary();
        Ok(run.report)
    }

    async fn restore_container(&self, id: &str, run: &mut RestoreRun) -> Result<String> {
        let client = self.client.as_ref();
        let descriptor = load_record(&self.set, id)?;
        let name = container_name(&descriptor).to_string();

        if !name.is_empty() {
            remove_existing(client, &name).await?;
        }

        self.repair_image(&descriptor, run).await?;

        for volume in referenced_volumes(&descriptor) {
            if run.restored_volumes.contains(&volume) {
                continue;
            }
            restore_volume(client, &self.set, &self.helper_image, &volume).await?;
            run.report.succeeded(ResourceKind::Volume, volume.as_str());
            run.restored_volumes.insert(volume);
        }

        let binds_dir = self.set.binds_dir(id);
        let restored_binds = tokio::task::spawn_blocking(move || restore_binds(&binds_dir)).await??;
        if restored_binds > 0 {
            run.report.succeeded(ResourceKind::Bind, format!("{id} ({restored_binds})"));
        }

        let new_id = client
            .create_container((!name.is_empty()).then_some(name.as_str()), &create_body(&descriptor))
            .await?;
        client
            .upload_archive(&new_id, "/", &self.set.container_archive(id))
            .await?;
        client.start_container(&new_id).await?;

        info!(container = %name, from = %id, id = %new_id, "Container restored");
        Ok(new_id)
    }

    /// Load the recorded image when the daemon does not have it.
    async fn repair_image(&self, descriptor: &serde_json::Value, run: &mut RestoreRun) -> Result<()> {
        let reference = image_reference(descriptor);
        let image_id = descriptor["Image"].as_str();
        let lookup = if reference.is_empty() { image_id.unwrap_or_default() } else { reference };

        match self.client.inspect_image(lookup).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(image = %lookup, "Image missing, restoring it from backup");
        let Some(record) = find_image_record(&self.set, &run.mappings, image_id, reference)? else {
            warn!(image = %lookup, "No image record matches");
            return Ok(());
        };
        if run.restored_images.contains(&record) {
            return Ok(());
        }

        let result = restore_image(self.client.as_ref(), &self.set, &record, &run.mappings).await;
        if run.report.record(ResourceKind::Image, record.as_str(), result).is_some() {
            run.restored_images.insert(record);
        }
        Ok(())
    }
}
