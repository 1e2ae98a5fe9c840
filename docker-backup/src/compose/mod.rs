//! Compose project backup and restore.
//!
//! Stored under `compose/{project}/`:
//! - `docker-compose.yml` and `.env` as found in the project directory
//! - `project.json` with the original directory and the service list
//! - `binds/{service}/` bind records for host paths the services mount
//!
//! Service images and named volumes go to the regular `images/` and
//! `volumes/` records. Restore puts files, binds, images and volumes back;
//! starting the services is left to `docker compose up`.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::backup_set::{read_json, write_json, BackupSet};
use crate::capture::bind::{capture_binds, restore_binds, BindMount};
use crate::capture::image::{
    capture_image, find_image_record, load_mappings, merge_mappings, restore_image, ImageMappings,
};
use crate::capture::volume::{capture_volume, restore_volume};
use crate::docker::DockerClient;
use crate::executor::{ResourceKind, RunReport};
use crate::utils::errors::{BackupError, Result};
use loader::{load_project, ComposeService, MountKind, ENV_FILE};

pub use loader::{ComposeProject, EnvMap};

const COMPOSE_FILE: &str = "docker-compose.yml";
const PROJECT_FILE: &str = "project.json";

/// Contents of `project.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub name: String,
    pub directory: PathBuf,
    /// File name of the compose file in `directory`
    pub compose_file: String,
    pub has_env_file: bool,
    pub services: Vec<ComposeService>,
}

impl ProjectRecord {
    fn images(&self) -> BTreeSet<&str> {
        self.services.iter().filter_map(|s| s.image.as_deref()).collect()
    }

    fn volumes(&self) -> BTreeSet<&str> {
        self.services
            .iter()
            .flat_map(|s| &s.volumes)
            .filter(|m| m.kind == MountKind::Volume)
            .map(|m| m.source.as_str())
            .collect()
    }
}

pub struct ComposeExecutor<C: DockerClient> {
    client: Arc<C>,
    set: BackupSet,
    helper_image: String,
}

impl<C: DockerClient> ComposeExecutor<C> {
    pub fn new(client: Arc<C>, set: BackupSet, helper_image: impl Into<String>) -> Self {
        Self {
            client,
            set,
            helper_image: helper_image.into(),
        }
    }

    /// Back up the project whose compose file is at (or in) `path`.
    pub async fn backup(&self, path: &std::path::Path) -> Result<RunReport> {
        let project = load_project(path)?;
        info!(project = %project.name, dir = %project.dir.display(), "Starting compose backup");
        let dir = self.set.compose_dir(&project.name);
        fs::create_dir_all(&dir)?;

        let mut report = RunReport::new("compose backup");

        fs::copy(&project.compose_file, dir.join(COMPOSE_FILE))?;
        if let Some(env_file) = &project.env_file {
            fs::copy(env_file, dir.join(ENV_FILE))?;
        }

        let record = ProjectRecord {
            name: project.name.clone(),
            directory: project.dir.clone(),
            compose_file: project
                .compose_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| COMPOSE_FILE.to_string()),
            has_env_file: project.env_file.is_some(),
            services: project.services.clone(),
        };
        write_json(&dir.join(PROJECT_FILE), &record)?;
        report.succeeded(ResourceKind::Compose, project.name.as_str());

        for service in &record.services {
            let binds: Vec<BindMount> = service
                .volumes
                .iter()
                .filter(|m| m.kind == MountKind::Bind)
                .map(|m| BindMount {
                    host_path: PathBuf::from(&m.source),
                    container_path: m.target.clone(),
                })
                .collect();
            if binds.is_empty() {
                continue;
            }
            let binds_dir = dir.join("binds").join(&service.name);
            let result = tokio::task::spawn_blocking(move || capture_binds(&binds_dir, &binds))
                .await
                .map_err(BackupError::from)
                .and_then(|r| r);
            report.record(ResourceKind::Bind, service.name.as_str(), result);
        }

        let mut mappings = ImageMappings::new();
        for image in record.images() {
            let result = match self.client.inspect_image(image).await {
                Ok(descriptor) => match descriptor["Id"].as_str() {
                    Some(id) => capture_image(self.client.as_ref(), &self.set, id)
                        .await
                        .map(|m| (id.to_string(), m)),
                    None => Err(BackupError::Docker(format!("image {image} has no Id"))),
                },
                Err(e) => Err(e),
            };
            if let Some((id, mapping)) = report.record(ResourceKind::Image, image, result) {
                mappings.insert(id, mapping);
            }
        }
        if !mappings.is_empty() {
            let merged = merge_mappings(&self.set, mappings);
            report.record(ResourceKind::Config, "mappings.json", merged);
        }

        for volume in record.volumes() {
            let result =
                capture_volume(self.client.as_ref(), &self.set, &self.helper_image, volume).await;
            report.record(ResourceKind::Volume, volume, result);
        }

        report.log_summary();
        Ok(report)
    }

    /// Put a backed-up project back: files into its original directory, then
    /// binds, images and volumes.
    pub async fn restore(&self, project: &str) -> Result<RunReport> {
        let dir = self.set.compose_dir(project);
        let record_path = dir.join(PROJECT_FILE);
        if !record_path.exists() {
            return Err(BackupError::NotFound(format!(
                "no compose backup for project {project}"
            )));
        }
        let record: ProjectRecord = read_json(&record_path)?;
        info!(project = %record.name, dir = %record.directory.display(), "Starting compose restore");

        let mut report = RunReport::new("compose restore");

        fs::create_dir_all(&record.directory)?;
        fs::copy(dir.join(COMPOSE_FILE), record.directory.join(&record.compose_file))?;
        if record.has_env_file {
            fs::copy(dir.join(ENV_FILE), record.directory.join(ENV_FILE))?;
        }
        report.succeeded(ResourceKind::Compose, record.name.as_str());

        for service in &record.services {
            let binds_dir = dir.join("binds").join(&service.name);
            if !binds_dir.is_dir() {
                continue;
            }
            let result = tokio::task::spawn_blocking(move || restore_binds(&binds_dir))
                .await
                .map_err(BackupError::from)
                .and_then(|r| r);
            report.record(ResourceKind::Bind, service.name.as_str(), result);
        }

        let mappings = load_mappings(&self.set)?;
        for image in record.images() {
            let result = self.restore_missing_image(image, &mappings).await;
            report.record(ResourceKind::Image, image, result);
        }

        for volume in record.volumes() {
            let result =
                restore_volume(self.client.as_ref(), &self.set, &self.helper_image, volume).await;
            report.record(ResourceKind::Volume, volume, result);
        }

        report.log_summary();
        Ok(report)
    }

    async fn restore_missing_image(&self, image: &str, mappings: &ImageMappings) -> Result<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let id = find_image_record(&self.set, mappings, None, image)?.ok_or_else(|| {
            BackupError::IncompleteBackup(format!("no image record for {image}"))
        })?;
        restore_image(self.client.as_ref(), &self.set, &id, mappings).await
    }
}
