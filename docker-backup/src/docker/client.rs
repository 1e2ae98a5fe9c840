//! Production [`DockerClient`] backed by `bollard`.

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CreateImageOptions, ImportImageOptions, ListImagesOptions, TagImageOptions};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{DockerClient, NetworkSpec, VolumeSpec};
use crate::config::DockerConfig;
use crate::utils::errors::{BackupError, Result};

/// Classifies a bollard error by HTTP status.
fn map_docker_error(err: DockerError, context: &str) -> BackupError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BackupError::NotFound(format!("{context}: {message}")),
        DockerError::DockerResponseServerError {
            status_code: 409,
            message,
        } => BackupError::Conflict(format!("{context}: {message}")),
        DockerError::DockerResponseServerError {
            status_code: 304,
            message,
        } => BackupError::NotModified(format!("{context}: {message}")),
        other => BackupError::Docker(format!("{context}: {other}")),
    }
}

fn to_descriptor<T: Serialize>(model: T) -> Result<Value> {
    Ok(serde_json::to_value(model)?)
}

/// Drains a byte stream into `dest`. A partially written file is removed on
/// failure so no truncated payload is left behind.
async fn write_stream<S>(stream: S, dest: &Path, context: &str) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, DockerError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;

    let outcome: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_docker_error(e, context))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        drop(file);
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e);
    }

    debug!(bytes = written, dest = %dest.display(), "{}", context);
    Ok(written)
}

/// Docker client communicating over the local socket (or a configured one).
pub struct BollardDockerClient {
    docker: Arc<Docker>,
    stop_timeout_secs: i64,
}

impl BollardDockerClient {
    /// Connects using the settings in `config`.
    ///
    /// Falls back to the platform default socket when no socket is set.
    pub fn connect(config: &DockerConfig) -> Result<Self> {
        let docker = match &config.socket {
            Some(socket) => {
                Docker::connect_with_socket(socket, config.timeout_secs, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| {
                        BackupError::Docker(format!("failed to connect to docker at {socket}: {e}"))
                    })?
            }
            None => Docker::connect_with_local_defaults()
                .map_err(|e| BackupError::Docker(format!("failed to connect to docker: {e}")))?
                .with_timeout(Duration::from_secs(config.timeout_secs)),
        };

        Ok(Self {
            docker: Arc::new(docker),
            stop_timeout_secs: config.stop_timeout_secs,
        })
    }
}

impl DockerClient for BollardDockerClient {
    async fn info(&self) -> Result<Value> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| map_docker_error(e, "docker info"))?;
        to_descriptor(info)
    }

    async fn version(&self) -> Result<Value> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| map_docker_error(e, "docker version"))?;
        to_descriptor(version)
    }

    async fn list_images(&self) -> Result<Vec<Value>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| map_docker_error(e, "list images"))?;
        images.into_iter().map(to_descriptor).collect()
    }

    async fn inspect_image(&self, reference: &str) -> Result<Value> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| map_docker_error(e, &format!("inspect image {reference}")))?;
        to_descriptor(image)
    }

    async fn export_image(&self, id: &str, dest: &Path) -> Result<()> {
        let stream = self.docker.export_image(id);
        write_stream(stream, dest, &format!("export image {id}")).await?;
        Ok(())
    }

    async fn load_image(&self, source: &Path) -> Result<()> {
        let tarball = tokio::fs::read(source).await?;
        let mut stream =
            self.docker
                .import_image(ImportImageOptions { quiet: true }, Bytes::from(tarball), None);

        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| map_docker_error(e, "load image"))?;
            if let Some(error) = progress.error {
                return Err(BackupError::Docker(format!(
                    "load image {}: {}",
                    source.display(),
                    error
                )));
            }
        }
        Ok(())
    }

    async fn tag_image(&self, id: &str, repo: &str, tag: &str) -> Result<()> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker
            .tag_image(id, Some(options))
            .await
            .map_err(|e| map_docker_error(e, &format!("tag image {id} as {repo}:{tag}")))
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(progress) = stream.next().await {
            let progress =
                progress.map_err(|e| map_docker_error(e, &format!("pull image {reference}")))?;
            if let Some(status) = progress.status {
                debug!(image = reference, "{}", status);
            }
        }
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<Value>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_docker_error(e, "list containers"))?;
        containers.into_iter().map(to_descriptor).collect()
    }

    async fn inspect_container(&self, id: &str) -> Result<Value> {
        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| map_docker_error(e, &format!("inspect container {id}")))?;
        to_descriptor(details)
    }

    async fn create_container(&self, name: Option<&str>, body: &Value) -> Result<String> {
        let config: Config<String> = serde_json::from_value(body.clone())?;
        let options = name.map(|n| CreateContainerOptions {
            name: n.to_string(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| {
                map_docker_error(e, &format!("create container {}", name.unwrap_or("<unnamed>")))
            })?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_docker_error(e, &format!("start container {id}")))
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
            .map_err(|e| map_docker_error(e, &format!("stop container {id}")))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_docker_error(e, &format!("remove container {id}")))
    }

    async fn export_container(&self, id: &str, dest: &Path) -> Result<()> {
        let stream = self.docker.export_container(id);
        write_stream(stream, dest, &format!("export container {id}")).await?;
        Ok(())
    }

    async fn download_archive(&self, id: &str, path: &str, dest: &Path) -> Result<()> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let stream = self.docker.download_from_container(id, Some(options));
        write_stream(stream, dest, &format!("download {path} from {id}")).await?;
        Ok(())
    }

    async fn upload_archive(&self, id: &str, path: &str, source: &Path) -> Result<()> {
        let tarball = tokio::fs::read(source).await?;
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), Bytes::from(tarball))
            .await
            .map_err(|e| map_docker_error(e, &format!("upload archive to {id}:{path}")))
    }

    async fn list_networks(&self) -> Result<Vec<Value>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| map_docker_error(e, "list networks"))?;
        networks.into_iter().map(to_descriptor).collect()
    }

    async fn inspect_network(&self, name: &str) -> Result<Value> {
        let network = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| map_docker_error(e, &format!("inspect network {name}")))?;
        to_descriptor(network)
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let options = CreateNetworkOptions {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            internal: spec.internal,
            attachable: spec.attachable,
            enable_ipv6: spec.enable_ipv6,
            options: spec.options.clone(),
            labels: spec.labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| map_docker_error(e, &format!("create network {}", spec.name)))?;
        Ok(())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Value> {
        let volume = self
            .docker
            .inspect_volume(name)
            .await
            .map_err(|e| map_docker_error(e, &format!("inspect volume {name}")))?;
        to_descriptor(volume)
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<()> {
        let options = CreateVolumeOptions {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            driver_opts: spec.driver_opts.clone(),
            labels: spec.labels.clone(),
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(|e| map_docker_error(e, &format!("create volume {}", spec.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> DockerError {
        DockerError::DockerResponseServerError {
            status_code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            map_docker_error(server_error(404), "inspect"),
            BackupError::NotFound(_)
        ));
        assert!(matches!(
            map_docker_error(server_error(409), "create"),
            BackupError::Conflict(_)
        ));
        assert!(matches!(
            map_docker_error(server_error(304), "stop"),
            BackupError::NotModified(_)
        ));
        assert!(matches!(
            map_docker_error(server_error(500), "list"),
            BackupError::Docker(_)
        ));
    }

    #[test]
    fn test_error_keeps_context() {
        let err = map_docker_error(server_error(404), "inspect container web");
        assert!(err.to_string().contains("inspect container web"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn docker_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<BollardDockerClient>();
    }
}
