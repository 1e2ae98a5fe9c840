//! Docker Engine API abstraction.
//!
//! The [`DockerClient`] trait is the only way the backup and restore code
//! talks to the daemon. Production code uses [`BollardDockerClient`]; tests
//! use an in-memory `MockDockerClient`.
//!
//! Descriptors (inspect/list results) cross this boundary as opaque
//! [`serde_json::Value`] documents so they can be stored and replayed without
//! losing fields the daemon defines. Payloads (exports, archives) are streamed
//! to or from files rather than returned in memory.
//!
//! The adapter never retries. Daemon status codes are classified as:
//! - 404 → `BackupError::NotFound`
//! - 409 → `BackupError::Conflict`
//! - 304 → `BackupError::NotModified`
//! - anything else → `BackupError::Docker`

pub mod client;
#[cfg(test)]
pub mod mock;

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use crate::utils::errors::Result;

pub use client::BollardDockerClient;

/// Parameters for creating a network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub options: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub internal: bool,
    pub attachable: bool,
    pub enable_ipv6: bool,
}

/// Parameters for creating a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub driver: String,
    pub driver_opts: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// Capability-narrowed view of the Docker daemon.
///
/// Every call is a single request from the caller's point of view; network
/// latency is the only suspension point.
pub trait DockerClient: Send + Sync + 'static {
    /// Daemon-wide information (`docker info`).
    fn info(&self) -> impl Future<Output = Result<Value>> + Send;

    /// Daemon version (`docker version`).
    fn version(&self) -> impl Future<Output = Result<Value>> + Send;

    /// Lists top-level images.
    fn list_images(&self) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Inspects an image by ID or `repo:tag` reference.
    fn inspect_image(&self, reference: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Writes `docker save` output for an image to `dest`.
    fn export_image(&self, id: &str, dest: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Loads an image tarball previously produced by [`export_image`](Self::export_image).
    fn load_image(&self, source: &Path) -> impl Future<Output = Result<()>> + Send;

    fn tag_image(&self, id: &str, repo: &str, tag: &str)
        -> impl Future<Output = Result<()>> + Send;

    /// Pulls an image from its registry.
    fn pull_image(&self, reference: &str) -> impl Future<Output = Result<()>> + Send;

    /// Lists all containers, running or not.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<Value>>> + Send;

    fn inspect_container(&self, id: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Creates a container from a create body (`Config` fields plus
    /// `HostConfig` and `NetworkingConfig`). Returns the new container ID.
    fn create_container(
        &self,
        name: Option<&str>,
        body: &Value,
    ) -> impl Future<Output = Result<String>> + Send;

    fn start_container(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    fn stop_container(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    fn remove_container(&self, id: &str, force: bool) -> impl Future<Output = Result<()>> + Send;

    /// Writes the full filesystem export of a container to `dest`.
    fn export_container(&self, id: &str, dest: &Path)
        -> impl Future<Output = Result<()>> + Send;

    /// Writes a tar archive of `path` inside the container to `dest`.
    fn download_archive(
        &self,
        id: &str,
        path: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Extracts the tar archive at `source` into `path` inside the container.
    fn upload_archive(
        &self,
        id: &str,
        path: &str,
        source: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    fn list_networks(&self) -> impl Future<Output = Result<Vec<Value>>> + Send;

    fn inspect_network(&self, name: &str) -> impl Future<Output = Result<Value>> + Send;

    fn create_network(&self, spec: &NetworkSpec) -> impl Future<Output = Result<()>> + Send;

    fn inspect_volume(&self, name: &str) -> impl Future<Output = Result<Value>> + Send;

    fn create_volume(&self, spec: &VolumeSpec) -> impl Future<Output = Result<()>> + Send;
}
