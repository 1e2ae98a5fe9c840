//! Per-resource capture and restore units.
//!
//! Each unit turns a live resource into records under the [`BackupSet`]
//! (descriptor JSON plus an optional payload) and materializes a live
//! resource from those records. Sequencing across kinds and failure
//! accounting belong to the executors.
//!
//! [`BackupSet`]: crate::backup_set::BackupSet

pub mod bind;
pub mod container;
pub mod image;
pub mod network;
pub mod volume;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::docker::DockerClient;
use crate::utils::errors::Result;

/// Where a helper container mounts the volume it gives access to.
pub const HELPER_MOUNT: &str = "/volume-data";

/// Pull `reference` unless the daemon already has it.
pub async fn ensure_image<C: DockerClient>(client: &C, reference: &str) -> Result<()> {
    match client.inspect_image(reference).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            info!(image = %reference, "Pulling missing image");
            client.pull_image(reference).await
        }
        Err(e) => Err(e),
    }
}

/// Run `f` against a disposable container that has `volume` mounted at
/// [`HELPER_MOUNT`].
///
/// Once the container exists it is force-removed on every exit path,
/// including a failed start or a failing `f`. Release failures are logged and
/// never mask the result of `f`.
pub async fn with_helper_container<C, F, Fut, T>(
    client: &C,
    helper_image: &str,
    volume: &str,
    f: F,
) -> Result<T>
where
    C: DockerClient,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    ensure_image(client, helper_image).await?;

    let body = json!({
        "Image": helper_image,
        "Cmd": ["sh", "-c", "sleep 3600"],
        "Labels": { "docker-backup.helper": "true" },
        "HostConfig": {
            "Binds": [format!("{volume}:{HELPER_MOUNT}")],
        },
    });
    let name = format!("docker-backup-helper-{}", Uuid::new_v4());
    let id = client.create_container(Some(&name), &body).await?;
    debug!(helper = %name, volume = %volume, "Helper container created");

    let result = match client.start_container(&id).await {
        Ok(()) => f(id.clone()).await,
        Err(e) => Err(e),
    };

    release_helper(client, &id).await;
    result
}

/// Force removal kills the `sleep` directly; a graceful stop would wait out
/// the stop timeout since PID 1 ignores SIGTERM.
async fn release_helper<C: DockerClient>(client: &C, id: &str) {
    match client.remove_container(id, true).await {
        Ok(()) => debug!(helper = %id, "Helper container removed"),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(helper = %id, error = %e, "Failed to remove helper container"),
    }
}

/// String-valued object field of a descriptor; null or missing gives an empty map.
pub(crate) fn string_map(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Container name without the leading `/` the daemon reports.
pub(crate) fn trim_name(name: &str) -> &str {
    name.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::MockDockerClient;
    use crate::utils::errors::BackupError;

    #[tokio::test]
    async fn test_helper_released_when_body_fails() {
        let client = MockDockerClient::new().with_volume("v1", Vec::new());

        let result: Result<()> = with_helper_container(&client, "alpine:latest", "v1", |_id| async {
            Err(BackupError::Docker("archive failed".into()))
        })
        .await;

        assert!(result.is_err());
        assert!(client.state().containers.is_empty());
        let calls = client.calls();
        assert!(calls.contains(&"pull_image:alpine:latest".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("remove_container:")));
    }

    #[tokio::test]
    async fn test_helper_released_when_start_fails() {
        let client = MockDockerClient::new()
            .with_image("sha256:alpine", &["alpine:latest"])
            .with_volume("v1", Vec::new());
        client.state().fail_starts = true;

        let mut ran = false;
        let result = with_helper_container(&client, "alpine:latest", "v1", |_id| {
            ran = true;
            async { Ok(()) }
        })
        .await;

        assert!(result.is_err());
        assert!(!ran);
        assert!(client.state().containers.is_empty());
        assert!(!client.calls().iter().any(|c| c.starts_with("stop_container")));
    }

    #[tokio::test]
    async fn test_helper_skips_pull_when_present() {
        let client = MockDockerClient::new()
            .with_image("sha256:alpine", &["alpine:latest"])
            .with_volume("v1", Vec::new());

        let id = with_helper_container(&client, "alpine:latest", "v1", |id| async move { Ok(id) })
            .await
            .unwrap();

        assert!(!id.is_empty());
        assert!(!client.calls().iter().any(|c| c.starts_with("pull_image")));
        assert!(client.state().containers.is_empty());
    }

    #[test]
    fn test_string_map_ignores_non_strings() {
        let map = string_map(&json!({ "a": "1", "b": 2, "c": null }));
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"], "1");
        assert!(string_map(&Value::Null).is_empty());
    }
}
