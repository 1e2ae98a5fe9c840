//! Volume records.
//!
//! Volumes have no host-side path the daemon hands out, so their content is
//! read and written through a helper container (see
//! [`with_helper_container`]). Capture keeps the raw archive and also an
//! extracted mirror; the mirror is extracted to `.{name}.partial` and renamed
//! into place only once extraction succeeded, so an existing mirror is always
//! complete. A mirror extracted without root cannot carry uid/gid; it is
//! flagged with `.{name}.unowned` and restore then uses the raw archive.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use super::{string_map, with_helper_container, HELPER_MOUNT};
use crate::backup_set::{read_json, write_json, BackupSet};
use crate::docker::{DockerClient, VolumeSpec};
use crate::fs::archive;
use crate::utils::errors::{BackupError, Result};

/// Names of volumes a container mounts (`Mounts` entries of type `volume`).
pub fn referenced_volumes(container: &Value) -> Vec<String> {
    let mut names: Vec<String> = container["Mounts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|m| m["Type"].as_str() == Some("volume"))
        .filter_map(|m| m["Name"].as_str().map(str::to_string))
        .collect();
    names.dedup();
    names
}

/// Write `volumes/{name}.json`, `volumes/{name}.tar` and the mirror.
pub async fn capture_volume<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    helper_image: &str,
    name: &str,
) -> Result<()> {
    let descriptor = client.inspect_volume(name).await?;
    write_json(&set.volume_descriptor(name), &descriptor)?;

    let partial = set.volume_mirror_partial(name);
    if partial.exists() {
        fs::remove_dir_all(&partial)?;
    }

    let archive_path = set.volume_archive(name);
    with_helper_container(client, helper_image, name, |helper| {
        let archive_path = archive_path.clone();
        async move {
            client
                .download_archive(&helper, HELPER_MOUNT, &archive_path)
                .await
        }
    })
    .await?;

    let mirror = set.volume_mirror(name);
    let unowned = set.volume_mirror_unowned(name);
    tokio::task::spawn_blocking(move || publish_mirror(&archive_path, &partial, &mirror, &unowned))
        .await??;

    info!(volume = %name, "Volume captured");
    Ok(())
}

fn publish_mirror(
    archive_path: &Path,
    partial: &Path,
    mirror: &Path,
    unowned: &Path,
) -> std::io::Result<()> {
    if let Err(e) = archive::unpack(archive_path, partial) {
        let _ = fs::remove_dir_all(partial);
        return Err(e);
    }

    // The marker goes in before the mirror and comes out after it, so an
    // unowned mirror is never published unflagged.
    let owned = archive::preserves_ownership();
    if !owned {
        fs::write(unowned, b"")?;
    }
    if mirror.exists() {
        fs::remove_dir_all(mirror)?;
    }
    fs::rename(partial, mirror)?;
    if owned && unowned.exists() {
        fs::remove_file(unowned)?;
    }
    Ok(())
}

/// The mirror when it is complete and kept ownership, else the raw archive.
fn mirror_source(set: &BackupSet, name: &str) -> Option<PathBuf> {
    let mirror = set.volume_mirror(name);
    if !mirror.is_dir() {
        return None;
    }
    if set.volume_mirror_unowned(name).exists() {
        debug!(volume = %name, "Mirror lacks ownership, using archive");
        return None;
    }
    Some(mirror)
}

/// Recreate a volume from its records and populate it, preferring the mirror
/// over the raw archive. Both `.json` and `.tar` must be present.
pub async fn restore_volume<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    helper_image: &str,
    name: &str,
) -> Result<()> {
    let descriptor_path = set.volume_descriptor(name);
    let archive_path = set.volume_archive(name);
    if !descriptor_path.exists() || !archive_path.exists() {
        return Err(BackupError::IncompleteBackup(format!(
            "volume {name} is missing {}",
            if descriptor_path.exists() { "its archive" } else { "its descriptor" }
        )));
    }

    let descriptor: Value = read_json(&descriptor_path)?;
    let spec = VolumeSpec {
        name: name.to_string(),
        driver: descriptor["Driver"].as_str().unwrap_or("local").to_string(),
        driver_opts: string_map(&descriptor["Options"]),
        labels: string_map(&descriptor["Labels"]),
    };
    client.create_volume(&spec).await?;

    // Dot-prefixed scratch file, outside the volume record names; removed on drop.
    let (source, packed): (PathBuf, Option<TempPath>) = match mirror_source(set, name) {
        Some(mirror) => {
            let temp = tempfile::Builder::new()
                .prefix(".restore-")
                .suffix(".tar")
                .tempfile_in(set.volumes_dir())?
                .into_temp_path();
            let to = temp.to_path_buf();
            tokio::task::spawn_blocking(move || archive::pack(&mirror, &to)).await??;
            debug!(volume = %name, "Restoring from mirror");
            (temp.to_path_buf(), Some(temp))
        }
        None => {
            debug!(volume = %name, "Restoring from archive");
            (archive_path, None)
        }
    };

    with_helper_container(client, helper_image, name, |helper| {
        let source = source.clone();
        async move { client.upload_archive(&helper, "/", &source).await }
    })
    .await?;

    if let Some(temp) = packed {
        if let Err(e) = temp.close() {
            warn!(volume = %name, error = %e, "Failed to remove temporary archive");
        }
    }

    info!(volume = %name, driver = %spec.driver, "Volume restored");
    Ok(())
}
