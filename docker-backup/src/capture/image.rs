//! Image records and the tag mappings used to reattach tags after a load.
//!
//! A loaded image comes back content-addressed only, so `images/mappings.json`
//! keeps `id -> {repoTags, repoDigests}` for every captured image.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::backup_set::{read_json, write_json, BackupSet};
use crate::docker::DockerClient;
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapping {
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub repo_digests: Vec<String>,
}

impl ImageMapping {
    pub fn from_descriptor(descriptor: &Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            descriptor[key]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        Self {
            repo_tags: strings("RepoTags"),
            repo_digests: strings("RepoDigests"),
        }
    }
}

pub type ImageMappings = BTreeMap<String, ImageMapping>;

/// Split a `repo[:tag]` reference. The tag separator is the last `:` after
/// the last `/`, so registry ports stay in the repository. A missing tag means
/// `latest`; `<none>` references yield `None`.
pub fn split_repo_tag(reference: &str) -> Option<(String, String)> {
    if reference.is_empty() || reference.starts_with("<none>") {
        return None;
    }
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            Some((reference[..split].to_string(), reference[split + 1..].to_string()))
        }
        None => Some((reference.to_string(), "latest".to_string())),
    }
}

/// Write `images/{id}.json` and `images/{id}.tar`. Returns the tag mapping
/// for the image; the caller merges mappings once per run.
pub async fn capture_image<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    id: &str,
) -> Result<ImageMapping> {
    let descriptor = client.inspect_image(id).await?;
    write_json(&set.image_descriptor(id), &descriptor)?;
    client.export_image(id, &set.image_archive(id)).await?;

    let mapping = ImageMapping::from_descriptor(&descriptor);
    debug!(image = %id, tags = ?mapping.repo_tags, "Image captured");
    Ok(mapping)
}

pub fn load_mappings(set: &BackupSet) -> Result<ImageMappings> {
    let path = set.mappings_path();
    if !path.exists() {
        return Ok(ImageMappings::new());
    }
    read_json(&path)
}

/// Merge `captured` into `images/mappings.json`, keeping entries for images
/// captured by earlier runs.
pub fn merge_mappings(set: &BackupSet, captured: ImageMappings) -> Result<()> {
    let mut mappings = load_mappings(set)?;
    mappings.extend(captured);
    write_json(&set.mappings_path(), &mappings)
}

/// Find the image record that satisfies a container: first by image ID, then
/// by a mapped tag equal to `reference` (an untagged reference means `:latest`).
pub fn find_image_record(
    set: &BackupSet,
    mappings: &ImageMappings,
    image_id: Option<&str>,
    reference: &str,
) -> Result<Option<String>> {
    let ids = BackupSet::record_ids(&set.images_dir())?;

    if let Some(id) = image_id {
        if ids.iter().any(|r| r == id) {
            return Ok(Some(id.to_string()));
        }
    }

    let wanted = split_repo_tag(reference).map(|(repo, tag)| format!("{repo}:{tag}"));
    Ok(ids.into_iter().find(|id| {
        mappings.get(id).is_some_and(|m| {
            m.repo_tags
                .iter()
                .any(|t| t == reference || Some(t) == wanted.as_ref())
        })
    }))
}

/// Load `images/{id}.tar` and reattach the mapped tags.
pub async fn restore_image<C: DockerClient>(
    client: &C,
    set: &BackupSet,
    id: &str,
    mappings: &ImageMappings,
) -> Result<()> {
    let archive = set.image_archive(id);
    if !set.image_descriptor(id).exists() || !archive.exists() {
        return Err(BackupError::IncompleteBackup(format!(
            "image {id} is missing its descriptor or archive"
        )));
    }

    client.load_image(&archive).await?;

    let tags = mappings.get(id).map(|m| m.repo_tags.as_slice()).unwrap_or_default();
    for reference in tags {
        if let Some((repo, tag)) = split_repo_tag(reference) {
            client.tag_image(id, &repo, &tag).await?;
        }
    }

    info!(image = %id, tags = ?tags, "Image restored");
    Ok(())
}
