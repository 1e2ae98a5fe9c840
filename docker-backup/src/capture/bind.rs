//! Bind-mounted host paths.
//!
//! Each bind of a container becomes a payload under
//! `fs/binds/{container-id}/` plus `{name}.metadata.json`. Files are copied
//! raw; directories are packed into `{name}.tar`. Binds sharing a basename get
//! counter suffixes (`data.conf`, `data_1.conf`). `binds.json` lists the
//! record files, since a payload may itself be named `*.metadata.json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backup_set::{read_json, write_json};
use crate::fs::{archive, FileMetadata};
use crate::utils::errors::Result;

const METADATA_SUFFIX: &str = ".metadata.json";
const INDEX_FILE: &str = "binds.json";

/// A host path exposed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Stored description of one captured bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRecord {
    /// Basename of the host path before de-duplication
    pub original_name: String,
    pub host_path: PathBuf,
    pub container_path: String,
    pub is_dir: bool,
    pub metadata: FileMetadata,
    /// Payload file name inside the binds directory
    pub payload: String,
}

/// Host-path binds of a container, from `HostConfig.Binds` (absolute sources
/// only; named volumes are not host paths) and `Mounts` of type `bind`.
pub fn discover_binds(container: &Value) -> Vec<BindMount> {
    let mut binds: Vec<BindMount> = Vec::new();
    let mut push = |host: &str, target: &str| {
        let host_path = PathBuf::from(host);
        if !binds.iter().any(|b| b.host_path == host_path) {
            binds.push(BindMount {
                host_path,
                container_path: target.to_string(),
            });
        }
    };

    for bind in container["HostConfig"]["Binds"].as_array().into_iter().flatten() {
        let Some(spec) = bind.as_str() else { continue };
        let mut parts = spec.split(':');
        if let (Some(host), Some(target)) = (parts.next(), parts.next()) {
            if host.starts_with('/') {
                push(host, target);
            }
        }
    }

    for mount in container["Mounts"].as_array().into_iter().flatten() {
        if mount["Type"].as_str() != Some("bind") {
            continue;
        }
        if let (Some(host), Some(target)) = (mount["Source"].as_str(), mount["Destination"].as_str()) {
            push(host, target);
        }
    }

    binds
}

/// `data.conf` -> `data_1.conf`, `data_2.conf`, ...
///
/// A name is free only when its payload and its record file are free too.
fn unique_name(taken: &mut HashSet<String>, base: &str, is_dir: bool) -> String {
    let files_of = |name: &str| {
        let payload = if is_dir { format!("{name}.tar") } else { name.to_string() };
        [name.to_string(), payload, format!("{name}{METADATA_SUFFIX}")]
    };
    let path = Path::new(base);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let mut candidate = base.to_string();
    let mut counter = 0;
    while files_of(&candidate).iter().any(|f| taken.contains(f)) {
        counter += 1;
        candidate = format!("{stem}_{counter}{ext}");
    }
    taken.extend(files_of(&candidate));
    candidate
}

/// Capture every bind into `dir`. Missing host paths are skipped with a
/// warning; unreadable ones fail the capture.
pub fn capture_binds(dir: &Path, binds: &[BindMount]) -> Result<Vec<BindRecord>> {
    fs::create_dir_all(dir)?;
    let mut taken = HashSet::from([INDEX_FILE.to_string()]);
    let mut records = Vec::new();
    let mut index = Vec::new();

    for bind in binds {
        if !bind.host_path.exists() {
            warn!(path = %bind.host_path.display(), "Bind source does not exist, skipping");
            continue;
        }

        let metadata = FileMetadata::from_path(&bind.host_path)?;
        let original_name = bind
            .host_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let name = unique_name(&mut taken, &original_name, metadata.is_dir);

        let payload = if metadata.is_dir {
            let payload = format!("{name}.tar");
            archive::pack(&bind.host_path, &dir.join(&payload))?;
            payload
        } else {
            fs::copy(&bind.host_path, dir.join(&name))?;
            name.clone()
        };

        let record = BindRecord {
            original_name,
            host_path: bind.host_path.clone(),
            container_path: bind.container_path.clone(),
            is_dir: metadata.is_dir,
            metadata,
            payload,
        };
        let record_file = format!("{name}{METADATA_SUFFIX}");
        write_json(&dir.join(&record_file), &record)?;
        index.push(record_file);
        debug!(
            host = %record.host_path.display(),
            target = %record.container_path,
            payload = %record.payload,
            "Bind captured"
        );
        records.push(record);
    }

    write_json(&dir.join(INDEX_FILE), &index)?;
    Ok(records)
}

/// Records listed in `dir/binds.json`, in capture order.
pub fn load_records(dir: &Path) -> Result<Vec<BindRecord>> {
    let index_path = dir.join(INDEX_FILE);
    if !index_path.exists() {
        return Ok(Vec::new());
    }
    let index: Vec<String> = read_json(&index_path)?;
    index.iter().map(|file| read_json(&dir.join(file))).collect()
}

/// Put one record back at its original host path, recreating parents, then
/// reapply its attributes.
pub fn restore_bind(dir: &Path, record: &BindRecord) -> Result<()> {
    let payload = dir.join(&record.payload);
    if record.is_dir {
        archive::unpack(&payload, &record.host_path)?;
        record.metadata.apply_to_path(&record.host_path)?;
    } else {
        archive::copy_file(&payload, &record.host_path, &record.metadata)?;
    }
    info!(
        host = %record.host_path.display(),
        target = %record.container_path,
        "Bind restored"
    );
    Ok(())
}

/// Restore every record in `dir`. Returns the number restored.
pub fn restore_binds(dir: &Path) -> Result<usize> {
    let records = load_records(dir)?;
    for record in &records {
        restore_bind(dir, record)?;
    }
    Ok(records.len())
}
