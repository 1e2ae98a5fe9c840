//! On-disk layout of one backup run.
//!
//! ```text
//! <root>/
//!   images/{id}.json, {id}.tar, mappings.json
//!   networks/{name}.json
//!   containers/{id}.json, {id}.tar
//!   volumes/{name}.json, {name}.tar
//!   fs/volumes/{name}/...            extracted volume mirror (.{name}.unowned flag)
//!   fs/binds/{container-id}/...      bind payloads, .metadata.json, binds.json
//!   config/daemon.json
//!   compose/{project}/...
//!   docker_info.json, docker_version.json, backup_timestamp.txt, checksums.json
//! ```
//!
//! Re-running a backup overwrites records in place.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

pub const MAPPINGS_FILE: &str = "mappings.json";
pub const CHECKSUMS_FILE: &str = "checksums.json";
pub const DOCKER_INFO_FILE: &str = "docker_info.json";
pub const DOCKER_VERSION_FILE: &str = "docker_version.json";
pub const TIMESTAMP_FILE: &str = "backup_timestamp.txt";

const KIND_DIRS: [&str; 7] = [
    "images",
    "networks",
    "containers",
    "volumes",
    "fs/volumes",
    "fs/binds",
    "config",
];

/// Record counts for `list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStats {
    pub images: usize,
    pub containers: usize,
    pub networks: usize,
    pub volumes: usize,
    pub compose_projects: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupSet {
    root: PathBuf,
}

impl BackupSet {
    /// Create the root and all per-kind directories.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in KIND_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    /// Open an existing backup set; the root must exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(BackupError::NotFound(format!(
                "backup directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn image_descriptor(&self, id: &str) -> PathBuf {
        self.images_dir().join(format!("{id}.json"))
    }

    pub fn image_archive(&self, id: &str) -> PathBuf {
        self.images_dir().join(format!("{id}.tar"))
    }

    pub fn mappings_path(&self) -> PathBuf {
        self.images_dir().join(MAPPINGS_FILE)
    }

    pub fn networks_dir(&self) -> PathBuf {
        self.root.join("networks")
    }

    pub fn network_descriptor(&self, name: &str) -> PathBuf {
        self.networks_dir().join(format!("{name}.json"))
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn container_descriptor(&self, id: &str) -> PathBuf {
        self.containers_dir().join(format!("{id}.json"))
    }

    pub fn container_archive(&self, id: &str) -> PathBuf {
        self.containers_dir().join(format!("{id}.tar"))
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    pub fn volume_descriptor(&self, name: &str) -> PathBuf {
        self.volumes_dir().join(format!("{name}.json"))
    }

    pub fn volume_archive(&self, name: &str) -> PathBuf {
        self.volumes_dir().join(format!("{name}.tar"))
    }

    /// Complete mirror of a volume. Only exists after a successful extraction.
    pub fn volume_mirror(&self, name: &str) -> PathBuf {
        self.root.join("fs/volumes").join(name)
    }

    // Volume names start with an alphanumeric, so dot-prefixed entries in
    // fs/volumes never collide with a mirror.

    /// Extraction target, renamed to [`volume_mirror`](Self::volume_mirror) when complete.
    pub fn volume_mirror_partial(&self, name: &str) -> PathBuf {
        self.root.join("fs/volumes").join(format!(".{name}.partial"))
    }

    /// Present when the mirror was extracted without its uid/gid.
    pub fn volume_mirror_unowned(&self, name: &str) -> PathBuf {
        self.root.join("fs/volumes").join(format!(".{name}.unowned"))
    }

    pub fn binds_dir(&self, container_id: &str) -> PathBuf {
        self.root.join("fs/binds").join(container_id)
    }

    pub fn daemon_config(&self) -> PathBuf {
        self.root.join("config/daemon.json")
    }

    pub fn compose_root(&self) -> PathBuf {
        self.root.join("compose")
    }

    pub fn compose_dir(&self, project: &str) -> PathBuf {
        self.compose_root().join(project)
    }

    pub fn top_level(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Record identities in `dir`: stems of `*.json` files, sorted.
    /// `mappings.json` is not a record.
    pub fn record_ids(dir: &Path) -> Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == MAPPINGS_FILE || !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".json") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn stats(&self) -> Result<BackupStats> {
        let mut compose_projects = Vec::new();
        let compose_root = self.compose_root();
        if compose_root.is_dir() {
            for entry in fs::read_dir(&compose_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    compose_projects.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            compose_projects.sort();
        }

        Ok(BackupStats {
            images: Self::record_ids(&self.images_dir())?.len(),
            containers: Self::record_ids(&self.containers_dir())?.len(),
            networks: Self::record_ids(&self.networks_dir())?.len(),
            volumes: Self::record_ids(&self.volumes_dir())?.len(),
            compose_projects,
        })
    }

    /// Contents of `backup_timestamp.txt`, if present.
    pub fn timestamp(&self) -> Option<String> {
        fs::read_to_string(self.top_level(TIMESTAMP_FILE))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

/// Write `value` as pretty-printed UTF-8 JSON with a trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
