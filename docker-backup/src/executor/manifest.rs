//! Checksum manifest and provenance records.
//!
//! Written once at the end of a backup: daemon info and version, a timestamp,
//! and a SHA-256 of every regular file directly under the backup root.
//! Subdirectories are not covered; each record there is checked through its
//! own descriptor/payload pairing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

use crate::backup_set::{
    read_json, write_json, BackupSet, CHECKSUMS_FILE, DOCKER_INFO_FILE, DOCKER_VERSION_FILE,
    TIMESTAMP_FILE,
};
use crate::docker::DockerClient;
use crate::utils::errors::{BackupError, Result};

/// File name -> lowercase hex SHA-256
pub type Checksums = BTreeMap<String, String>;

/// Result of checking `checksums.json` against the files on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: Vec<String>,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    /// Top-level files the manifest does not know about
    pub unrecorded: Vec<String>,
}

impl Verification {
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest every top-level regular file except the manifest itself. A file
/// that cannot be read is logged and left out.
pub fn compute_checksums(root: &Path) -> Result<Checksums> {
    let mut checksums = Checksums::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == CHECKSUMS_FILE || !entry.file_type()?.is_file() {
            continue;
        }
        match sha256_file(&entry.path()) {
            Ok(digest) => {
                checksums.insert(name, digest);
            }
            Err(e) => warn!(file = %name, error = %e, "Failed to checksum file"),
        }
    }
    Ok(checksums)
}

/// Record daemon identity, the timestamp and the checksum manifest.
pub async fn write_verification<C: DockerClient>(client: &C, set: &BackupSet) -> Result<Checksums> {
    let info = client.info().await?;
    write_json(&set.top_level(DOCKER_INFO_FILE), &info)?;
    let version = client.version().await?;
    write_json(&set.top_level(DOCKER_VERSION_FILE), &version)?;

    fs::write(set.top_level(TIMESTAMP_FILE), format!("{}\n", Utc::now().to_rfc3339()))?;

    let root = set.root().to_path_buf();
    let checksums = tokio::task::spawn_blocking(move || compute_checksums(&root)).await??;
    write_json(&set.top_level(CHECKSUMS_FILE), &checksums)?;

    info!(files = checksums.len(), "Backup verification written");
    Ok(checksums)
}

/// Re-check the stored manifest against the current top-level files.
pub fn verify(set: &BackupSet) -> Result<Verification> {
    let manifest_path = set.top_level(CHECKSUMS_FILE);
    if !manifest_path.exists() {
        return Err(BackupError::IncompleteBackup(format!(
            "{} is missing",
            manifest_path.display()
        )));
    }
    let recorded: Checksums = read_json(&manifest_path)?;
    let current = compute_checksums(set.root())?;

    let mut verification = Verification::default();
    for (name, digest) in &recorded {
        match current.get(name) {
            Some(actual) if actual == digest => verification.verified.push(name.clone()),
            Some(_) => verification.mismatched.push(name.clone()),
            None => verification.missing.push(name.clone()),
        }
    }
    verification.unrecorded = current
        .keys()
        .filter(|name| !recorded.contains_key(*name))
        .cloned()
        .collect();

    Ok(verification)
}
