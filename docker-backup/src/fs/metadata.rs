//! File attribute capture and reapplication.
//!
//! Bind-mounted files are copied byte-for-byte, so their ownership, mode and
//! modification time have to be put back explicitly after the copy.

use nix::sys::stat::utimes;
use nix::sys::time::TimeVal;
use nix::unistd::{chown, geteuid, Gid, Uid};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::warn;

/// Attributes restored onto a path after its content has been written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Permission bits (including setuid/setgid/sticky)
    pub mode: u32,

    pub uid: u32,

    pub gid: u32,

    /// Last modified time (seconds since Unix epoch)
    pub mtime: i64,

    /// Sub-second part of the modification time
    #[serde(default)]
    pub mtime_nsec: i64,

    pub is_dir: bool,

    pub size: u64,
}

impl FileMetadata {
    /// Read attributes from a path, following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        Ok(Self {
            mode: metadata.permissions().mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec(),
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
        })
    }

    /// Apply ownership, mode and mtime to a path.
    ///
    /// Ownership goes first because chown clears setuid/setgid bits; the mode
    /// is applied afterwards so those bits survive. Like `tar`, ownership is
    /// only changed when running as root.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        let current = fs::metadata(path)?;
        let owner_differs = current.uid() != self.uid || current.gid() != self.gid;
        if owner_differs && !geteuid().is_root() {
            warn!(
                path = %path.display(),
                uid = self.uid,
                gid = self.gid,
                "Not running as root, leaving ownership unchanged"
            );
        } else if owner_differs {
            chown(
                path,
                Some(Uid::from_raw(self.uid)),
                Some(Gid::from_raw(self.gid)),
            )
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("chown {} to {}:{}: {}", path.display(), self.uid, self.gid, e),
                )
            })?;
        }

        fs::set_permissions(path, fs::Permissions::from_mode(self.mode))?;

        let mtime = TimeVal::new(self.mtime, self.mtime_nsec / 1_000);
        utimes(path, &mtime, &mtime).map_err(|e| {
            std::io::Error::other(format!("set mtime on {}: {}", path.display(), e))
        })?;

        Ok(())
    }
}
