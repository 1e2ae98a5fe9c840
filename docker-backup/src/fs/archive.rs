//! Attribute-preserving tar snapshots of host paths.
//!
//! Directories travel as a single tar archive (the only payload that carries
//! recursive structure plus per-entry ownership, mode and mtime); single
//! files are copied raw and get their attributes reapplied afterwards.

use nix::sys::stat::utimes;
use nix::sys::time::TimeVal;
use nix::unistd::geteuid;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path};
use tar::{Archive, Builder, EntryType, HeaderMode};
use tracing::{debug, instrument};

use super::metadata::FileMetadata;
use super::walker::{walk_tree, WalkOptions};

/// Pack everything below `root` into a tar archive at `archive_path`.
///
/// Entry names are relative to `root`; the root itself is not an entry.
/// Symlinks are stored as links. Returns the number of entries written.
/// Fails on the first unreadable entry.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn pack(root: &Path, archive_path: &Path) -> std::io::Result<usize> {
    let entries = walk_tree(root, WalkOptions::default())?;

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(archive_path)?;
    let mut builder = Builder::new(BufWriter::new(file));
    builder.mode(HeaderMode::Complete);
    builder.follow_symlinks(false);

    for entry in &entries {
        builder.append_path_with_name(&entry.path, &entry.relative_path)?;
    }

    builder.into_inner()?.flush()?;
    debug!(entries = entries.len(), archive = %archive_path.display(), "Packed snapshot");

    Ok(entries.len())
}

/// Whether [`unpack`] can restore uid/gid in this process.
pub fn preserves_ownership() -> bool {
    geteuid().is_root()
}

/// Extract a tar archive into `dest`, creating it if needed.
///
/// Permissions and mtimes are always restored, directories included;
/// ownership is restored when [`preserves_ownership`]. Existing entries are
/// overwritten.
#[instrument(skip_all, fields(dest = %dest.display()))]
pub fn unpack(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(BufReader::new(file));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(preserves_ownership());
    archive.set_overwrite(true);

    archive.unpack(dest)?;
    restore_directory_mtimes(archive_path, dest)?;
    debug!(archive = %archive_path.display(), "Unpacked snapshot");

    Ok(())
}

/// tar only sets mtimes on files and links, and extracting children touches
/// their parent anyway, so directory times are applied in a second pass.
fn restore_directory_mtimes(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    let mut archive = Archive::new(BufReader::new(File::open(archive_path)?));
    let mut directories = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type() != EntryType::Directory {
            continue;
        }
        let path = entry.path()?;
        if !path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            continue;
        }
        let mtime = entry.header().mtime()?;
        directories.push((dest.join(path), mtime));
    }

    // Deepest first
    directories.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mtime) in directories {
        if !fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir()) {
            continue;
        }
        let time = TimeVal::new(mtime as i64, 0);
        utimes(&path, &time, &time).map_err(|e| {
            std::io::Error::other(format!("set mtime on {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Copy a single file byte-for-byte, then reapply `metadata` to the copy.
pub fn copy_file(source: &Path, dest: &Path, metadata: &FileMetadata) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    metadata.apply_to_path(dest)
}
