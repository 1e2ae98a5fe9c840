//! Directory traversal for snapshot packing.
//!
//! Unlike a file-sync walk, a snapshot walk never filters entries: every
//! directory, file and symlink under the root is reported, in a stable order,
//! so that two packs of an unchanged tree produce the same entry sequence.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Report the root itself as the first entry
    pub include_root: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            include_root: false,
        }
    }
}

/// Kind of a walked entry, as seen without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size in bytes (0 for directories)
    pub size: u64,

    pub kind: EntryKind,

    /// Depth from root
    pub depth: usize,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Ok(Self {
            path,
            relative_path,
            size: if kind == EntryKind::Dir { 0 } else { metadata.len() },
            kind,
            depth: entry.depth(),
        })
    }
}

/// Walk a directory tree and collect every entry, sorted by file name.
///
/// Any unreadable entry aborts the walk with an error; a partial listing is
/// never returned.
pub fn walk_tree(root: &Path, options: WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(if options.include_root { 0 } else { 1 })
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            std::io::Error::other(format!("cannot read {}: {}", path, e))
        })?;
        entries.push(FileInfo::from_entry(&entry, root)?);
    }

    Ok(entries)
}
