//! Filesystem snapshot codec: walking, attribute capture and tar packing.

pub mod archive;
pub mod metadata;
pub mod walker;

pub use archive::{copy_file, pack, unpack};
pub use metadata::FileMetadata;
