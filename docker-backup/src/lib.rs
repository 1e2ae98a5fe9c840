//! Docker host backup and restore.
//!
//! Captures images, networks, containers, volumes and bind-mounted host paths
//! into a [`BackupSet`](backup_set::BackupSet) directory and rebuilds them on
//! the same or another host.

pub mod backup_set;
pub mod capture;
pub mod compose;
pub mod config;
pub mod docker;
pub mod executor;
pub mod fs;
pub mod utils;

// Re-export commonly used types
pub use backup_set::BackupSet;
pub use config::Config;
pub use docker::{BollardDockerClient, DockerClient};
pub use executor::{BackupExecutor, RestoreExecutor, RunReport};
pub use utils::errors::{BackupError, Result};
