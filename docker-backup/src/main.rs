//! docker-backup - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docker_backup::compose::ComposeExecutor;
use docker_backup::executor::manifest;
use docker_backup::{
    utils, BackupExecutor, BackupSet, BollardDockerClient, Config, RestoreExecutor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backup directory (overrides config and DOCKER_BACKUP_DIR)
    #[arg(short, long, value_name = "DIR", global = true)]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up all images, networks, containers, volumes and binds
    Backup,
    /// Restore everything from the backup directory
    Restore,
    /// Show what the backup directory contains and verify its checksums
    List,
    /// Back up one image, the containers using it and their networks
    BackupImage {
        /// Image name or tag, e.g. nginx:latest
        name: String,
    },
    /// Back up a docker-compose project
    BackupCompose {
        /// Compose file, or the directory containing it
        path: PathBuf,
    },
    /// Restore a backed-up docker-compose project
    RestoreCompose {
        /// Project name
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.backup_dir {
        config.backup.dir = dir;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("docker-backup v{}", env!("CARGO_PKG_VERSION"));

    let root = config.backup.dir.clone();
    let helper = config.docker.helper_image.clone();

    match args.command {
        Command::List => return list(&root),
        Command::Backup => {
            let set = create_set(&root)?;
            let client = connect(&config)?;
            BackupExecutor::new(client, set, helper).run_full().await?
        }
        Command::BackupImage { name } => {
            let set = create_set(&root)?;
            let client = connect(&config)?;
            BackupExecutor::new(client, set, helper)
                .run_image(&name)
                .await
                .with_context(|| format!("backup of image {name} failed"))?
        }
        Command::Restore => {
            let set = BackupSet::open(&root)?;
            let client = connect(&config)?;
            RestoreExecutor::new(client, set, helper).run_full().await?
        }
        Command::BackupCompose { path } => {
            let set = create_set(&root)?;
            let client = connect(&config)?;
            ComposeExecutor::new(client, set, helper)
                .backup(&path)
                .await
                .with_context(|| format!("backup of compose project {} failed", path.display()))?
        }
        Command::RestoreCompose { project } => {
            let set = BackupSet::open(&root)?;
            let client = connect(&config)?;
            ComposeExecutor::new(client, set, helper)
                .restore(&project)
                .await
                .with_context(|| format!("restore of compose project {project} failed"))?
        }
    };

    Ok(())
}

fn create_set(root: &Path) -> Result<BackupSet> {
    BackupSet::create(root)
        .with_context(|| format!("cannot create backup directory {}", root.display()))
}

fn connect(config: &Config) -> Result<Arc<BollardDockerClient>> {
    let client = BollardDockerClient::connect(&config.docker).context("cannot connect to Docker")?;
    Ok(Arc::new(client))
}

fn list(root: &Path) -> Result<()> {
    let set = BackupSet::open(root)?;
    let stats = set.stats()?;

    println!("Backup: {}", set.root().display());
    if let Some(timestamp) = set.timestamp() {
        println!("Backup time: {timestamp}");
    }
    println!(
        "Contains: {} images, {} containers, {} networks, {} volumes",
        stats.images, stats.containers, stats.networks, stats.volumes
    );
    if !stats.compose_projects.is_empty() {
        println!("Compose projects: {}", stats.compose_projects.join(", "));
    }

    match manifest::verify(&set) {
        Ok(verification) => {
            if verification.is_ok() {
                println!("Checksums: {} files verified", verification.verified.len());
            } else {
                println!(
                    "Checksums: {} verified, mismatched {:?}, missing {:?}",
                    verification.verified.len(),
                    verification.mismatched,
                    verification.missing
                );
            }
            if !verification.unrecorded.is_empty() {
                println!("Not in checksums.json: {}", verification.unrecorded.join(", "));
            }
        }
        Err(e) => println!("Checksums: not available ({e})"),
    }

    Ok(())
}
