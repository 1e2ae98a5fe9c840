//! Per-resource outcome accounting for bulk runs.

use std::fmt;
use tracing::{error, info, warn};

use crate::utils::errors::BackupError;

/// Resource kinds a run reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Network,
    Volume,
    Container,
    Bind,
    Config,
    Verification,
    Compose,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Image => "image",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::Container => "container",
            ResourceKind::Bind => "bind",
            ResourceKind::Config => "config",
            ResourceKind::Verification => "verification",
            ResourceKind::Compose => "compose",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Failure {
    pub kind: ResourceKind,
    pub id: String,
    pub error: BackupError,
}

/// Outcome of one backup or restore run.
///
/// A run with failures still completes; callers tell it apart from a clean
/// run through [`is_clean`](Self::is_clean) and the summary line.
#[derive(Debug)]
pub struct RunReport {
    operation: &'static str,
    succeeded: Vec<(ResourceKind, String)>,
    skipped: Vec<(ResourceKind, String)>,
    failures: Vec<Failure>,
}

impl RunReport {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn succeeded(&mut self, kind: ResourceKind, id: impl Into<String>) {
        self.succeeded.push((kind, id.into()));
    }

    pub fn skipped(&mut self, kind: ResourceKind, id: impl Into<String>) {
        self.skipped.push((kind, id.into()));
    }

    /// Record a failure and log it with the resource identity.
    pub fn failed(&mut self, kind: ResourceKind, id: impl Into<String>, err: BackupError) {
        let id = id.into();
        error!(
            operation = self.operation,
            kind = %kind,
            resource = %id,
            error = %err,
            "Resource failed"
        );
        self.failures.push(Failure { kind, id, error: err });
    }

    /// Record the outcome of one resource step.
    pub fn record<T>(
        &mut self,
        kind: ResourceKind,
        id: impl Into<String>,
        result: Result<T, BackupError>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.succeeded(kind, id);
                Some(value)
            }
            Err(e) => {
                self.failed(kind, id, e);
                None
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.succeeded.iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn succeeded_ids(&self, kind: ResourceKind) -> Vec<&str> {
        self.succeeded
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.as_str())
            .collect()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Log the closing summary line.
    pub fn log_summary(&self) {
        if self.is_clean() {
            info!(
                images = self.count(ResourceKind::Image),
                networks = self.count(ResourceKind::Network),
                containers = self.count(ResourceKind::Container),
                volumes = self.count(ResourceKind::Volume),
                binds = self.count(ResourceKind::Bind),
                skipped = self.skipped.len(),
                "{} completed",
                self.operation
            );
        } else {
            let failed: Vec<String> = self
                .failures
                .iter()
                .map(|f| format!("{} {}", f.kind, f.id))
                .collect();
            warn!(
                succeeded = self.succeeded.len(),
                failed = ?failed,
                "{} completed with {} failures",
                self.operation,
                self.failures.len()
            );
        }
    }
}
