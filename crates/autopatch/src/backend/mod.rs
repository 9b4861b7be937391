//! Collaborator traits for the package manager and the host.
//!
//! The orchestrator never talks to dnf, rpm or the kernel directly; it goes
//! through these traits so runs can be tested deterministically.
//!
//! Production code uses `DnfBackend` and `SystemHost`.
//! Test code uses `FakeBackend` and `FakeHost` with pre-configured answers.

pub mod dnf;
pub mod fake;
pub mod host;

use async_trait::async_trait;
use autopatch_common::{DownloadedArtifact, UpdateCandidate};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use dnf::DnfBackend;
pub use fake::{FakeBackend, FakeBackendBuilder, FakeHost, FetchBehavior};
pub use host::SystemHost;

/// Enabled repository and the age of its cached metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoState {
    pub id: String,
    /// `None` when no metadata is cached
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Artifact fetch failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network hiccup, timeout, 5xx: worth retrying
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// 404, missing location, local IO error: retrying will not help
    #[error("fetch failed: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Transaction failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The package manager refused the batch; nothing is installed
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Gave up waiting; the package manager may still complete the batch
    #[error("transaction did not finish within {0:?}")]
    Timeout(Duration),

    #[error("transaction executor unavailable: {0}")]
    Executor(String),
}

impl TransactionError {
    /// Whether the installed package set may have changed
    pub fn state_unknown(&self) -> bool {
        matches!(self, TransactionError::Timeout(_))
    }
}

/// Package-management collaborator
#[async_trait]
pub trait PackageBackend: Send + Sync {
    /// Enabled repositories with their metadata age
    async fn repositories(&self) -> anyhow::Result<Vec<RepoState>>;

    /// Fetch fresh metadata for one repository
    async fn refresh(&self, repo_id: &str) -> anyhow::Result<()>;

    /// Available upgrades from the cached metadata of `repos`, advisories
    /// attached where known
    async fn available_upgrades(&self, repos: &[String]) -> anyhow::Result<Vec<UpdateCandidate>>;

    /// Fetch the candidate's artifact into `dest_dir`, returning its path
    async fn fetch(&self, candidate: &UpdateCandidate, dest_dir: &Path)
        -> Result<PathBuf, FetchError>;

    /// Install the whole batch as one transaction
    async fn apply(&self, artifacts: &[DownloadedArtifact]) -> Result<(), TransactionError>;
}

/// Host-state collaborator
#[async_trait]
pub trait HostState: Send + Sync {
    /// Whether at least one non-loopback interface is up
    async fn network_online(&self) -> bool;

    /// `Some(reason)` when the applied set needs a reboot to take effect
    async fn reboot_required(&self, applied: &[UpdateCandidate]) -> anyhow::Result<Option<String>>;

    /// Run the configured reboot command
    async fn trigger_reboot(&self, command: &str) -> anyhow::Result<()>;
}
